//! SQLite schema definition.

/// Complete database schema for the clinic ledger.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    name_search TEXT NOT NULL,                   -- lowercased name for substring search
    birth_date TEXT,
    photo TEXT,
    phone TEXT,
    email TEXT,
    notes TEXT,
    consultation_price_cents INTEGER
        CHECK (consultation_price_cents IS NULL OR consultation_price_cents > 0),
    credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_patients_name_search ON patients(name_search);

-- ============================================================================
-- Consultations
-- ============================================================================

CREATE TABLE IF NOT EXISTS consultations (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
    status TEXT NOT NULL CHECK (status IN ('OPEN', 'FINALIZED')),
    started_at TEXT NOT NULL,
    finished_at TEXT,
    price_cents INTEGER NOT NULL CHECK (price_cents > 0),
    paid INTEGER NOT NULL DEFAULT 0 CHECK (paid IN (0, 1)),
    paid_at TEXT,
    content TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((status = 'FINALIZED') = (finished_at IS NOT NULL)),
    CHECK ((paid = 1) = (paid_at IS NOT NULL))
);

-- At most one OPEN consultation per patient
CREATE UNIQUE INDEX IF NOT EXISTS idx_consultations_one_open
    ON consultations(patient_id) WHERE status = 'OPEN';

CREATE INDEX IF NOT EXISTS idx_consultations_patient ON consultations(patient_id);
CREATE INDEX IF NOT EXISTS idx_consultations_started ON consultations(started_at);

-- Price and start time are fixed at creation
CREATE TRIGGER IF NOT EXISTS consultations_immutable_snapshot BEFORE UPDATE ON consultations
WHEN new.price_cents != old.price_cents
    OR new.started_at != old.started_at
    OR new.patient_id != old.patient_id
BEGIN
    SELECT RAISE(ABORT, 'consultation price, start and patient are immutable');
END;

-- ============================================================================
-- Credit Journal (Append-Only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS credit_journal (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL UNIQUE,
    patient_id TEXT NOT NULL,                    -- history outlives the patient row
    kind TEXT NOT NULL CHECK (kind IN ('SALE', 'CONSUMPTION')),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    balance_after INTEGER NOT NULL CHECK (balance_after >= 0),
    unit_price_cents INTEGER,
    consultation_id TEXT,
    recorded_at TEXT NOT NULL,
    prev_hash TEXT,
    hash TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_credit_journal_patient ON credit_journal(patient_id);

CREATE TRIGGER IF NOT EXISTS credit_journal_no_update BEFORE UPDATE ON credit_journal
BEGIN
    SELECT RAISE(ABORT, 'credit journal is append-only');
END;

CREATE TRIGGER IF NOT EXISTS credit_journal_no_delete BEFORE DELETE ON credit_journal
BEGIN
    SELECT RAISE(ABORT, 'credit journal is append-only');
END;
"#;
