//! Clinic Ledger Core Library
//!
//! Consultation lifecycle, prepaid credit ledger and financial summaries for
//! a single clinic's patient records, stored locally in SQLite.
//!
//! # Architecture
//!
//! ```text
//!   Shell (desktop / mobile, via UniFFI)
//!                  │
//!           ┌──────▼──────┐
//!           │ ClinicLedger │  string money & timestamps, Mutex<Database>
//!           └──────┬──────┘
//!     ┌────────────┼─────────────┬──────────────┐
//!     ▼            ▼             ▼              ▼
//!  registry    lifecycle ───► ledger        finance ──► export
//!  (patients)  (consultations) (credits,    (summaries,  (JSON/CSV
//!                  │           journal)      overview)    report)
//!                  └──────┬──────┘
//!                         ▼
//!               store traits ──► db (SQLite, IMMEDIATE transactions)
//! ```
//!
//! # Core Rules
//!
//! - A patient has at most one OPEN consultation.
//! - Opening a consultation for a patient with credits pays it and consumes
//!   exactly one credit, atomically.
//! - A credit balance never goes negative; every movement is journaled in a
//!   hash chain.
//!
//! # Modules
//!
//! - [`store`]: Persistence traits the services are written against
//! - [`db`]: SQLite implementation of the store traits
//! - [`models`]: Domain types (Patient, Consultation, FinancialSummary, ...)
//! - [`ledger`]: Credit sales, consumption and the journal
//! - [`lifecycle`]: Consultation state machine
//! - [`registry`]: Patient CRUD
//! - [`finance`]: Financial summaries and overview
//! - [`listing`]: Pagination, sorting, search and filters
//! - [`export`]: Financial report export
//! - [`config`], [`logging`]: Ambient setup

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod finance;
pub mod ledger;
pub mod lifecycle;
pub mod listing;
pub mod logging;
pub mod models;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use config::LedgerConfig;
pub use db::Database;
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use export::{FinancialReport, ReportExporter};
pub use finance::FinancialAggregator;
pub use ledger::{CreditLedger, CreditSale};
pub use lifecycle::ConsultationLifecycle;
pub use listing::{ConsultationFilter, ListQuery, Page, RawConsultationFilter, RawListQuery};
pub use models::{
    Consultation, ConsultationPatch, ConsultationStatus, ConsultationWithPatient,
    CreditJournalEntry, FinancialSummary, NewPatient, Patient, PatientSummary, PatientUpdate,
};
pub use registry::PatientRegistry;
pub use store::{LedgerStore, StoreError, Transactional};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicError {
    #[error("{message}")]
    Validation {
        message: String,
        fields: HashMap<String, String>,
    },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    BusinessRule { message: String },

    #[error("{message}")]
    Persistence { message: String },
}

impl ClinicError {
    fn invalid(field: &str, message: String) -> Self {
        let mut fields = HashMap::new();
        fields.insert(field.to_string(), message.clone());
        ClinicError::Validation { message, fields }
    }
}

impl From<LedgerError> for ClinicError {
    fn from(e: LedgerError) -> Self {
        let message = e.to_string();
        match e {
            LedgerError::Validation { fields, .. } => ClinicError::Validation {
                message,
                fields: fields.into_iter().collect(),
            },
            LedgerError::NotFound(_) => ClinicError::NotFound { message },
            LedgerError::BusinessRule(_) => ClinicError::BusinessRule { message },
            LedgerError::Persistence { .. } => ClinicError::Persistence { message },
        }
    }
}

impl From<StoreError> for ClinicError {
    fn from(e: StoreError) -> Self {
        LedgerError::from(e).into()
    }
}

impl From<config::ConfigError> for ClinicError {
    fn from(e: config::ConfigError) -> Self {
        ClinicError::invalid("config", e.to_string())
    }
}

impl From<logging::LoggingError> for ClinicError {
    fn from(e: logging::LoggingError) -> Self {
        ClinicError::invalid("logging", e.to_string())
    }
}

impl From<serde_json::Error> for ClinicError {
    fn from(e: serde_json::Error) -> Self {
        ClinicError::Persistence {
            message: format!("Serialization error: {}", e),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ClinicError::Persistence {
            message: format!("Lock poisoned: {}", e),
        }
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a ledger database at the given path.
#[uniffi::export]
pub fn open_ledger(path: String) -> Result<Arc<ClinicLedger>, ClinicError> {
    let db = Database::open(&path)?;
    Ok(ClinicLedger::wrap(db, LedgerConfig::default()))
}

/// Create an in-memory ledger (for testing).
#[uniffi::export]
pub fn open_ledger_in_memory() -> Result<Arc<ClinicLedger>, ClinicError> {
    let db = Database::open_in_memory()?;
    Ok(ClinicLedger::wrap(db, LedgerConfig::default()))
}

/// Open the ledger described by a TOML configuration file.
///
/// Environment overrides apply; without a database path the ledger is
/// in-memory.
#[uniffi::export]
pub fn open_ledger_with_config(config_path: String) -> Result<Arc<ClinicLedger>, ClinicError> {
    let config = LedgerConfig::load(&config_path)?;
    let db = match &config.database.path {
        Some(path) => Database::open(path)?,
        None => Database::open_in_memory()?,
    };
    tracing::info!(config = %config_path, "Ledger opened from configuration");
    Ok(ClinicLedger::wrap(db, config))
}

/// Install the stderr log subscriber. Call at most once per process.
#[uniffi::export]
pub fn init_logging(level: String, json: bool) -> Result<(), ClinicError> {
    logging::init_logging(&config::LoggingConfig { level, json })?;
    Ok(())
}

/// Install the stderr log subscriber described by the `[logging]` table of
/// a TOML file, after environment overrides.
#[uniffi::export]
pub fn init_logging_from_config(config_path: String) -> Result<(), ClinicError> {
    let config = LedgerConfig::load(&config_path)?;
    logging::init_logging(&config.logging)?;
    Ok(())
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe ledger wrapper for FFI.
#[derive(uniffi::Object)]
pub struct ClinicLedger {
    db: Arc<Mutex<Database>>,
    config: LedgerConfig,
}

impl ClinicLedger {
    fn wrap(db: Database, config: LedgerConfig) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            config,
        })
    }
}

#[uniffi::export]
impl ClinicLedger {
    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Register a new patient.
    pub fn create_patient(&self, patient: FfiNewPatient) -> Result<FfiPatient, ClinicError> {
        let input = patient.try_into()?;
        let db = self.db.lock()?;
        let created = PatientRegistry::new(&*db).create(input)?;
        Ok(created.into())
    }

    /// Update profile fields; unset fields are left as they are.
    pub fn update_patient(
        &self,
        id: String,
        update: FfiPatientUpdate,
    ) -> Result<FfiPatient, ClinicError> {
        let update = update.try_into()?;
        let db = self.db.lock()?;
        let updated = PatientRegistry::new(&*db).update(&id, update)?;
        Ok(updated.into())
    }

    /// Delete a patient without consultations.
    pub fn delete_patient(&self, id: String) -> Result<(), ClinicError> {
        let db = self.db.lock()?;
        PatientRegistry::new(&*db).delete(&id)?;
        Ok(())
    }

    pub fn get_patient(&self, id: String) -> Result<FfiPatient, ClinicError> {
        let db = self.db.lock()?;
        Ok(PatientRegistry::new(&*db).get(&id)?.into())
    }

    /// List patients (sort keys: name, createdAt, credits).
    pub fn list_patients(&self, query: FfiListQuery) -> Result<FfiPatientPage, ClinicError> {
        let db = self.db.lock()?;
        let page = PatientRegistry::with_listing(&*db, self.config.listing.clone())
            .list_raw(&query.into())?;
        let page = page.map(FfiPatient::from);
        Ok(FfiPatientPage {
            info: FfiPageInfo::of(&page),
            items: page.items,
        })
    }

    // =========================================================================
    // Credit Operations
    // =========================================================================

    /// Sell prepaid consultation credits at the patient's current price.
    pub fn sell_credits(
        &self,
        patient_id: String,
        quantity: u32,
        unit_price: String,
    ) -> Result<FfiCreditSale, ClinicError> {
        let unit_price = parse_money("unitPrice", &unit_price)?;
        let db = self.db.lock()?;
        let sale = CreditLedger::with_pricing(&*db, self.config.pricing.clone())
            .sell(&patient_id, quantity, unit_price)?;
        Ok(sale.into())
    }

    /// Credit movements of one patient, oldest first.
    pub fn credit_history(&self, patient_id: String) -> Result<Vec<FfiJournalEntry>, ClinicError> {
        let db = self.db.lock()?;
        let entries = CreditLedger::new(&*db).history(&patient_id)?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    /// Check the credit journal's hash chain.
    pub fn verify_journal(&self) -> Result<FfiJournalVerification, ClinicError> {
        let db = self.db.lock()?;
        let verification = CreditLedger::new(&*db).verify_journal()?;
        Ok(FfiJournalVerification {
            entries: verification.entries as u64,
            valid: verification.valid,
            first_invalid_seq: verification.first_invalid_seq,
        })
    }

    // =========================================================================
    // Consultation Operations
    // =========================================================================

    /// Open a consultation; `price` overrides the patient's current price.
    pub fn create_consultation(
        &self,
        patient_id: String,
        price: Option<String>,
    ) -> Result<FfiConsultationWithPatient, ClinicError> {
        let price = price
            .as_deref()
            .map(|raw| parse_money("price", raw))
            .transpose()?;
        let db = self.db.lock()?;
        let created = ConsultationLifecycle::new(&*db).create(&patient_id, price)?;
        Ok(created.into())
    }

    pub fn finalize_consultation(&self, id: String) -> Result<FfiConsultation, ClinicError> {
        let db = self.db.lock()?;
        Ok(ConsultationLifecycle::new(&*db).finalize(&id)?.into())
    }

    pub fn pay_consultation(&self, id: String) -> Result<FfiConsultation, ClinicError> {
        let db = self.db.lock()?;
        Ok(ConsultationLifecycle::new(&*db).pay(&id)?.into())
    }

    /// Edit content/notes from a JSON object such as `{"notes": "..."}`.
    pub fn update_consultation(
        &self,
        id: String,
        patch_json: String,
    ) -> Result<FfiConsultation, ClinicError> {
        let db = self.db.lock()?;
        Ok(ConsultationLifecycle::new(&*db)
            .update_json(&id, &patch_json)?
            .into())
    }

    pub fn delete_consultation(&self, id: String) -> Result<(), ClinicError> {
        let db = self.db.lock()?;
        ConsultationLifecycle::new(&*db).delete(&id)?;
        Ok(())
    }

    pub fn get_consultation(&self, id: String) -> Result<FfiConsultationWithPatient, ClinicError> {
        let db = self.db.lock()?;
        Ok(ConsultationLifecycle::new(&*db).get(&id)?.into())
    }

    /// List consultations (sort keys: startedAt, finishedAt, price).
    pub fn list_consultations(
        &self,
        query: FfiListQuery,
        filter: FfiConsultationFilter,
    ) -> Result<FfiConsultationPage, ClinicError> {
        let db = self.db.lock()?;
        let page = ConsultationLifecycle::with_listing(&*db, self.config.listing.clone())
            .list_raw(&query.into(), &filter.into())?;
        let page = page.map(FfiConsultationWithPatient::from);
        Ok(FfiConsultationPage {
            info: FfiPageInfo::of(&page),
            items: page.items,
        })
    }

    // =========================================================================
    // Financial Operations
    // =========================================================================

    pub fn patient_financial_data(
        &self,
        patient_id: String,
    ) -> Result<Option<FfiFinancialSummary>, ClinicError> {
        let db = self.db.lock()?;
        let summary = FinancialAggregator::new(&*db).patient_financial_data(&patient_id)?;
        Ok(summary.map(Into::into))
    }

    /// Financial overview (sort keys: name, paymentDeficit,
    /// totalConsultations, availableCredits).
    pub fn financial_overview(&self, query: FfiListQuery) -> Result<FfiFinancialPage, ClinicError> {
        let db = self.db.lock()?;
        let page = FinancialAggregator::with_listing(&*db, self.config.listing.clone())
            .financial_overview_raw(&query.into())?;
        let page = page.map(FfiFinancialSummary::from);
        Ok(FfiFinancialPage {
            info: FfiPageInfo::of(&page),
            items: page.items,
        })
    }

    // =========================================================================
    // Export Operations
    // =========================================================================

    /// Export the financial report as JSON.
    pub fn export_report_json(&self) -> Result<String, ClinicError> {
        let db = self.db.lock()?;
        let report = ReportExporter::new(&*db).export_all()?;
        Ok(report.to_json()?)
    }

    /// Export the financial report as CSV.
    pub fn export_report_csv(&self) -> Result<String, ClinicError> {
        let db = self.db.lock()?;
        let report = ReportExporter::new(&*db).export_all()?;
        Ok(report.to_csv())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

fn parse_money(field: &str, raw: &str) -> Result<Decimal, ClinicError> {
    Decimal::from_str(raw.trim())
        .map_err(|_| ClinicError::invalid(field, format!("invalid amount '{}'", raw)))
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ClinicError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ClinicError::invalid(field, format!("invalid date '{}': expected YYYY-MM-DD", raw)))
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value)
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub name: String,
    /// YYYY-MM-DD
    pub birth_date: Option<String>,
    pub photo: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub consultation_price: Option<String>,
    pub credits: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            id: patient.id,
            name: patient.name,
            birth_date: patient.birth_date.map(|d| d.to_string()),
            photo: patient.photo,
            phone: patient.phone,
            email: patient.email,
            notes: patient.notes,
            consultation_price: patient.consultation_price.map(money),
            credits: patient.credits,
            created_at: timestamp(patient.created_at),
            updated_at: timestamp(patient.updated_at),
        }
    }
}

/// FFI-safe patient registration input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewPatient {
    pub name: String,
    pub birth_date: Option<String>,
    pub photo: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub consultation_price: Option<String>,
}

impl TryFrom<FfiNewPatient> for NewPatient {
    type Error = ClinicError;

    fn try_from(input: FfiNewPatient) -> Result<Self, Self::Error> {
        Ok(NewPatient {
            name: input.name,
            birth_date: input
                .birth_date
                .as_deref()
                .map(|raw| parse_date("birthDate", raw))
                .transpose()?,
            photo: input.photo,
            phone: input.phone,
            email: input.email,
            notes: input.notes,
            consultation_price: input
                .consultation_price
                .as_deref()
                .map(|raw| parse_money("consultationPrice", raw))
                .transpose()?,
        })
    }
}

/// FFI-safe patient profile update.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatientUpdate {
    pub name: Option<String>,
    pub birth_date: Option<String>,
    pub photo: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub consultation_price: Option<String>,
}

impl TryFrom<FfiPatientUpdate> for PatientUpdate {
    type Error = ClinicError;

    fn try_from(input: FfiPatientUpdate) -> Result<Self, Self::Error> {
        Ok(PatientUpdate {
            name: input.name,
            birth_date: input
                .birth_date
                .as_deref()
                .map(|raw| parse_date("birthDate", raw))
                .transpose()?,
            photo: input.photo,
            phone: input.phone,
            email: input.email,
            notes: input.notes,
            consultation_price: input
                .consultation_price
                .as_deref()
                .map(|raw| parse_money("consultationPrice", raw))
                .transpose()?,
        })
    }
}

/// FFI-safe patient projection.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatientSummary {
    pub id: String,
    pub name: String,
    pub photo: Option<String>,
    pub birth_date: Option<String>,
}

impl From<PatientSummary> for FfiPatientSummary {
    fn from(summary: PatientSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            photo: summary.photo,
            birth_date: summary.birth_date.map(|d| d.to_string()),
        }
    }
}

/// FFI-safe consultation.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiConsultation {
    pub id: String,
    pub patient_id: String,
    /// "OPEN" or "FINALIZED"
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub price: String,
    pub paid: bool,
    pub paid_at: Option<String>,
    pub content: String,
    pub notes: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Consultation> for FfiConsultation {
    fn from(c: Consultation) -> Self {
        Self {
            id: c.id,
            patient_id: c.patient_id,
            status: c.status.as_str().to_string(),
            started_at: timestamp(c.started_at),
            finished_at: c.finished_at.map(timestamp),
            price: money(c.price),
            paid: c.paid,
            paid_at: c.paid_at.map(timestamp),
            content: c.content,
            notes: c.notes,
            created_at: timestamp(c.created_at),
            updated_at: timestamp(c.updated_at),
        }
    }
}

/// FFI-safe consultation joined with its patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiConsultationWithPatient {
    pub consultation: FfiConsultation,
    pub patient: FfiPatientSummary,
}

impl From<ConsultationWithPatient> for FfiConsultationWithPatient {
    fn from(joined: ConsultationWithPatient) -> Self {
        Self {
            consultation: joined.consultation.into(),
            patient: joined.patient.into(),
        }
    }
}

/// FFI-safe credit sale result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCreditSale {
    pub patient_id: String,
    pub quantity: u32,
    pub unit_price: String,
    pub total_cost: String,
    pub new_balance: i64,
    pub entry_id: String,
}

impl From<CreditSale> for FfiCreditSale {
    fn from(sale: CreditSale) -> Self {
        Self {
            patient_id: sale.patient_id,
            quantity: sale.quantity,
            unit_price: money(sale.unit_price),
            total_cost: money(sale.total_cost),
            new_balance: sale.new_balance,
            entry_id: sale.entry_id,
        }
    }
}

/// FFI-safe credit journal entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiJournalEntry {
    pub seq: i64,
    pub entry_id: String,
    pub patient_id: String,
    /// "SALE" or "CONSUMPTION"
    pub kind: String,
    pub quantity: i64,
    pub balance_after: i64,
    pub unit_price: Option<String>,
    pub consultation_id: Option<String>,
    pub recorded_at: String,
    pub hash: String,
}

impl From<CreditJournalEntry> for FfiJournalEntry {
    fn from(entry: CreditJournalEntry) -> Self {
        Self {
            seq: entry.seq,
            entry_id: entry.entry_id,
            patient_id: entry.patient_id,
            kind: entry.kind.as_str().to_string(),
            quantity: entry.quantity,
            balance_after: entry.balance_after,
            unit_price: entry.unit_price.map(money),
            consultation_id: entry.consultation_id,
            recorded_at: timestamp(entry.recorded_at),
            hash: entry.hash,
        }
    }
}

/// FFI-safe journal verification result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiJournalVerification {
    pub entries: u64,
    pub valid: bool,
    pub first_invalid_seq: Option<i64>,
}

/// FFI-safe financial summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFinancialSummary {
    pub patient_id: String,
    pub name: String,
    pub photo: Option<String>,
    pub age: Option<u32>,
    pub consultation_price: Option<String>,
    pub total_consultations: u64,
    pub paid_consultations: u64,
    pub payment_deficit: u64,
    pub has_payment_issues: bool,
    pub available_credits: i64,
}

impl From<FinancialSummary> for FfiFinancialSummary {
    fn from(summary: FinancialSummary) -> Self {
        Self {
            patient_id: summary.patient_id,
            name: summary.name,
            photo: summary.photo,
            age: summary.age,
            consultation_price: summary.consultation_price.map(money),
            total_consultations: summary.total_consultations,
            paid_consultations: summary.paid_consultations,
            payment_deficit: summary.payment_deficit,
            has_payment_issues: summary.has_payment_issues,
            available_credits: summary.available_credits,
        }
    }
}

/// Listing parameters exactly as the caller received them.
#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub search: Option<String>,
}

impl From<FfiListQuery> for RawListQuery {
    fn from(query: FfiListQuery) -> Self {
        RawListQuery {
            page: query.page,
            limit: query.limit,
            sort_by: query.sort_by,
            sort_order: query.sort_order,
            search: query.search,
        }
    }
}

#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiConsultationFilter {
    pub patient_id: Option<String>,
    pub status: Option<String>,
    pub paid: Option<String>,
}

impl From<FfiConsultationFilter> for RawConsultationFilter {
    fn from(filter: FfiConsultationFilter) -> Self {
        RawConsultationFilter {
            patient_id: filter.patient_id,
            status: filter.status,
            paid: filter.paid,
        }
    }
}

/// Pagination metadata shared by every page type.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPageInfo {
    pub total_count: u64,
    pub total_pages: u64,
    pub current_page: u32,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl FfiPageInfo {
    fn of<T>(page: &Page<T>) -> Self {
        Self {
            total_count: page.total_count,
            total_pages: page.total_pages,
            current_page: page.current_page,
            has_next_page: page.has_next_page,
            has_previous_page: page.has_previous_page,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatientPage {
    pub items: Vec<FfiPatient>,
    pub info: FfiPageInfo,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiConsultationPage {
    pub items: Vec<FfiConsultationWithPatient>,
    pub info: FfiPageInfo,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFinancialPage {
    pub items: Vec<FfiFinancialSummary>,
    pub info: FfiPageInfo,
}
