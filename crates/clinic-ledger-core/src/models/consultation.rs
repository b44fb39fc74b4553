//! Consultation models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::patient::PatientSummary;

/// Consultation status. Payment is tracked separately.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsultationStatus {
    /// Session in progress; at most one per patient
    Open,
    /// Session closed; `finished_at` is set
    Finalized,
}

impl ConsultationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStatus::Open => "OPEN",
            ConsultationStatus::Finalized => "FINALIZED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(ConsultationStatus::Open),
            "FINALIZED" => Some(ConsultationStatus::Finalized),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A clinical session billed against a patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consultation {
    /// Unique consultation ID
    pub id: String,
    /// Owning patient
    pub patient_id: String,
    pub status: ConsultationStatus,
    /// Set at creation, never changed
    pub started_at: DateTime<Utc>,
    /// Set once, at finalization
    pub finished_at: Option<DateTime<Utc>>,
    /// Price snapshot taken at creation
    pub price: Decimal,
    pub paid: bool,
    /// Set once, when `paid` flips to true
    pub paid_at: Option<DateTime<Utc>>,
    /// Clinical content (rich text rendered by the shell)
    pub content: String,
    /// Private notes
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consultation {
    /// Open a new consultation at `now`.
    ///
    /// A prepaid consultation (one covered by a credit) starts out paid.
    pub fn open(patient_id: String, price: Decimal, prepaid: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            status: ConsultationStatus::Open,
            started_at: now,
            finished_at: None,
            price,
            paid: prepaid,
            paid_at: prepaid.then_some(now),
            content: String::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ConsultationStatus::Open
    }

    /// Only consultations created by mistake (still open, never paid) may be deleted.
    pub fn is_deletable(&self) -> bool {
        self.is_open() && !self.paid
    }

    /// Close the session. Returns false if it was already finalized.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = ConsultationStatus::Finalized;
        self.finished_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Record a direct payment. Returns false if it was already paid.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> bool {
        if self.paid {
            return false;
        }
        self.paid = true;
        self.paid_at = Some(now);
        self.updated_at = now;
        true
    }
}

/// A consultation joined with its patient's projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsultationWithPatient {
    #[serde(flatten)]
    pub consultation: Consultation,
    pub patient: PatientSummary,
}

/// Editable consultation fields.
///
/// Parsed from caller-supplied JSON; unknown keys (including immutable ones
/// such as `price` or `status`) are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConsultationPatch {
    pub content: Option<String>,
    pub notes: Option<String>,
}

impl ConsultationPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.notes.is_none()
    }

    /// Apply the patch. Allowed regardless of status.
    pub fn apply(self, consultation: &mut Consultation, now: DateTime<Utc>) {
        if let Some(content) = self.content {
            consultation.content = content;
        }
        if let Some(notes) = self.notes {
            consultation.notes = notes;
        }
        consultation.updated_at = now;
    }
}
