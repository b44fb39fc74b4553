//! Credit journal models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a patient's credit balance moved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditMovementKind {
    /// Credits bought by the patient
    Sale,
    /// One credit spent to open a consultation
    Consumption,
}

impl CreditMovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditMovementKind::Sale => "SALE",
            CreditMovementKind::Consumption => "CONSUMPTION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SALE" => Some(CreditMovementKind::Sale),
            "CONSUMPTION" => Some(CreditMovementKind::Consumption),
            _ => None,
        }
    }
}

/// One append-only journal entry, chained to its predecessor by hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditJournalEntry {
    /// Storage sequence number (0 until appended)
    pub seq: i64,
    pub entry_id: String,
    pub patient_id: String,
    pub kind: CreditMovementKind,
    /// Credits moved (always positive; direction comes from `kind`)
    pub quantity: i64,
    /// Balance right after this movement
    pub balance_after: i64,
    /// Unit price for sales
    pub unit_price: Option<Decimal>,
    /// Consultation that consumed the credit
    pub consultation_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    /// Hash of the previous entry (None for the first entry)
    pub prev_hash: Option<String>,
    /// SHA-256 over this entry's content and `prev_hash`
    pub hash: String,
}

impl CreditJournalEntry {
    /// Signed change to the balance.
    pub fn delta(&self) -> i64 {
        match self.kind {
            CreditMovementKind::Sale => self.quantity,
            CreditMovementKind::Consumption => -self.quantity,
        }
    }

    /// Canonical text that gets hashed. Field order is fixed and prices
    /// always carry two decimals, matching what storage returns.
    pub fn canonical_payload(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.prev_hash.as_deref().unwrap_or(""),
            self.entry_id,
            self.patient_id,
            self.kind.as_str(),
            self.quantity,
            self.balance_after,
            self.unit_price.map(|p| format!("{:.2}", p)).unwrap_or_default(),
            self.consultation_id.as_deref().unwrap_or(""),
            self.recorded_at
                .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        )
    }
}
