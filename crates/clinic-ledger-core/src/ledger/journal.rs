//! Hash-chained credit journal.
//!
//! Every balance movement appends one entry whose hash covers its content
//! and the previous entry's hash, so editing or removing history breaks the
//! chain from that point on. Each entry's balance must also follow from the
//! same patient's previous entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{CreditJournalEntry, CreditMovementKind};
use crate::store::{LedgerStore, StoreResult};

/// Hash data using SHA-256.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash an entry as it would be stored.
pub fn hash_entry(entry: &CreditJournalEntry) -> String {
    hash_data(entry.canonical_payload().as_bytes())
}

/// A movement about to be journaled.
pub(crate) struct Movement<'a> {
    pub patient_id: &'a str,
    pub kind: CreditMovementKind,
    pub quantity: i64,
    pub balance_after: i64,
    pub unit_price: Option<Decimal>,
    pub consultation_id: Option<&'a str>,
    pub recorded_at: DateTime<Utc>,
}

/// Append a movement, chaining it to the current tail.
///
/// Must run inside the same transaction as the balance change it records.
pub(crate) fn record(store: &dyn LedgerStore, movement: Movement<'_>) -> StoreResult<CreditJournalEntry> {
    let prev_hash = store.last_journal_hash()?;

    let mut entry = CreditJournalEntry {
        seq: 0,
        entry_id: uuid::Uuid::new_v4().to_string(),
        patient_id: movement.patient_id.to_string(),
        kind: movement.kind,
        quantity: movement.quantity,
        balance_after: movement.balance_after,
        unit_price: movement.unit_price,
        consultation_id: movement.consultation_id.map(str::to_string),
        recorded_at: movement.recorded_at,
        prev_hash,
        hash: String::new(),
    };
    entry.hash = hash_entry(&entry);
    entry.seq = store.append_journal_entry(&entry)?;

    Ok(entry)
}

/// Outcome of re-walking the journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalVerification {
    pub entries: usize,
    pub valid: bool,
    /// First entry whose hash, back-link or running balance does not match
    pub first_invalid_seq: Option<i64>,
}

/// Recompute every hash, back-link and per-patient running balance, in
/// sequence order. Balances start at zero.
pub fn verify_chain(entries: &[CreditJournalEntry]) -> JournalVerification {
    let mut expected_prev: Option<&str> = None;
    let mut balances: HashMap<&str, i64> = HashMap::new();

    for entry in entries {
        let linked = entry.prev_hash.as_deref() == expected_prev;
        let previous = balances.get(entry.patient_id.as_str()).copied().unwrap_or(0);
        let balanced = previous.checked_add(entry.delta()) == Some(entry.balance_after);
        if !linked || !balanced || hash_entry(entry) != entry.hash {
            return JournalVerification {
                entries: entries.len(),
                valid: false,
                first_invalid_seq: Some(entry.seq),
            };
        }
        expected_prev = Some(entry.hash.as_str());
        balances.insert(entry.patient_id.as_str(), entry.balance_after);
    }

    JournalVerification {
        entries: entries.len(),
        valid: true,
        first_invalid_seq: None,
    }
}
