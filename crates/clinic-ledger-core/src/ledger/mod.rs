//! Credit ledger: prepaid consultation balances.
//!
//! A balance goes up through [`CreditLedger::sell`] and down by exactly one
//! when a consultation is opened for a patient who has credits. There is no
//! public debit: a credit can only be spent together with the consultation
//! that consumes it, inside that consultation's transaction.

mod journal;

pub use journal::{hash_data, hash_entry, verify_chain, JournalVerification};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PricingConfig;
use crate::error::{require_id, LedgerError, LedgerResult, StoreContext};
use crate::models::{CreditJournalEntry, CreditMovementKind};
use crate::store::{LedgerStore, Transactional};

use journal::Movement;

/// Result of a credit sale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditSale {
    pub patient_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// `quantity * unit_price`
    pub total_cost: Decimal,
    pub new_balance: i64,
    /// Journal entry recording the sale
    pub entry_id: String,
}

/// Credit ledger operations.
pub struct CreditLedger<'a, S: Transactional> {
    store: &'a S,
    pricing: PricingConfig,
}

impl<'a, S: Transactional> CreditLedger<'a, S> {
    /// Create a ledger with default pricing settings.
    pub fn new(store: &'a S) -> Self {
        Self::with_pricing(store, PricingConfig::default())
    }

    pub fn with_pricing(store: &'a S, pricing: PricingConfig) -> Self {
        Self { store, pricing }
    }

    /// Sell `quantity` consultation credits at `unit_price`.
    ///
    /// The quoted price must match the patient's current consultation price
    /// (within the configured tolerance), so a sale priced from a stale
    /// profile is refused rather than silently repriced.
    pub fn sell(&self, patient_id: &str, quantity: u32, unit_price: Decimal) -> LedgerResult<CreditSale> {
        require_id("patientId", patient_id)?;
        if quantity < 1 {
            return Err(LedgerError::invalid_field(
                "quantity",
                "quantity must be at least 1",
            ));
        }
        validate_price("unitPrice", unit_price)?;

        let sale = self.store.atomically(|tx| {
            let patient = tx
                .get_patient(patient_id)
                .context("failed to load patient")?
                .ok_or_else(|| LedgerError::not_found("patient", patient_id))?;

            let current_price = patient.billable_price().ok_or_else(|| {
                LedgerError::business_rule("consultation price must be set before selling credits")
            })?;

            if (unit_price - current_price).abs() > self.pricing.price_tolerance {
                warn!(
                    patient_id,
                    %unit_price,
                    %current_price,
                    "Credit sale refused: price mismatch"
                );
                return Err(LedgerError::business_rule(format!(
                    "unit price {} does not match the current consultation price {}",
                    unit_price, current_price
                )));
            }

            let new_balance = tx
                .adjust_credits(patient_id, i64::from(quantity))
                .context("failed to sell credits")?
                .ok_or_else(|| LedgerError::not_found("patient", patient_id))?;

            let entry = journal::record(
                tx,
                Movement {
                    patient_id,
                    kind: CreditMovementKind::Sale,
                    quantity: i64::from(quantity),
                    balance_after: new_balance,
                    unit_price: Some(unit_price),
                    consultation_id: None,
                    recorded_at: Utc::now(),
                },
            )
            .context("failed to record credit sale")?;

            Ok(CreditSale {
                patient_id: patient_id.to_string(),
                quantity,
                unit_price,
                total_cost: unit_price * Decimal::from(quantity),
                new_balance,
                entry_id: entry.entry_id,
            })
        })?;

        info!(
            patient_id,
            quantity,
            total_cost = %sale.total_cost,
            new_balance = sale.new_balance,
            "Credits sold"
        );
        Ok(sale)
    }

    /// Journal entries for one patient, oldest first.
    pub fn history(&self, patient_id: &str) -> LedgerResult<Vec<CreditJournalEntry>> {
        require_id("patientId", patient_id)?;
        self.store
            .store()
            .list_patient_journal(patient_id)
            .context("failed to load credit history")
    }

    /// Re-walk the whole journal and check its hash chain.
    pub fn verify_journal(&self) -> LedgerResult<JournalVerification> {
        let entries = self
            .store
            .store()
            .list_journal_entries()
            .context("failed to load credit journal")?;
        let verification = verify_chain(&entries);
        if !verification.valid {
            warn!(
                first_invalid_seq = ?verification.first_invalid_seq,
                "Credit journal failed verification"
            );
        }
        Ok(verification)
    }
}

/// Spend one credit for `consultation_id`.
///
/// Only the consultation lifecycle calls this, with the transaction that
/// inserts the consultation.
pub(crate) fn consume_credit(
    tx: &dyn LedgerStore,
    patient_id: &str,
    consultation_id: &str,
    now: DateTime<Utc>,
) -> LedgerResult<i64> {
    let new_balance = match tx.adjust_credits(patient_id, -1) {
        Ok(Some(balance)) => balance,
        Ok(None) => return Err(LedgerError::not_found("patient", patient_id)),
        Err(e) if e.is_conflict() => {
            return Err(LedgerError::business_rule("patient has no credits to consume"))
        }
        Err(e) => {
            return Err(LedgerError::Persistence {
                context: "failed to consume credit".to_string(),
                source: e,
            })
        }
    };

    journal::record(
        tx,
        Movement {
            patient_id,
            kind: CreditMovementKind::Consumption,
            quantity: 1,
            balance_after: new_balance,
            unit_price: None,
            consultation_id: Some(consultation_id),
            recorded_at: now,
        },
    )
    .context("failed to record credit consumption")?;

    Ok(new_balance)
}

/// Prices are positive, carry at most two decimal places and fit in
/// integer cents.
pub(crate) fn validate_price(field: &str, price: Decimal) -> LedgerResult<()> {
    if price <= Decimal::ZERO {
        return Err(LedgerError::invalid_field(
            field,
            format!("{} must be greater than zero", field),
        ));
    }
    if price > max_price() {
        return Err(LedgerError::invalid_field(
            field,
            format!("{} is too large", field),
        ));
    }
    if price.round_dp(2) != price {
        return Err(LedgerError::invalid_field(
            field,
            format!("{} must have at most two decimal places", field),
        ));
    }
    Ok(())
}

/// Largest price whose cent amount still fits an `i64` column.
fn max_price() -> Decimal {
    Decimal::from(i64::MAX) / Decimal::ONE_HUNDRED
}
