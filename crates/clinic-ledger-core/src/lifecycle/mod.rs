//! Consultation lifecycle: create, finalize, pay, edit, delete.
//!
//! ```text
//!            create (credits > 0 ⇒ paid, one credit consumed)
//!                 │
//!                 ▼
//!   ┌──────── OPEN ────────┐
//!   │  pay      │ finalize │ delete (only if unpaid)
//!   ▼           ▼          ▼
//! OPEN+paid  FINALIZED   (gone)
//!   │ finalize  │ pay
//!   ▼           ▼
//!   FINALIZED + paid
//! ```
//!
//! Status and payment are independent axes. A patient has at most one OPEN
//! consultation at any time; the rule is checked inside the creating
//! transaction and backed by a unique index in storage.

use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::ListingConfig;
use crate::error::{require_id, LedgerError, LedgerResult, StoreContext};
use crate::ledger::{consume_credit, validate_price};
use crate::listing::{ConsultationFilter, ConsultationSort, ListQuery, Page, RawConsultationFilter, RawListQuery};
use crate::models::{Consultation, ConsultationPatch, ConsultationWithPatient};
use crate::store::{LedgerStore, Transactional};

/// Longest accepted clinical content, in characters.
pub const MAX_CONTENT_CHARS: usize = 100_000;

/// Longest accepted private notes, in characters.
pub const MAX_NOTES_CHARS: usize = 20_000;

/// Consultation state machine over a transactional store.
pub struct ConsultationLifecycle<'a, S: Transactional> {
    store: &'a S,
    listing: ListingConfig,
}

impl<'a, S: Transactional> ConsultationLifecycle<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self::with_listing(store, ListingConfig::default())
    }

    pub fn with_listing(store: &'a S, listing: ListingConfig) -> Self {
        Self { store, listing }
    }

    /// Open a consultation for `patient_id`.
    ///
    /// The price is `explicit_price` if given, else the patient's current
    /// consultation price. If the patient holds credits the consultation
    /// starts out paid and one credit is consumed in the same transaction.
    pub fn create(
        &self,
        patient_id: &str,
        explicit_price: Option<Decimal>,
    ) -> LedgerResult<ConsultationWithPatient> {
        require_id("patientId", patient_id)?;
        if let Some(price) = explicit_price {
            validate_price("price", price)?;
        }

        let created = self.store.atomically(|tx| {
            let patient = tx
                .get_patient(patient_id)
                .context("failed to load patient")?
                .ok_or_else(|| LedgerError::not_found("patient", patient_id))?;

            if let Some(open) = tx
                .find_open_consultation(patient_id)
                .context("failed to check open consultations")?
            {
                debug!(patient_id, open_id = %open.id, "Open consultation already exists");
                return Err(unfinalized_exists());
            }

            let price = explicit_price
                .or_else(|| patient.billable_price())
                .ok_or_else(|| LedgerError::business_rule("price must be set"))?;

            let now = Utc::now();
            let prepaid = patient.credits > 0;
            let consultation = Consultation::open(patient.id.clone(), price, prepaid, now);

            match tx.insert_consultation(&consultation) {
                Ok(()) => {}
                Err(e) if e.is_conflict() => return Err(unfinalized_exists()),
                Err(e) => {
                    return Err(LedgerError::Persistence {
                        context: "failed to create consultation".to_string(),
                        source: e,
                    })
                }
            }

            if prepaid {
                consume_credit(tx, patient_id, &consultation.id, now)?;
            }

            Ok(ConsultationWithPatient {
                consultation,
                patient: patient.summary(),
            })
        })?;

        info!(
            consultation_id = %created.consultation.id,
            patient_id,
            price = %created.consultation.price,
            prepaid = created.consultation.paid,
            "Consultation created"
        );
        Ok(created)
    }

    /// Close an OPEN consultation. Payment state is left alone.
    pub fn finalize(&self, id: &str) -> LedgerResult<Consultation> {
        require_id("id", id)?;

        let consultation = self.store.atomically(|tx| {
            let mut consultation = load(tx, id)?;
            if !consultation.finalize(Utc::now()) {
                return Err(LedgerError::business_rule("consultation is already finalized"));
            }
            save(tx, &consultation, "failed to finalize consultation")?;
            Ok(consultation)
        })?;

        info!(consultation_id = id, "Consultation finalized");
        Ok(consultation)
    }

    /// Record a direct payment. Status is left alone and no credit moves.
    pub fn pay(&self, id: &str) -> LedgerResult<Consultation> {
        require_id("id", id)?;

        let consultation = self.store.atomically(|tx| {
            let mut consultation = load(tx, id)?;
            if !consultation.mark_paid(Utc::now()) {
                return Err(LedgerError::business_rule("consultation is already paid"));
            }
            save(tx, &consultation, "failed to mark consultation as paid")?;
            Ok(consultation)
        })?;

        info!(consultation_id = id, "Consultation paid");
        Ok(consultation)
    }

    /// Edit content and notes. Allowed in any status.
    pub fn update(&self, id: &str, patch: ConsultationPatch) -> LedgerResult<Consultation> {
        require_id("id", id)?;
        validate_patch(&patch)?;

        let consultation = self.store.atomically(|tx| -> LedgerResult<_> {
            let mut consultation = load(tx, id)?;
            patch.apply(&mut consultation, Utc::now());
            save(tx, &consultation, "failed to update consultation")?;
            Ok(consultation)
        })?;

        debug!(consultation_id = id, "Consultation updated");
        Ok(consultation)
    }

    /// Edit from a JSON body. Keys other than `content` and `notes` are rejected.
    pub fn update_json(&self, id: &str, body: &str) -> LedgerResult<Consultation> {
        let patch: ConsultationPatch = serde_json::from_str(body).map_err(|e| {
            LedgerError::invalid_field("body", format!("invalid consultation update: {}", e))
        })?;
        self.update(id, patch)
    }

    /// Remove a consultation created by mistake: it must be OPEN and unpaid.
    pub fn delete(&self, id: &str) -> LedgerResult<()> {
        require_id("id", id)?;

        self.store.atomically(|tx| {
            let consultation = load(tx, id)?;
            if !consultation.is_deletable() {
                warn!(
                    consultation_id = id,
                    status = %consultation.status,
                    paid = consultation.paid,
                    "Refusing to delete consultation"
                );
                return Err(LedgerError::business_rule(
                    "only open, unpaid consultations can be deleted",
                ));
            }
            if !tx
                .delete_consultation(id)
                .context("failed to delete consultation")?
            {
                return Err(LedgerError::not_found("consultation", id));
            }
            Ok(())
        })?;

        info!(consultation_id = id, "Consultation deleted");
        Ok(())
    }

    /// One consultation with its patient summary.
    pub fn get(&self, id: &str) -> LedgerResult<ConsultationWithPatient> {
        require_id("id", id)?;
        let store = self.store.store();
        let consultation = load(store, id)?;
        let patient = store
            .get_patient(&consultation.patient_id)
            .context("failed to load patient")?
            .ok_or_else(|| LedgerError::not_found("patient", &consultation.patient_id))?;

        Ok(ConsultationWithPatient {
            consultation,
            patient: patient.summary(),
        })
    }

    /// Filtered, sorted page of consultations.
    pub fn list(
        &self,
        query: &ListQuery<ConsultationSort>,
        filter: &ConsultationFilter,
    ) -> LedgerResult<Page<ConsultationWithPatient>> {
        let store = self.store.store();
        let total = store
            .count_consultations(filter, query.search.as_deref())
            .context("failed to count consultations")?;
        let items = store
            .list_consultations(query, filter)
            .context("failed to list consultations")?;

        Ok(Page::new(items, total, query.page, query.limit))
    }

    /// Validate raw caller input, then list.
    pub fn list_raw(
        &self,
        query: &RawListQuery,
        filter: &RawConsultationFilter,
    ) -> LedgerResult<Page<ConsultationWithPatient>> {
        let query = query.parse::<ConsultationSort>(self.listing.default_limit)?;
        let filter = filter.parse()?;
        self.list(&query, &filter)
    }
}

fn unfinalized_exists() -> LedgerError {
    LedgerError::business_rule("unfinalized consultation exists")
}

fn load(store: &dyn LedgerStore, id: &str) -> LedgerResult<Consultation> {
    store
        .get_consultation(id)
        .context("failed to load consultation")?
        .ok_or_else(|| LedgerError::not_found("consultation", id))
}

fn save(store: &dyn LedgerStore, consultation: &Consultation, context: &str) -> LedgerResult<()> {
    if !store.update_consultation(consultation).context(context)? {
        return Err(LedgerError::not_found("consultation", &consultation.id));
    }
    Ok(())
}

fn validate_patch(patch: &ConsultationPatch) -> LedgerResult<()> {
    if patch.is_empty() {
        let mut fields = BTreeMap::new();
        fields.insert("content".to_string(), "nothing to update".to_string());
        fields.insert("notes".to_string(), "nothing to update".to_string());
        return Err(LedgerError::invalid_fields(
            "at least one of content, notes is required",
            fields,
        ));
    }

    let mut fields = BTreeMap::new();
    if let Some(content) = &patch.content {
        if content.chars().count() > MAX_CONTENT_CHARS {
            fields.insert(
                "content".to_string(),
                format!("content must be at most {} characters", MAX_CONTENT_CHARS),
            );
        }
    }
    if let Some(notes) = &patch.notes {
        if notes.chars().count() > MAX_NOTES_CHARS {
            fields.insert(
                "notes".to_string(),
                format!("notes must be at most {} characters", MAX_NOTES_CHARS),
            );
        }
    }

    if !fields.is_empty() {
        return Err(LedgerError::invalid_fields("invalid consultation update", fields));
    }
    Ok(())
}
