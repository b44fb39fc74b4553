//! Per-patient financial figures and the paginated overview.
//!
//! Both the single-patient view and the overview build their rows with
//! [`FinancialSummary::from_totals`], so the same patient always reports the
//! same numbers in either place.

use chrono::{NaiveDate, Utc};
use tracing::debug;

use crate::config::ListingConfig;
use crate::error::{require_id, LedgerResult, StoreContext};
use crate::listing::{FinancialSort, ListQuery, Page, RawListQuery};
use crate::models::{FinancialSummary, PatientTotals};
use crate::store::Transactional;

/// Read-only financial aggregation.
pub struct FinancialAggregator<'a, S: Transactional> {
    store: &'a S,
    listing: ListingConfig,
    as_of: Option<NaiveDate>,
}

impl<'a, S: Transactional> FinancialAggregator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self::with_listing(store, ListingConfig::default())
    }

    pub fn with_listing(store: &'a S, listing: ListingConfig) -> Self {
        Self {
            store,
            listing,
            as_of: None,
        }
    }

    /// Compute ages on a fixed day instead of today.
    pub fn as_of(mut self, day: NaiveDate) -> Self {
        self.as_of = Some(day);
        self
    }

    fn today(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Financial summary of one patient, or `None` if there is no such patient.
    pub fn patient_financial_data(&self, patient_id: &str) -> LedgerResult<Option<FinancialSummary>> {
        require_id("patientId", patient_id)?;

        // One read transaction so the patient row and its counts agree.
        let totals = self.store.read_consistent(|tx| -> LedgerResult<_> {
            let patient = match tx.get_patient(patient_id).context("failed to load patient")? {
                Some(patient) => patient,
                None => return Ok(None),
            };
            let consultations = tx
                .list_patient_consultations(patient_id)
                .context("failed to load consultations")?;

            Ok(Some(PatientTotals {
                patient,
                total_consultations: consultations.len() as u64,
                paid_consultations: consultations.iter().filter(|c| c.paid).count() as u64,
            }))
        })?;

        Ok(totals.map(|totals| FinancialSummary::from_totals(&totals, self.today())))
    }

    /// Sorted, searchable page of financial summaries.
    pub fn financial_overview(
        &self,
        query: &ListQuery<FinancialSort>,
    ) -> LedgerResult<Page<FinancialSummary>> {
        let (totals, count) = self.store.read_consistent(|tx| -> LedgerResult<_> {
            let count = tx
                .count_patients(query.search.as_deref())
                .context("failed to count patients")?;
            let totals = tx
                .list_patient_totals(query)
                .context("failed to load financial overview")?;
            Ok((totals, count))
        })?;

        debug!(
            page = query.page,
            rows = totals.len(),
            total = count,
            "Financial overview loaded"
        );

        let today = self.today();
        let items = totals
            .iter()
            .map(|totals| FinancialSummary::from_totals(totals, today))
            .collect();
        Ok(Page::new(items, count, query.page, query.limit))
    }

    pub fn financial_overview_raw(&self, query: &RawListQuery) -> LedgerResult<Page<FinancialSummary>> {
        let query = query.parse::<FinancialSort>(self.listing.default_limit)?;
        self.financial_overview(&query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::ErrorKind;
    use crate::lifecycle::ConsultationLifecycle;
    use crate::listing::SortOrder;
    use crate::models::Patient;
    use crate::store::PatientStore;
    use rust_decimal_macros::dec;

    fn patient(db: &Database, name: &str) -> Patient {
        let mut patient = Patient::new(name.into());
        patient.consultation_price = Some(dec!(100));
        patient.birth_date = NaiveDate::from_ymd_opt(1990, 6, 15);
        db.store().insert_patient(&patient).unwrap();
        patient
    }

    #[test]
    fn test_missing_patient_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(FinancialAggregator::new(&db)
            .patient_financial_data("missing")
            .unwrap()
            .is_none());
        assert_eq!(
            FinancialAggregator::new(&db)
                .patient_financial_data("")
                .unwrap_err()
                .kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_deficit_and_age() {
        let db = Database::open_in_memory().unwrap();
        let p = patient(&db, "Dora");
        let lifecycle = ConsultationLifecycle::new(&db);

        let first = lifecycle.create(&p.id, None).unwrap().consultation;
        lifecycle.pay(&first.id).unwrap();
        lifecycle.finalize(&first.id).unwrap();
        lifecycle.create(&p.id, None).unwrap();

        let summary = FinancialAggregator::new(&db)
            .as_of(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap())
            .patient_financial_data(&p.id)
            .unwrap()
            .unwrap();
        assert_eq!(summary.total_consultations, 2);
        assert_eq!(summary.paid_consultations, 1);
        assert_eq!(summary.payment_deficit, 1);
        assert!(summary.has_payment_issues);
        assert_eq!(summary.age, Some(33));
        assert_eq!(summary.outstanding_estimate(), Some(dec!(100)));
    }

    #[test]
    fn test_overview_matches_single_view() {
        let db = Database::open_in_memory().unwrap();
        let lifecycle = ConsultationLifecycle::new(&db);
        for name in ["Ana", "Bea", "Caio"] {
            let p = patient(&db, name);
            lifecycle.create(&p.id, None).unwrap();
        }

        let aggregator = FinancialAggregator::new(&db);
        let query = ListQuery::<FinancialSort>::new(1, 10)
            .unwrap()
            .sorted(FinancialSort::PaymentDeficit, SortOrder::Desc);
        let page = aggregator.financial_overview(&query).unwrap();
        assert_eq!(page.total_count, 3);

        for row in &page.items {
            let single = aggregator.patient_financial_data(&row.patient_id).unwrap().unwrap();
            assert_eq!(&single, row);
        }
    }

    #[test]
    fn test_reads_proceed_while_a_writer_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinic.db");
        let db = Database::open(&path).unwrap();
        let p = patient(&db, "Gil");

        let writer = rusqlite::Connection::open(&path).unwrap();
        writer.execute_batch("BEGIN IMMEDIATE").unwrap();

        let aggregator = FinancialAggregator::new(&db);
        let summary = aggregator.patient_financial_data(&p.id).unwrap().unwrap();
        assert_eq!(summary.patient_id, p.id);
        let page = aggregator
            .financial_overview(&ListQuery::new(1, 10).unwrap())
            .unwrap();
        assert_eq!(page.total_count, 1);

        writer.execute_batch("ROLLBACK").unwrap();
    }

    #[test]
    fn test_overview_rejects_unknown_sort() {
        let db = Database::open_in_memory().unwrap();
        let raw = RawListQuery {
            sort_by: Some("age".into()),
            ..Default::default()
        };
        let err = FinancialAggregator::new(&db).financial_overview_raw(&raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("paymentDeficit"));
    }
}
