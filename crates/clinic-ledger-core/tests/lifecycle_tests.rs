//! Consultation lifecycle integration tests.

use std::cell::Cell;

use chrono::Utc;
use clinic_ledger_core::db::{Database, SCHEMA};
use clinic_ledger_core::listing::{
    ConsultationFilter, ConsultationSort, ListQuery, PatientSort, SortOrder,
};
use clinic_ledger_core::models::{
    Consultation, ConsultationStatus, ConsultationWithPatient, CreditJournalEntry, NewPatient,
    Patient, PatientTotals,
};
use clinic_ledger_core::store::{
    ConsultationStore, JournalStore, LedgerStore, PatientStore, StoreError, StoreResult,
    Transactional,
};
use clinic_ledger_core::{
    ConsultationLifecycle, CreditLedger, ErrorKind, FinancialAggregator, PatientRegistry,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use rusqlite::Connection;

fn register(db: &Database, name: &str, price: Option<Decimal>) -> Patient {
    PatientRegistry::new(db)
        .create(NewPatient {
            name: name.to_string(),
            consultation_price: price,
            ..Default::default()
        })
        .unwrap()
}

fn credits(db: &Database, patient_id: &str) -> i64 {
    PatientRegistry::new(db).get(patient_id).unwrap().credits
}

#[test]
fn test_open_finalize_pay_scenario() {
    let db = Database::open_in_memory().unwrap();
    let patient = register(&db, "Marta", Some(dec!(100)));
    let lifecycle = ConsultationLifecycle::new(&db);

    let created = lifecycle.create(&patient.id, None).unwrap().consultation;
    assert_eq!(created.status, ConsultationStatus::Open);
    assert!(!created.paid);
    assert!(created.paid_at.is_none());
    assert_eq!(created.price, dec!(100));
    assert_eq!(created.content, "");
    assert_eq!(created.notes, "");

    let before = Utc::now();
    let finalized = lifecycle.finalize(&created.id).unwrap();
    let after = Utc::now();
    assert_eq!(finalized.status, ConsultationStatus::Finalized);
    let finished_at = finalized.finished_at.unwrap();
    assert!(finished_at >= before && finished_at <= after);

    let before = Utc::now();
    let paid = lifecycle.pay(&created.id).unwrap();
    let after = Utc::now();
    assert!(paid.paid);
    let paid_at = paid.paid_at.unwrap();
    assert!(paid_at >= before && paid_at <= after);
    assert_eq!(paid.status, ConsultationStatus::Finalized);
    assert_eq!(paid.finished_at, Some(finished_at));

    // Persisted state matches what the calls returned
    let stored = lifecycle.get(&created.id).unwrap().consultation;
    assert_eq!(stored.status, ConsultationStatus::Finalized);
    assert!(stored.paid);
    assert_eq!(stored.price, dec!(100));
}

#[test]
fn test_explicit_price_with_credits_scenario() {
    let db = Database::open_in_memory().unwrap();
    let patient = register(&db, "Nina", Some(dec!(120)));
    CreditLedger::new(&db).sell(&patient.id, 3, dec!(120)).unwrap();

    let created = ConsultationLifecycle::new(&db)
        .create(&patient.id, Some(dec!(80)))
        .unwrap()
        .consultation;

    assert_eq!(created.price, dec!(80));
    assert!(created.paid);
    assert!(created.paid_at.is_some());
    assert_eq!(credits(&db, &patient.id), 2);
}

#[test]
fn test_delete_scenario() {
    let db = Database::open_in_memory().unwrap();
    let patient = register(&db, "Otto", Some(dec!(100)));
    let lifecycle = ConsultationLifecycle::new(&db);

    let done = lifecycle.create(&patient.id, None).unwrap().consultation;
    lifecycle.finalize(&done.id).unwrap();
    lifecycle.pay(&done.id).unwrap();
    let err = lifecycle.delete(&done.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessRule);
    assert_eq!(err.status_code(), 409);

    let fresh = lifecycle.create(&patient.id, None).unwrap().consultation;
    lifecycle.delete(&fresh.id).unwrap();
    assert_eq!(lifecycle.get(&fresh.id).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_zero_credits_leave_balance_alone() {
    let db = Database::open_in_memory().unwrap();
    let patient = register(&db, "Pia", Some(dec!(100)));

    let created = ConsultationLifecycle::new(&db).create(&patient.id, None).unwrap();
    assert!(!created.consultation.paid);
    assert_eq!(credits(&db, &patient.id), 0);
    assert!(CreditLedger::new(&db).history(&patient.id).unwrap().is_empty());
}

#[test]
fn test_credits_run_out_one_per_consultation() {
    let db = Database::open_in_memory().unwrap();
    let patient = register(&db, "Rui", Some(dec!(90)));
    CreditLedger::new(&db).sell(&patient.id, 2, dec!(90)).unwrap();
    let lifecycle = ConsultationLifecycle::new(&db);

    let mut paid_flags = Vec::new();
    for _ in 0..3 {
        let c = lifecycle.create(&patient.id, None).unwrap().consultation;
        paid_flags.push(c.paid);
        lifecycle.finalize(&c.id).unwrap();
    }

    assert_eq!(paid_flags, vec![true, true, false]);
    assert_eq!(credits(&db, &patient.id), 0);

    let summary = FinancialAggregator::new(&db)
        .patient_financial_data(&patient.id)
        .unwrap()
        .unwrap();
    assert_eq!(summary.total_consultations, 3);
    assert_eq!(summary.payment_deficit, 1);

    let verification = CreditLedger::new(&db).verify_journal().unwrap();
    assert!(verification.valid);
    assert_eq!(verification.entries, 3);
}

#[test]
fn test_finalizing_one_does_not_touch_another() {
    let db = Database::open_in_memory().unwrap();
    let a = register(&db, "Ana", Some(dec!(100)));
    let b = register(&db, "Bia", Some(dec!(150)));
    let lifecycle = ConsultationLifecycle::new(&db);

    let ca = lifecycle.create(&a.id, None).unwrap().consultation;
    let cb = lifecycle.create(&b.id, None).unwrap().consultation;
    lifecycle
        .update_json(&cb.id, r#"{"content": "x", "notes": "y"}"#)
        .unwrap();

    lifecycle.finalize(&ca.id).unwrap();

    let cb_after = lifecycle.get(&cb.id).unwrap().consultation;
    assert_eq!(cb_after.status, ConsultationStatus::Open);
    assert_eq!(cb_after.content, "x");
    assert_eq!(cb_after.notes, "y");
    assert_eq!(cb_after.price, dec!(150));
}

#[test]
fn test_listing_filters_and_search() {
    let db = Database::open_in_memory().unwrap();
    let lifecycle = ConsultationLifecycle::new(&db);
    let joao = register(&db, "João Ávila", Some(dec!(100)));
    let maria = register(&db, "Maria_50%", Some(dec!(200)));

    let c1 = lifecycle.create(&joao.id, None).unwrap().consultation;
    lifecycle.finalize(&c1.id).unwrap();
    lifecycle.pay(&c1.id).unwrap();
    lifecycle.create(&joao.id, None).unwrap();
    lifecycle.create(&maria.id, None).unwrap();

    let query = ListQuery::<ConsultationSort>::new(1, 10).unwrap();
    let all = lifecycle.list(&query, &ConsultationFilter::default()).unwrap();
    assert_eq!(all.total_count, 3);

    let open_unpaid = ConsultationFilter::default()
        .with_status(ConsultationStatus::Open)
        .with_paid(false);
    assert_eq!(lifecycle.list(&query, &open_unpaid).unwrap().total_count, 2);

    let joao_only = lifecycle
        .list(&query, &ConsultationFilter::for_patient(joao.id.clone()))
        .unwrap();
    assert_eq!(joao_only.total_count, 2);

    // Non-ASCII, case-insensitive
    let page = lifecycle
        .list(&query.clone().with_search("ÁVILA"), &ConsultationFilter::default())
        .unwrap();
    assert_eq!(page.total_count, 2);
    assert!(page.items.iter().all(|c| c.patient.id == joao.id));

    // Wildcards are literal
    let page = lifecycle
        .list(&query.clone().with_search("_50%"), &ConsultationFilter::default())
        .unwrap();
    assert_eq!(page.total_count, 1);
    let page = lifecycle
        .list(&query.with_search("%"), &ConsultationFilter::default())
        .unwrap();
    assert_eq!(page.total_count, 1);

    let by_price = ListQuery::<ConsultationSort>::new(1, 10)
        .unwrap()
        .sorted(ConsultationSort::Price, SortOrder::Desc);
    let page = lifecycle.list(&by_price, &ConsultationFilter::default()).unwrap();
    let prices: Vec<Decimal> = page.items.iter().map(|c| c.consultation.price).collect();
    assert_eq!(prices, vec![dec!(200), dec!(100), dec!(100)]);
}

#[test]
fn test_pages_partition_the_result() {
    let db = Database::open_in_memory().unwrap();
    let registry = PatientRegistry::new(&db);
    for i in 0..7 {
        register(&db, &format!("Patient {}", i), None);
    }

    let mut seen = Vec::new();
    for page_no in 1..=3 {
        let query = ListQuery::<PatientSort>::new(page_no, 3).unwrap();
        let page = registry.list(&query).unwrap();
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.has_previous_page, page_no > 1);
        assert_eq!(page.has_next_page, page_no < 3);
        seen.extend(page.items.into_iter().map(|p| p.name));
    }

    assert_eq!(seen.len(), 7);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
}

// =========================================================================
// Store seam: a store that counts consultation inserts and can hide
// open consultations from the pre-insert lookup
// =========================================================================

struct SpyStore {
    conn: Connection,
    inserts: Cell<usize>,
    hide_open: bool,
}

impl SpyStore {
    fn new() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        Self {
            conn,
            inserts: Cell::new(0),
            hide_open: false,
        }
    }

    /// A store whose open-consultation lookup always misses, so only the
    /// storage uniqueness rule stands between a caller and a second OPEN row.
    fn blind_to_open() -> Self {
        Self {
            hide_open: true,
            ..Self::new()
        }
    }
}

impl PatientStore for SpyStore {
    fn get_patient(&self, id: &str) -> StoreResult<Option<Patient>> {
        self.conn.get_patient(id)
    }
    fn insert_patient(&self, patient: &Patient) -> StoreResult<()> {
        self.conn.insert_patient(patient)
    }
    fn update_patient_profile(&self, patient: &Patient) -> StoreResult<bool> {
        self.conn.update_patient_profile(patient)
    }
    fn delete_patient(&self, id: &str) -> StoreResult<bool> {
        self.conn.delete_patient(id)
    }
    fn adjust_credits(&self, id: &str, delta: i64) -> StoreResult<Option<i64>> {
        self.conn.adjust_credits(id, delta)
    }
    fn list_patients(&self, query: &ListQuery<PatientSort>) -> StoreResult<Vec<Patient>> {
        self.conn.list_patients(query)
    }
    fn count_patients(&self, search: Option<&str>) -> StoreResult<u64> {
        self.conn.count_patients(search)
    }
    fn list_patient_totals(
        &self,
        query: &ListQuery<clinic_ledger_core::listing::FinancialSort>,
    ) -> StoreResult<Vec<PatientTotals>> {
        self.conn.list_patient_totals(query)
    }
}

impl ConsultationStore for SpyStore {
    fn get_consultation(&self, id: &str) -> StoreResult<Option<Consultation>> {
        self.conn.get_consultation(id)
    }
    fn find_open_consultation(&self, patient_id: &str) -> StoreResult<Option<Consultation>> {
        if self.hide_open {
            return Ok(None);
        }
        self.conn.find_open_consultation(patient_id)
    }
    fn insert_consultation(&self, consultation: &Consultation) -> StoreResult<()> {
        self.inserts.set(self.inserts.get() + 1);
        self.conn.insert_consultation(consultation)
    }
    fn update_consultation(&self, consultation: &Consultation) -> StoreResult<bool> {
        self.conn.update_consultation(consultation)
    }
    fn delete_consultation(&self, id: &str) -> StoreResult<bool> {
        self.conn.delete_consultation(id)
    }
    fn list_consultations(
        &self,
        query: &ListQuery<ConsultationSort>,
        filter: &ConsultationFilter,
    ) -> StoreResult<Vec<ConsultationWithPatient>> {
        self.conn.list_consultations(query, filter)
    }
    fn count_consultations(
        &self,
        filter: &ConsultationFilter,
        search: Option<&str>,
    ) -> StoreResult<u64> {
        self.conn.count_consultations(filter, search)
    }
    fn list_patient_consultations(&self, patient_id: &str) -> StoreResult<Vec<Consultation>> {
        self.conn.list_patient_consultations(patient_id)
    }
}

impl JournalStore for SpyStore {
    fn append_journal_entry(&self, entry: &CreditJournalEntry) -> StoreResult<i64> {
        self.conn.append_journal_entry(entry)
    }
    fn last_journal_hash(&self) -> StoreResult<Option<String>> {
        self.conn.last_journal_hash()
    }
    fn list_journal_entries(&self) -> StoreResult<Vec<CreditJournalEntry>> {
        self.conn.list_journal_entries()
    }
    fn list_patient_journal(&self, patient_id: &str) -> StoreResult<Vec<CreditJournalEntry>> {
        self.conn.list_patient_journal(patient_id)
    }
}

impl Transactional for SpyStore {
    fn store(&self) -> &dyn LedgerStore {
        self
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerStore) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::from)?;
        match work(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                self.conn
                    .execute_batch("ROLLBACK")
                    .map_err(StoreError::from)?;
                Err(e)
            }
        }
    }
}

#[test]
fn test_second_open_never_reaches_insert() {
    let store = SpyStore::new();
    let mut patient = Patient::new("Sofia".into());
    patient.consultation_price = Some(dec!(100));
    store.insert_patient(&patient).unwrap();

    let lifecycle = ConsultationLifecycle::new(&store);
    lifecycle.create(&patient.id, None).unwrap();
    assert_eq!(store.inserts.get(), 1);

    for price in [None, Some(dec!(10)), Some(dec!(999))] {
        let err = lifecycle.create(&patient.id, price).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
    }
    assert_eq!(store.inserts.get(), 1);
}

#[test]
fn test_failed_creation_rolls_back_through_any_store() {
    let store = SpyStore::new();
    let mut patient = Patient::new("Tito".into());
    patient.consultation_price = Some(dec!(100));
    store.insert_patient(&patient).unwrap();
    CreditLedger::new(&store).sell(&patient.id, 1, dec!(100)).unwrap();

    let lifecycle = ConsultationLifecycle::new(&store);
    let first = lifecycle.create(&patient.id, None).unwrap().consultation;
    assert!(first.paid);
    assert_eq!(store.get_patient(&patient.id).unwrap().unwrap().credits, 0);

    // Rejected creation leaves balance and journal untouched
    assert!(lifecycle.create(&patient.id, None).is_err());
    assert_eq!(store.get_patient(&patient.id).unwrap().unwrap().credits, 0);
    assert_eq!(store.list_journal_entries().unwrap().len(), 2);
}

#[test]
fn test_storage_uniqueness_rejects_second_open_and_keeps_credits() {
    let store = SpyStore::blind_to_open();
    let mut patient = Patient::new("Ugo".into());
    patient.consultation_price = Some(dec!(100));
    store.insert_patient(&patient).unwrap();
    CreditLedger::new(&store).sell(&patient.id, 2, dec!(100)).unwrap();

    let lifecycle = ConsultationLifecycle::new(&store);
    lifecycle.create(&patient.id, None).unwrap();
    assert_eq!(store.get_patient(&patient.id).unwrap().unwrap().credits, 1);

    let err = lifecycle.create(&patient.id, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessRule);
    assert_eq!(err.to_string(), "unfinalized consultation exists");
    assert_eq!(store.inserts.get(), 2);

    assert_eq!(store.get_patient(&patient.id).unwrap().unwrap().credits, 1);
    assert_eq!(store.list_journal_entries().unwrap().len(), 2);
    assert_eq!(store.list_patient_consultations(&patient.id).unwrap().len(), 1);
}
