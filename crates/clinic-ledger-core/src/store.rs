//! Persistence abstractions consumed by the ledger core.
//!
//! The core only sees these traits. [`crate::db::Database`] is the SQLite
//! implementation; anything else offering the same capabilities (CRUD,
//! filtered/sorted/paginated reads, atomic multi-write execution) can stand
//! in for it.

use thiserror::Error;

use crate::listing::{ConsultationFilter, ConsultationSort, FinancialSort, ListQuery, PatientSort};
use crate::models::{
    Consultation, ConsultationWithPatient, CreditJournalEntry, Patient, PatientTotals,
};

/// Store-level failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend itself failed (I/O, locking, SQL)
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A uniqueness or check constraint rejected the write
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A stored value could not be mapped back into a model
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Patient persistence.
pub trait PatientStore {
    fn get_patient(&self, id: &str) -> StoreResult<Option<Patient>>;

    fn insert_patient(&self, patient: &Patient) -> StoreResult<()>;

    /// Persist profile fields. The credit balance is never written here.
    /// Returns false if no such patient exists.
    fn update_patient_profile(&self, patient: &Patient) -> StoreResult<bool>;

    /// Returns false if no such patient exists.
    fn delete_patient(&self, id: &str) -> StoreResult<bool>;

    /// Add `delta` to the balance only if the result stays non-negative.
    ///
    /// Returns the new balance, or `None` if the patient does not exist.
    /// A change that would go negative fails with [`StoreError::Conflict`].
    fn adjust_credits(&self, id: &str, delta: i64) -> StoreResult<Option<i64>>;

    fn list_patients(&self, query: &ListQuery<PatientSort>) -> StoreResult<Vec<Patient>>;

    fn count_patients(&self, search: Option<&str>) -> StoreResult<u64>;

    /// Patients with consultation counts, sorted and paginated.
    fn list_patient_totals(&self, query: &ListQuery<FinancialSort>)
        -> StoreResult<Vec<PatientTotals>>;
}

/// Consultation persistence.
pub trait ConsultationStore {
    fn get_consultation(&self, id: &str) -> StoreResult<Option<Consultation>>;

    /// The patient's OPEN consultation, if any.
    fn find_open_consultation(&self, patient_id: &str) -> StoreResult<Option<Consultation>>;

    /// Insert a consultation. A second OPEN consultation for the same
    /// patient fails with [`StoreError::Conflict`].
    fn insert_consultation(&self, consultation: &Consultation) -> StoreResult<()>;

    /// Persist mutable fields (status, finished_at, paid, paid_at, content,
    /// notes). Returns false if no such consultation exists.
    fn update_consultation(&self, consultation: &Consultation) -> StoreResult<bool>;

    /// Returns false if no such consultation exists.
    fn delete_consultation(&self, id: &str) -> StoreResult<bool>;

    fn list_consultations(
        &self,
        query: &ListQuery<ConsultationSort>,
        filter: &ConsultationFilter,
    ) -> StoreResult<Vec<ConsultationWithPatient>>;

    fn count_consultations(
        &self,
        filter: &ConsultationFilter,
        search: Option<&str>,
    ) -> StoreResult<u64>;

    /// All consultations of one patient, oldest first.
    fn list_patient_consultations(&self, patient_id: &str) -> StoreResult<Vec<Consultation>>;
}

/// Append-only credit journal persistence.
pub trait JournalStore {
    /// Append an entry; returns its sequence number.
    fn append_journal_entry(&self, entry: &CreditJournalEntry) -> StoreResult<i64>;

    /// Hash of the most recent entry, if any.
    fn last_journal_hash(&self) -> StoreResult<Option<String>>;

    /// Every entry in sequence order.
    fn list_journal_entries(&self) -> StoreResult<Vec<CreditJournalEntry>>;

    fn list_patient_journal(&self, patient_id: &str) -> StoreResult<Vec<CreditJournalEntry>>;
}

/// Everything the ledger core reads and writes.
pub trait LedgerStore: PatientStore + ConsultationStore + JournalStore {}

impl<T: PatientStore + ConsultationStore + JournalStore + ?Sized> LedgerStore for T {}

/// Atomic execution of several writes.
pub trait Transactional {
    /// Non-transactional view for reads.
    fn store(&self) -> &dyn LedgerStore;

    /// Run `work` inside one transaction.
    ///
    /// Commits if `work` returns `Ok`; rolls back on `Err`, so none of its
    /// writes become visible.
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerStore) -> Result<T, E>,
        E: From<StoreError>;

    /// Run read-only `work` against one consistent view without taking the
    /// write lock. Stores without snapshots read directly.
    fn read_consistent<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerStore) -> Result<T, E>,
        E: From<StoreError>,
    {
        work(self.store())
    }
}
