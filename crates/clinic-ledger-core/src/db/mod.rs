//! SQLite store for the clinic ledger.

mod consultations;
mod journal;
mod patients;
mod schema;

pub use schema::*;

use std::path::Path;

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::store::{LedgerStore, StoreError, StoreResult, Transactional};

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref failure, ref message)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(message.clone().unwrap_or_else(|| failure.to_string()))
            }
            other => StoreError::Backend(Box::new(other)),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(Box::new(e))
    }
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl Transactional for Database {
    fn store(&self) -> &dyn LedgerStore {
        &self.conn
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerStore) -> Result<T, E>,
        E: From<StoreError>,
    {
        // IMMEDIATE takes the write lock at BEGIN, so reads made inside `work`
        // cannot be invalidated by another writer before commit.
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let scope: &dyn LedgerStore = &*tx;
        let value = work(scope)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    fn read_consistent<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerStore) -> Result<T, E>,
        E: From<StoreError>,
    {
        // DEFERRED only takes a shared lock on first read, so a writer
        // holding the reserved lock does not block this.
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Deferred)
            .map_err(StoreError::from)?;
        let scope: &dyn LedgerStore = &*tx;
        let value = work(scope)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

/// Convert a two-decimal price into cents.
pub(crate) fn price_to_cents(price: Decimal) -> StoreResult<i64> {
    if price.round_dp(2) != price {
        return Err(StoreError::Corrupt(format!(
            "price {} has more than two decimal places",
            price
        )));
    }
    price
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| StoreError::Corrupt(format!("price {} out of range", price)))
}

pub(crate) fn cents_to_price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
