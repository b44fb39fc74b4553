//! Credit journal database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{cents_to_price, price_to_cents};
use crate::models::{CreditJournalEntry, CreditMovementKind};
use crate::store::{JournalStore, StoreError, StoreResult};

const JOURNAL_COLUMNS: &str = r#"
    seq, entry_id, patient_id, kind, quantity, balance_after,
    unit_price_cents, consultation_id, recorded_at, prev_hash, hash
"#;

/// Intermediate row struct for database mapping.
struct JournalRow {
    seq: i64,
    entry_id: String,
    patient_id: String,
    kind: String,
    quantity: i64,
    balance_after: i64,
    unit_price_cents: Option<i64>,
    consultation_id: Option<String>,
    recorded_at: DateTime<Utc>,
    prev_hash: Option<String>,
    hash: String,
}

impl JournalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            entry_id: row.get(1)?,
            patient_id: row.get(2)?,
            kind: row.get(3)?,
            quantity: row.get(4)?,
            balance_after: row.get(5)?,
            unit_price_cents: row.get(6)?,
            consultation_id: row.get(7)?,
            recorded_at: row.get(8)?,
            prev_hash: row.get(9)?,
            hash: row.get(10)?,
        })
    }
}

impl TryFrom<JournalRow> for CreditJournalEntry {
    type Error = StoreError;

    fn try_from(row: JournalRow) -> Result<Self, Self::Error> {
        let kind = CreditMovementKind::parse(&row.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown credit movement: {}", row.kind)))?;

        Ok(CreditJournalEntry {
            seq: row.seq,
            entry_id: row.entry_id,
            patient_id: row.patient_id,
            kind,
            quantity: row.quantity,
            balance_after: row.balance_after,
            unit_price: row.unit_price_cents.map(cents_to_price),
            consultation_id: row.consultation_id,
            recorded_at: row.recorded_at,
            prev_hash: row.prev_hash,
            hash: row.hash,
        })
    }
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<CreditJournalEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, JournalRow::from_row)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?.try_into()?);
    }
    Ok(entries)
}

impl JournalStore for Connection {
    fn append_journal_entry(&self, entry: &CreditJournalEntry) -> StoreResult<i64> {
        self.execute(
            r#"
            INSERT INTO credit_journal (
                entry_id, patient_id, kind, quantity, balance_after,
                unit_price_cents, consultation_id, recorded_at, prev_hash, hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                entry.entry_id,
                entry.patient_id,
                entry.kind.as_str(),
                entry.quantity,
                entry.balance_after,
                entry.unit_price.map(price_to_cents).transpose()?,
                entry.consultation_id,
                entry.recorded_at,
                entry.prev_hash,
                entry.hash,
            ],
        )?;
        Ok(self.last_insert_rowid())
    }

    fn last_journal_hash(&self) -> StoreResult<Option<String>> {
        self.query_row(
            "SELECT hash FROM credit_journal ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    fn list_journal_entries(&self) -> StoreResult<Vec<CreditJournalEntry>> {
        let sql = format!("SELECT {} FROM credit_journal ORDER BY seq ASC", JOURNAL_COLUMNS);
        query_entries(self, &sql, [])
    }

    fn list_patient_journal(&self, patient_id: &str) -> StoreResult<Vec<CreditJournalEntry>> {
        let sql = format!(
            "SELECT {} FROM credit_journal WHERE patient_id = ? ORDER BY seq ASC",
            JOURNAL_COLUMNS
        );
        query_entries(self, &sql, [patient_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::Transactional;
    use rust_decimal_macros::dec;

    fn entry(id: &str, patient: &str, prev: Option<&str>) -> CreditJournalEntry {
        CreditJournalEntry {
            seq: 0,
            entry_id: id.into(),
            patient_id: patient.into(),
            kind: CreditMovementKind::Sale,
            quantity: 2,
            balance_after: 2,
            unit_price: Some(dec!(75.50)),
            consultation_id: None,
            recorded_at: Utc::now(),
            prev_hash: prev.map(String::from),
            hash: format!("hash-{}", id),
        }
    }

    #[test]
    fn test_append_and_list() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.store().last_journal_hash().unwrap().is_none());

        let first = db.store().append_journal_entry(&entry("e1", "p1", None)).unwrap();
        let second = db
            .store()
            .append_journal_entry(&entry("e2", "p2", Some("hash-e1")))
            .unwrap();
        assert!(second > first);

        assert_eq!(db.store().last_journal_hash().unwrap().as_deref(), Some("hash-e2"));

        let all = db.store().list_journal_entries().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].unit_price, Some(dec!(75.50)));
        assert_eq!(all[1].prev_hash.as_deref(), Some("hash-e1"));

        let p2 = db.store().list_patient_journal("p2").unwrap();
        assert_eq!(p2.len(), 1);
        assert_eq!(p2[0].entry_id, "e2");
    }
}
