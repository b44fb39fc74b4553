//! Consultation database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{cents_to_price, price_to_cents};
use crate::listing::{like_pattern, ConsultationFilter, ConsultationSort, ListQuery};
use crate::models::{Consultation, ConsultationStatus, ConsultationWithPatient, PatientSummary};
use crate::store::{ConsultationStore, StoreError, StoreResult};

const CONSULTATION_COLUMNS: &str = r#"
    c.id, c.patient_id, c.status, c.started_at, c.finished_at, c.price_cents,
    c.paid, c.paid_at, c.content, c.notes, c.created_at, c.updated_at
"#;

const FILTER_CLAUSE: &str = r#"
    (?1 IS NULL OR c.patient_id = ?1)
    AND (?2 IS NULL OR c.status = ?2)
    AND (?3 IS NULL OR c.paid = ?3)
    AND (?4 IS NULL OR p.name_search LIKE ?4 ESCAPE '\')
"#;

/// Intermediate row struct for database mapping.
struct ConsultationRow {
    id: String,
    patient_id: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    price_cents: i64,
    paid: bool,
    paid_at: Option<DateTime<Utc>>,
    content: String,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConsultationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            finished_at: row.get(4)?,
            price_cents: row.get(5)?,
            paid: row.get(6)?,
            paid_at: row.get(7)?,
            content: row.get(8)?,
            notes: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl TryFrom<ConsultationRow> for Consultation {
    type Error = StoreError;

    fn try_from(row: ConsultationRow) -> Result<Self, Self::Error> {
        let status = ConsultationStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown consultation status: {}", row.status))
        })?;

        Ok(Consultation {
            id: row.id,
            patient_id: row.patient_id,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            price: cents_to_price(row.price_cents),
            paid: row.paid,
            paid_at: row.paid_at,
            content: row.content,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Patient projection columns follow the consultation columns.
fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<PatientSummary> {
    let birth_date: Option<NaiveDate> = row.get(15)?;
    Ok(PatientSummary {
        id: row.get(12)?,
        name: row.get(13)?,
        photo: row.get(14)?,
        birth_date,
    })
}

fn consultation_order_by(sort: ConsultationSort) -> &'static str {
    match sort {
        ConsultationSort::StartedAt => "c.started_at",
        ConsultationSort::FinishedAt => "c.finished_at",
        ConsultationSort::Price => "c.price_cents",
    }
}

fn collect_consultations(
    rows: impl Iterator<Item = rusqlite::Result<ConsultationRow>>,
) -> StoreResult<Vec<Consultation>> {
    let mut consultations = Vec::new();
    for row in rows {
        consultations.push(row?.try_into()?);
    }
    Ok(consultations)
}

impl ConsultationStore for Connection {
    fn get_consultation(&self, id: &str) -> StoreResult<Option<Consultation>> {
        let sql = format!("SELECT {} FROM consultations c WHERE c.id = ?", CONSULTATION_COLUMNS);
        self.query_row(&sql, [id], ConsultationRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    fn find_open_consultation(&self, patient_id: &str) -> StoreResult<Option<Consultation>> {
        let sql = format!(
            "SELECT {} FROM consultations c WHERE c.patient_id = ? AND c.status = 'OPEN'",
            CONSULTATION_COLUMNS
        );
        self.query_row(&sql, [patient_id], ConsultationRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    fn insert_consultation(&self, consultation: &Consultation) -> StoreResult<()> {
        self.execute(
            r#"
            INSERT INTO consultations (
                id, patient_id, status, started_at, finished_at, price_cents,
                paid, paid_at, content, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                consultation.id,
                consultation.patient_id,
                consultation.status.as_str(),
                consultation.started_at,
                consultation.finished_at,
                price_to_cents(consultation.price)?,
                consultation.paid,
                consultation.paid_at,
                consultation.content,
                consultation.notes,
                consultation.created_at,
                consultation.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update_consultation(&self, consultation: &Consultation) -> StoreResult<bool> {
        let rows_affected = self.execute(
            r#"
            UPDATE consultations SET
                status = ?2,
                finished_at = ?3,
                paid = ?4,
                paid_at = ?5,
                content = ?6,
                notes = ?7,
                updated_at = ?8
            WHERE id = ?1
            "#,
            params![
                consultation.id,
                consultation.status.as_str(),
                consultation.finished_at,
                consultation.paid,
                consultation.paid_at,
                consultation.content,
                consultation.notes,
                consultation.updated_at,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    fn delete_consultation(&self, id: &str) -> StoreResult<bool> {
        let rows_affected = self.execute("DELETE FROM consultations WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    fn list_consultations(
        &self,
        query: &ListQuery<ConsultationSort>,
        filter: &ConsultationFilter,
    ) -> StoreResult<Vec<ConsultationWithPatient>> {
        let sql = format!(
            r#"
            SELECT {}, p.id, p.name, p.photo, p.birth_date
            FROM consultations c
            JOIN patients p ON p.id = c.patient_id
            WHERE {}
            ORDER BY {} {}, c.id ASC
            LIMIT ?5 OFFSET ?6
            "#,
            CONSULTATION_COLUMNS,
            FILTER_CLAUSE,
            consultation_order_by(query.sort_by),
            query.sort_order.as_sql(),
        );
        let pattern = query.search.as_deref().map(like_pattern);

        let mut stmt = self.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.patient_id,
                filter.status.map(|s| s.as_str()),
                filter.paid,
                pattern,
                i64::from(query.limit),
                query.offset() as i64,
            ],
            |row| Ok((ConsultationRow::from_row(row)?, summary_from_row(row)?)),
        )?;

        let mut items = Vec::new();
        for row in rows {
            let (consultation, patient) = row?;
            items.push(ConsultationWithPatient {
                consultation: consultation.try_into()?,
                patient,
            });
        }
        Ok(items)
    }

    fn count_consultations(
        &self,
        filter: &ConsultationFilter,
        search: Option<&str>,
    ) -> StoreResult<u64> {
        let sql = format!(
            r#"
            SELECT COUNT(*)
            FROM consultations c
            JOIN patients p ON p.id = c.patient_id
            WHERE {}
            "#,
            FILTER_CLAUSE
        );
        let pattern = search.map(like_pattern);
        let count: i64 = self.query_row(
            &sql,
            params![
                filter.patient_id,
                filter.status.map(|s| s.as_str()),
                filter.paid,
                pattern,
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn list_patient_consultations(&self, patient_id: &str) -> StoreResult<Vec<Consultation>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM consultations c
            WHERE c.patient_id = ?
            ORDER BY c.started_at ASC, c.id ASC
            "#,
            CONSULTATION_COLUMNS
        );
        let mut stmt = self.prepare(&sql)?;
        let rows = stmt.query_map([patient_id], ConsultationRow::from_row)?;
        collect_consultations(rows)
    }
}
