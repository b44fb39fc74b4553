//! Patient database operations.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{cents_to_price, price_to_cents};
use crate::listing::{like_pattern, FinancialSort, ListQuery, PatientSort};
use crate::models::{Patient, PatientTotals};
use crate::store::{PatientStore, StoreError, StoreResult};

const PATIENT_COLUMNS: &str = r#"
    p.id, p.name, p.birth_date, p.photo, p.phone, p.email, p.notes,
    p.consultation_price_cents, p.credits, p.created_at, p.updated_at
"#;

/// Map a row starting with [`PATIENT_COLUMNS`] at `offset`.
pub(super) fn patient_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Patient> {
    let price_cents: Option<i64> = row.get(offset + 7)?;
    Ok(Patient {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        birth_date: row.get(offset + 2)?,
        photo: row.get(offset + 3)?,
        phone: row.get(offset + 4)?,
        email: row.get(offset + 5)?,
        notes: row.get(offset + 6)?,
        consultation_price: price_cents.map(cents_to_price),
        credits: row.get(offset + 8)?,
        created_at: row.get(offset + 9)?,
        updated_at: row.get(offset + 10)?,
    })
}

fn patient_order_by(sort: PatientSort) -> &'static str {
    match sort {
        PatientSort::Name => "p.name COLLATE NOCASE",
        PatientSort::CreatedAt => "p.created_at",
        PatientSort::Credits => "p.credits",
    }
}

fn financial_order_by(sort: FinancialSort) -> &'static str {
    match sort {
        FinancialSort::Name => "p.name COLLATE NOCASE",
        FinancialSort::PaymentDeficit => "(COALESCE(t.total, 0) - COALESCE(t.paid, 0))",
        FinancialSort::TotalConsultations => "COALESCE(t.total, 0)",
        FinancialSort::AvailableCredits => "p.credits",
    }
}

fn optional_cents(price: Option<rust_decimal::Decimal>) -> StoreResult<Option<i64>> {
    price.map(price_to_cents).transpose()
}

impl PatientStore for Connection {
    fn get_patient(&self, id: &str) -> StoreResult<Option<Patient>> {
        let sql = format!("SELECT {} FROM patients p WHERE p.id = ?", PATIENT_COLUMNS);
        self.query_row(&sql, [id], |row| patient_from_row(row, 0))
            .optional()
            .map_err(Into::into)
    }

    fn insert_patient(&self, patient: &Patient) -> StoreResult<()> {
        self.execute(
            r#"
            INSERT INTO patients (
                id, name, name_search, birth_date, photo, phone, email, notes,
                consultation_price_cents, credits, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                patient.id,
                patient.name,
                patient.name.to_lowercase(),
                patient.birth_date,
                patient.photo,
                patient.phone,
                patient.email,
                patient.notes,
                optional_cents(patient.consultation_price)?,
                patient.credits,
                patient.created_at,
                patient.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update_patient_profile(&self, patient: &Patient) -> StoreResult<bool> {
        let rows_affected = self.execute(
            r#"
            UPDATE patients SET
                name = ?2,
                name_search = ?3,
                birth_date = ?4,
                photo = ?5,
                phone = ?6,
                email = ?7,
                notes = ?8,
                consultation_price_cents = ?9,
                updated_at = ?10
            WHERE id = ?1
            "#,
            params![
                patient.id,
                patient.name,
                patient.name.to_lowercase(),
                patient.birth_date,
                patient.photo,
                patient.phone,
                patient.email,
                patient.notes,
                optional_cents(patient.consultation_price)?,
                patient.updated_at,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    fn delete_patient(&self, id: &str) -> StoreResult<bool> {
        let rows_affected = self.execute("DELETE FROM patients WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    fn adjust_credits(&self, id: &str, delta: i64) -> StoreResult<Option<i64>> {
        let rows_affected = self.execute(
            r#"
            UPDATE patients SET
                credits = credits + ?2,
                updated_at = ?3
            WHERE id = ?1 AND credits + ?2 >= 0
            "#,
            params![id, delta, Utc::now()],
        )?;

        let balance: Option<i64> = self
            .query_row("SELECT credits FROM patients WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?;

        match balance {
            None => Ok(None),
            Some(_) if rows_affected == 0 => Err(StoreError::Conflict(format!(
                "credit balance of patient {} cannot go below zero",
                id
            ))),
            Some(balance) => Ok(Some(balance)),
        }
    }

    fn list_patients(&self, query: &ListQuery<PatientSort>) -> StoreResult<Vec<Patient>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM patients p
            WHERE (?1 IS NULL OR p.name_search LIKE ?1 ESCAPE '\')
            ORDER BY {} {}, p.id ASC
            LIMIT ?2 OFFSET ?3
            "#,
            PATIENT_COLUMNS,
            patient_order_by(query.sort_by),
            query.sort_order.as_sql(),
        );
        let pattern = query.search.as_deref().map(like_pattern);

        let mut stmt = self.prepare(&sql)?;
        let rows = stmt.query_map(
            params![pattern, i64::from(query.limit), query.offset() as i64],
            |row| patient_from_row(row, 0),
        )?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn count_patients(&self, search: Option<&str>) -> StoreResult<u64> {
        let pattern = search.map(like_pattern);
        let count: i64 = self.query_row(
            r#"
            SELECT COUNT(*) FROM patients p
            WHERE (?1 IS NULL OR p.name_search LIKE ?1 ESCAPE '\')
            "#,
            params![pattern],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn list_patient_totals(
        &self,
        query: &ListQuery<FinancialSort>,
    ) -> StoreResult<Vec<PatientTotals>> {
        let sql = format!(
            r#"
            SELECT {}, COALESCE(t.total, 0), COALESCE(t.paid, 0)
            FROM patients p
            LEFT JOIN (
                SELECT patient_id, COUNT(*) AS total, SUM(paid) AS paid
                FROM consultations
                GROUP BY patient_id
            ) t ON t.patient_id = p.id
            WHERE (?1 IS NULL OR p.name_search LIKE ?1 ESCAPE '\')
            ORDER BY {} {}, p.id ASC
            LIMIT ?2 OFFSET ?3
            "#,
            PATIENT_COLUMNS,
            financial_order_by(query.sort_by),
            query.sort_order.as_sql(),
        );
        let pattern = query.search.as_deref().map(like_pattern);

        let mut stmt = self.prepare(&sql)?;
        let rows = stmt.query_map(
            params![pattern, i64::from(query.limit), query.offset() as i64],
            |row| {
                let total: i64 = row.get(11)?;
                let paid: i64 = row.get(12)?;
                Ok(PatientTotals {
                    patient: patient_from_row(row, 0)?,
                    total_consultations: total as u64,
                    paid_consultations: paid as u64,
                })
            },
        )?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
