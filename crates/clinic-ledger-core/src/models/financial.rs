//! Derived per-patient financial figures.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::patient::Patient;

/// Raw consultation counts for one patient, as read from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientTotals {
    pub patient: Patient,
    pub total_consultations: u64,
    pub paid_consultations: u64,
}

/// Financial view of a patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialSummary {
    pub patient_id: String,
    pub name: String,
    pub photo: Option<String>,
    pub birth_date: Option<NaiveDate>,
    /// Derived from `birth_date` when the summary is built
    pub age: Option<u32>,
    pub consultation_price: Option<Decimal>,
    pub total_consultations: u64,
    pub paid_consultations: u64,
    /// Consultations not yet paid; never negative since paid ⊆ total
    pub payment_deficit: u64,
    pub has_payment_issues: bool,
    pub available_credits: i64,
}

impl FinancialSummary {
    /// Build a summary from counts. Every read path goes through here.
    pub fn from_totals(totals: &PatientTotals, today: NaiveDate) -> Self {
        let patient = &totals.patient;
        let payment_deficit = totals
            .total_consultations
            .saturating_sub(totals.paid_consultations);

        Self {
            patient_id: patient.id.clone(),
            name: patient.name.clone(),
            photo: patient.photo.clone(),
            birth_date: patient.birth_date,
            age: patient.age_on(today),
            consultation_price: patient.consultation_price,
            total_consultations: totals.total_consultations,
            paid_consultations: totals.paid_consultations,
            payment_deficit,
            has_payment_issues: payment_deficit > 0,
            available_credits: patient.credits,
        }
    }

    /// Amount owed for unpaid consultations at the current price, if priced.
    pub fn outstanding_estimate(&self) -> Option<Decimal> {
        self.consultation_price
            .map(|price| price * Decimal::from(self.payment_deficit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn totals(total: u64, paid: u64) -> PatientTotals {
        PatientTotals {
            patient: Patient::new("Bruno".into()),
            total_consultations: total,
            paid_consultations: paid,
        }
    }

    #[test]
    fn test_no_consultations() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let summary = FinancialSummary::from_totals(&totals(0, 0), today);
        assert_eq!(summary.payment_deficit, 0);
        assert!(!summary.has_payment_issues);
    }

    #[test]
    fn test_deficit_flags_issue() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let summary = FinancialSummary::from_totals(&totals(5, 3), today);
        assert_eq!(summary.payment_deficit, 2);
        assert!(summary.has_payment_issues);
    }

    #[test]
    fn test_outstanding_estimate() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut t = totals(4, 1);
        t.patient.consultation_price = Some(dec!(120.50));
        let summary = FinancialSummary::from_totals(&t, today);
        assert_eq!(summary.outstanding_estimate(), Some(dec!(361.50)));
    }
}
