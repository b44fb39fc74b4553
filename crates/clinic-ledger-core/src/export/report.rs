//! Financial report export for bookkeeping.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LedgerResult, StoreContext};
use crate::finance::FinancialAggregator;
use crate::listing::{FinancialSort, ListQuery, SortOrder, MAX_PAGE_LIMIT};
use crate::models::FinancialSummary;
use crate::store::Transactional;

/// Every patient's financial summary plus clinic-wide totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialReport {
    /// Export timestamp
    pub exported_at: String,
    /// Hash of the latest credit journal entry, tying the report to the
    /// ledger state it was taken from
    pub journal_head: Option<String>,
    pub rows: Vec<FinancialSummary>,
    pub totals: ReportTotals,
}

/// Sums across all rows of a report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportTotals {
    pub patients: u64,
    pub total_consultations: u64,
    pub paid_consultations: u64,
    pub payment_deficit: u64,
    pub available_credits: i64,
    /// Unpaid consultations valued at each patient's current price
    pub outstanding_estimate: Decimal,
}

impl ReportTotals {
    fn from_rows(rows: &[FinancialSummary]) -> Self {
        rows.iter().fold(Self::default(), |mut totals, row| {
            totals.patients += 1;
            totals.total_consultations += row.total_consultations;
            totals.paid_consultations += row.paid_consultations;
            totals.payment_deficit += row.payment_deficit;
            totals.available_credits += row.available_credits;
            totals.outstanding_estimate += row.outstanding_estimate().unwrap_or_default();
            totals
        })
    }
}

impl FinancialReport {
    pub fn new(rows: Vec<FinancialSummary>, journal_head: Option<String>) -> Self {
        Self {
            exported_at: chrono::Utc::now().to_rfc3339(),
            journal_head,
            totals: ReportTotals::from_rows(&rows),
            rows,
        }
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV, one row per patient.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        // Header
        csv.push_str("patient_id,name,age,consultation_price,total_consultations,paid_consultations,payment_deficit,has_payment_issues,available_credits\n");

        for row in &self.rows {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{}\n",
                escape_csv(&row.patient_id),
                escape_csv(&row.name),
                row.age.map(|age| age.to_string()).unwrap_or_default(),
                row.consultation_price
                    .map(|price| format!("{:.2}", price))
                    .unwrap_or_default(),
                row.total_consultations,
                row.paid_consultations,
                row.payment_deficit,
                row.has_payment_issues,
                row.available_credits,
            ));
        }

        csv
    }
}

/// Builds reports by sweeping the financial overview page by page.
pub struct ReportExporter<'a, S: Transactional> {
    store: &'a S,
    as_of: Option<NaiveDate>,
}

impl<'a, S: Transactional> ReportExporter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, as_of: None }
    }

    /// Compute ages on a fixed day instead of today.
    pub fn as_of(mut self, day: NaiveDate) -> Self {
        self.as_of = Some(day);
        self
    }

    /// Report over every patient, ordered by name.
    pub fn export_all(&self) -> LedgerResult<FinancialReport> {
        let mut aggregator = FinancialAggregator::new(self.store);
        if let Some(day) = self.as_of {
            aggregator = aggregator.as_of(day);
        }

        let mut rows = Vec::new();
        let mut query = ListQuery::<FinancialSort>::new(1, MAX_PAGE_LIMIT)?
            .sorted(FinancialSort::Name, SortOrder::Asc);
        loop {
            let page = aggregator.financial_overview(&query)?;
            let more = page.has_next_page;
            rows.extend(page.items);
            if !more {
                break;
            }
            query.page += 1;
        }

        let journal_head = self
            .store
            .store()
            .last_journal_hash()
            .context("failed to read journal head")?;

        let report = FinancialReport::new(rows, journal_head);
        info!(
            patients = report.totals.patients,
            payment_deficit = report.totals.payment_deficit,
            "Financial report exported"
        );
        Ok(report)
    }
}

/// Escape a string for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
