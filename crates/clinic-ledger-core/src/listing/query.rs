//! Page/limit/sort parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::error::{LedgerError, LedgerResult};

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// An allow-listed sort column for one resource.
pub trait SortKey: Copy + Eq + fmt::Debug + 'static {
    /// Every accepted key, in the order shown in error messages
    const ALL: &'static [Self];
    const DEFAULT: Self;
    const DEFAULT_ORDER: SortOrder;

    /// Name callers use (`sortBy=...`).
    fn name(&self) -> &'static str;

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.name() == s)
    }

    fn allowed() -> String {
        Self::ALL
            .iter()
            .map(|key| key.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Sort keys for patient listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientSort {
    Name,
    CreatedAt,
    Credits,
}

impl SortKey for PatientSort {
    const ALL: &'static [Self] = &[PatientSort::Name, PatientSort::CreatedAt, PatientSort::Credits];
    const DEFAULT: Self = PatientSort::Name;
    const DEFAULT_ORDER: SortOrder = SortOrder::Asc;

    fn name(&self) -> &'static str {
        match self {
            PatientSort::Name => "name",
            PatientSort::CreatedAt => "createdAt",
            PatientSort::Credits => "credits",
        }
    }
}

/// Sort keys for consultation listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsultationSort {
    StartedAt,
    FinishedAt,
    Price,
}

impl SortKey for ConsultationSort {
    const ALL: &'static [Self] = &[
        ConsultationSort::StartedAt,
        ConsultationSort::FinishedAt,
        ConsultationSort::Price,
    ];
    const DEFAULT: Self = ConsultationSort::StartedAt;
    const DEFAULT_ORDER: SortOrder = SortOrder::Desc;

    fn name(&self) -> &'static str {
        match self {
            ConsultationSort::StartedAt => "startedAt",
            ConsultationSort::FinishedAt => "finishedAt",
            ConsultationSort::Price => "price",
        }
    }
}

/// Sort keys for the financial overview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinancialSort {
    Name,
    PaymentDeficit,
    TotalConsultations,
    AvailableCredits,
}

impl SortKey for FinancialSort {
    const ALL: &'static [Self] = &[
        FinancialSort::Name,
        FinancialSort::PaymentDeficit,
        FinancialSort::TotalConsultations,
        FinancialSort::AvailableCredits,
    ];
    const DEFAULT: Self = FinancialSort::Name;
    const DEFAULT_ORDER: SortOrder = SortOrder::Asc;

    fn name(&self) -> &'static str {
        match self {
            FinancialSort::Name => "name",
            FinancialSort::PaymentDeficit => "paymentDeficit",
            FinancialSort::TotalConsultations => "totalConsultations",
            FinancialSort::AvailableCredits => "availableCredits",
        }
    }
}

/// Validated listing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery<S> {
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
    pub sort_by: S,
    pub sort_order: SortOrder,
    /// Case-insensitive name substring
    pub search: Option<String>,
}

impl<S: SortKey> ListQuery<S> {
    /// Query for `page` with `limit` rows and the resource's default sort.
    pub fn new(page: u32, limit: u32) -> LedgerResult<Self> {
        validate_page(page, &page.to_string())?;
        validate_limit(limit, &limit.to_string())?;
        Ok(Self {
            page,
            limit,
            sort_by: S::DEFAULT,
            sort_order: S::DEFAULT_ORDER,
            search: None,
        })
    }

    pub fn sorted(mut self, sort_by: S, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = normalize_search(Some(search.into()));
        self
    }

    /// Rows to skip before this page. Page 0 reads like page 1.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

impl<S: SortKey> Default for ListQuery<S> {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            sort_by: S::DEFAULT,
            sort_order: S::DEFAULT_ORDER,
            search: None,
        }
    }
}

/// Listing parameters as received from a caller (all optional strings).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub search: Option<String>,
}

impl RawListQuery {
    /// Validate into a typed query. `default_limit` applies when `limit` is absent.
    pub fn parse<S: SortKey>(&self, default_limit: u32) -> LedgerResult<ListQuery<S>> {
        let page = match self.page.as_deref().map(str::trim) {
            None | Some("") => 1,
            Some(raw) => {
                let page = raw.parse::<u32>().map_err(|_| page_error(raw))?;
                validate_page(page, raw)?;
                page
            }
        };

        let limit = match self.limit.as_deref().map(str::trim) {
            None | Some("") => default_limit,
            Some(raw) => {
                let limit = raw.parse::<u32>().map_err(|_| limit_error(raw))?;
                validate_limit(limit, raw)?;
                limit
            }
        };

        let sort_by = match self.sort_by.as_deref().map(str::trim) {
            None | Some("") => S::DEFAULT,
            Some(raw) => S::parse(raw).ok_or_else(|| {
                LedgerError::invalid_field(
                    "sortBy",
                    format!("invalid sortBy '{}': expected one of {}", raw, S::allowed()),
                )
            })?,
        };

        let sort_order = match self.sort_order.as_deref().map(str::trim) {
            None | Some("") => S::DEFAULT_ORDER,
            Some(raw) => SortOrder::parse(raw).ok_or_else(|| {
                LedgerError::invalid_field(
                    "sortOrder",
                    format!("invalid sortOrder '{}': expected one of asc, desc", raw),
                )
            })?,
        };

        Ok(ListQuery {
            page,
            limit,
            sort_by,
            sort_order,
            search: normalize_search(self.search.clone()),
        })
    }
}

fn normalize_search(search: Option<String>) -> Option<String> {
    search
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_page(page: u32, raw: &str) -> LedgerResult<()> {
    if page < 1 {
        return Err(page_error(raw));
    }
    Ok(())
}

fn validate_limit(limit: u32, raw: &str) -> LedgerResult<()> {
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(limit_error(raw));
    }
    Ok(())
}

fn page_error(raw: &str) -> LedgerError {
    LedgerError::invalid_field(
        "page",
        format!("invalid page '{}': expected an integer >= 1", raw),
    )
}

fn limit_error(raw: &str) -> LedgerError {
    LedgerError::invalid_field(
        "limit",
        format!(
            "invalid limit '{}': expected an integer between 1 and {}",
            raw, MAX_PAGE_LIMIT
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(page: &str, limit: &str, sort_by: &str, sort_order: &str) -> RawListQuery {
        RawListQuery {
            page: Some(page.into()),
            limit: Some(limit.into()),
            sort_by: Some(sort_by.into()),
            sort_order: Some(sort_order.into()),
            search: None,
        }
    }

    #[test]
    fn test_defaults_when_absent() {
        let query: ListQuery<PatientSort> = RawListQuery::default().parse(25).unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, 25);
        assert_eq!(query.sort_by, PatientSort::Name);
        assert_eq!(query.sort_order, SortOrder::Asc);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn test_offset_of_hand_built_queries() {
        let mut query: ListQuery<PatientSort> = RawListQuery::default().parse(10).unwrap();
        query.page = 0;
        assert_eq!(query.offset(), 0);

        query.page = u32::MAX;
        query.limit = u32::MAX;
        assert_eq!(
            query.offset(),
            u64::from(u32::MAX - 1) * u64::from(u32::MAX)
        );
    }

    #[test]
    fn test_parse_valid() {
        let query: ListQuery<FinancialSort> =
            raw("3", "20", "paymentDeficit", "desc").parse(10).unwrap();
        assert_eq!(query.page, 3);
        assert_eq!(query.limit, 20);
        assert_eq!(query.sort_by, FinancialSort::PaymentDeficit);
        assert_eq!(query.sort_order, SortOrder::Desc);
        assert_eq!(query.offset(), 40);
    }

    #[test]
    fn test_rejects_page_zero() {
        let err = raw("0", "10", "name", "asc")
            .parse::<PatientSort>(10)
            .unwrap_err();
        assert!(err.to_string().contains("page"));
        assert!(err.fields().unwrap().contains_key("page"));
    }

    #[test]
    fn test_rejects_non_numeric_page() {
        let err = raw("abc", "10", "name", "asc")
            .parse::<PatientSort>(10)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid page 'abc': expected an integer >= 1");
    }

    #[test]
    fn test_rejects_limit_over_max_without_clamping() {
        let err = raw("1", "101", "name", "asc")
            .parse::<PatientSort>(10)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid limit '101': expected an integer between 1 and 100"
        );
        assert!(raw("1", "0", "name", "asc").parse::<PatientSort>(10).is_err());
        assert!(raw("1", "-5", "name", "asc").parse::<PatientSort>(10).is_err());
    }

    #[test]
    fn test_rejects_unknown_sort_by_listing_allowed() {
        let err = raw("1", "10", "price", "asc")
            .parse::<PatientSort>(10)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid sortBy 'price': expected one of name, createdAt, credits"
        );
    }

    #[test]
    fn test_rejects_bad_sort_order() {
        let err = raw("1", "10", "name", "ASCENDING")
            .parse::<PatientSort>(10)
            .unwrap_err();
        assert!(err.fields().unwrap().contains_key("sortOrder"));
    }

    #[test]
    fn test_blank_search_is_none() {
        let query = RawListQuery {
            search: Some("   ".into()),
            ..Default::default()
        }
        .parse::<PatientSort>(10)
        .unwrap();
        assert!(query.search.is_none());
    }

    #[test]
    fn test_typed_constructor_validates() {
        assert!(ListQuery::<ConsultationSort>::new(0, 10).is_err());
        assert!(ListQuery::<ConsultationSort>::new(1, 1000).is_err());
        let query = ListQuery::<ConsultationSort>::new(2, 5).unwrap();
        assert_eq!(query.sort_by, ConsultationSort::StartedAt);
        assert_eq!(query.sort_order, SortOrder::Desc);
    }
}
