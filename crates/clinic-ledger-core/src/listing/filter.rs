//! Consultation listing filters.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::models::ConsultationStatus;

/// Validated consultation filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsultationFilter {
    pub patient_id: Option<String>,
    pub status: Option<ConsultationStatus>,
    pub paid: Option<bool>,
}

impl ConsultationFilter {
    pub fn for_patient(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: Some(patient_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ConsultationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_paid(mut self, paid: bool) -> Self {
        self.paid = Some(paid);
        self
    }
}

/// Consultation filter as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawConsultationFilter {
    pub patient_id: Option<String>,
    pub status: Option<String>,
    pub paid: Option<String>,
}

impl RawConsultationFilter {
    pub fn parse(&self) -> LedgerResult<ConsultationFilter> {
        let patient_id = self
            .patient_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(ConsultationStatus::parse(raw).ok_or_else(|| {
                LedgerError::invalid_field(
                    "status",
                    format!("invalid status '{}': expected one of OPEN, FINALIZED", raw),
                )
            })?),
        };

        let paid = match self.paid.as_deref().map(str::trim) {
            None | Some("") => None,
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(raw) => {
                return Err(LedgerError::invalid_field(
                    "paid",
                    format!("invalid paid '{}': expected one of true, false", raw),
                ))
            }
        };

        Ok(ConsultationFilter {
            patient_id,
            status,
            paid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        let filter = RawConsultationFilter::default().parse().unwrap();
        assert_eq!(filter, ConsultationFilter::default());
    }

    #[test]
    fn test_parse_status_and_paid() {
        let filter = RawConsultationFilter {
            patient_id: Some("p-1".into()),
            status: Some("FINALIZED".into()),
            paid: Some("false".into()),
        }
        .parse()
        .unwrap();
        assert_eq!(filter.patient_id.as_deref(), Some("p-1"));
        assert_eq!(filter.status, Some(ConsultationStatus::Finalized));
        assert_eq!(filter.paid, Some(false));
    }

    #[test]
    fn test_rejects_unknown_status() {
        let err = RawConsultationFilter {
            status: Some("CLOSED".into()),
            ..Default::default()
        }
        .parse()
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid status 'CLOSED': expected one of OPEN, FINALIZED"
        );
    }

    #[test]
    fn test_rejects_bad_paid_flag() {
        let err = RawConsultationFilter {
            paid: Some("yes".into()),
            ..Default::default()
        }
        .parse()
        .unwrap_err();
        assert!(err.fields().unwrap().contains_key("paid"));
    }
}
