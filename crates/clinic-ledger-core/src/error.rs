//! Error taxonomy shared by every ledger operation.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Failure of a ledger operation.
///
/// Errors are raised where they are detected and returned unchanged; the
/// core never retries or masks a partial success.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or missing input
    #[error("{message}")]
    Validation {
        message: String,
        /// Offending field → message, for form display
        fields: BTreeMap<String, String>,
    },

    /// Referenced entity does not exist
    #[error("{0}")]
    NotFound(String),

    /// Operation conflicts with the current state
    #[error("{0}")]
    BusinessRule(String),

    /// Store-level failure, wrapped with the operation it interrupted
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: StoreError,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Coarse error category, stable for callers that map to transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    BusinessRule,
    Persistence,
}

/// Body a transport layer sends back for a failed call.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl LedgerError {
    /// Validation failure on a single named field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), message.clone());
        LedgerError::Validation { message, fields }
    }

    /// Validation failure covering several fields.
    pub fn invalid_fields(message: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
            fields,
        }
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        LedgerError::NotFound(format!("{} not found: {}", entity, id))
    }

    pub fn business_rule(message: impl Into<String>) -> Self {
        LedgerError::BusinessRule(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation { .. } => ErrorKind::Validation,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::BusinessRule(_) => ErrorKind::BusinessRule,
            LedgerError::Persistence { .. } => ErrorKind::Persistence,
        }
    }

    /// HTTP-equivalent status for the upstream handlers.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::BusinessRule => 409,
            ErrorKind::Persistence => 500,
        }
    }

    /// Per-field messages; only validation failures carry them.
    pub fn fields(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            LedgerError::Validation { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            fields: self.fields().cloned().unwrap_or_default(),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(source: StoreError) -> Self {
        LedgerError::Persistence {
            context: "storage failure".to_string(),
            source,
        }
    }
}

/// Attach the interrupted operation to a store failure.
pub(crate) trait StoreContext<T> {
    fn context(self, context: &str) -> LedgerResult<T>;
}

impl<T> StoreContext<T> for Result<T, StoreError> {
    fn context(self, context: &str) -> LedgerResult<T> {
        self.map_err(|source| LedgerError::Persistence {
            context: context.to_string(),
            source,
        })
    }
}

/// Reject blank ids before touching storage.
pub(crate) fn require_id(field: &str, id: &str) -> LedgerResult<()> {
    if id.trim().is_empty() {
        return Err(LedgerError::invalid_field(field, "id required"));
    }
    Ok(())
}
