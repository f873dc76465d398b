use std::time::Duration;
use thiserror::Error;

use crate::bridge::ImportReport;

/// Failure reported by a storage collaborator.
///
/// Backends never hand their own error types to callers; everything is
/// flattened into one of these kinds and then wrapped in
/// [`PortalError::Store`] at the registry/value-store boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("could not decode row: {0}")]
    Decode(String),

    #[error("i/o failure: {0}")]
    Io(String),
}

/// Every error kind the attribute subsystem surfaces.
#[derive(Debug, Error)]
pub enum PortalError {
    /// Missing or malformed input, e.g. an empty column name or project title.
    #[error("{0}")]
    Validation(String),

    #[error("store operation `{operation}` failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(
        "import processed {} of {} rows ({} failed)",
        .0.imported.len(),
        .0.total,
        .0.failures.len()
    )]
    PartialImport(ImportReport),

    #[error("store operation `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl PortalError {
    pub fn validation(message: impl Into<String>) -> Self {
        PortalError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        PortalError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Short label used by the API layer and in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PortalError::Validation(_) => "validation",
            PortalError::Store { .. } => "store",
            PortalError::NotFound { .. } => "not_found",
            PortalError::PartialImport(_) => "partial_import",
            PortalError::Timeout { .. } => "timeout",
        }
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
