//! # Errors
//!
//! Centralized error handling for the collector.
//! Maps every failure a report can hit onto the line the client sees.

use thiserror::Error;

/// Reasons a request body cannot become a [`DecodedReport`](crate::DecodedReport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing guid")]
    MissingIdentity,

    /// `server` or `version` absent.
    #[error("missing required field {0}")]
    MissingFields(&'static str),

    #[error("field {field} is not a number: {value:?}")]
    MalformedNumber { field: &'static str, value: String },
}

/// Failure reported by any storage port.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Infrastructure failure (e.g., DB down, pool exhausted)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Concurrent writers raced on a unique key.
    #[error("storage conflict: {0}")]
    Conflict(String),
}

/// Everything that ends a report with an `ERR` line.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("server is blacklisted")]
    Blacklisted,

    /// An entity that must exist after validation could not be loaded.
    #[error("inconsistent state: {0}")]
    Inconsistent(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<DecodeError> for ReportError {
    fn from(err: DecodeError) -> Self {
        ReportError::InvalidArguments(err.to_string())
    }
}

impl ReportError {
    /// The single line written back to the client.
    pub fn response_line(&self) -> &'static str {
        match self {
            ReportError::InvalidArguments(_) => "ERR Invalid arguments.",
            ReportError::Blacklisted => {
                "ERR Your server is blacklisted for running multiple servers on the same GUID."
            }
            ReportError::Inconsistent(_) | ReportError::Storage(_) => {
                "ERR Something bad happened.."
            }
        }
    }
}

/// A specialized Result type for storage ports.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
