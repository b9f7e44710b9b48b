//! Error types for the two-tier storage

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause attached to backend failures
pub type BackendCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in storage operations
///
/// Absence is never an error: reads report a missing key as `Ok(None)`,
/// `Ok(false)` or an empty set.
#[derive(Error, Debug)]
pub enum Error {
    /// Attempted to persist a value reserved to mean "absent"
    #[error("Refusing to store reserved default value of type {type_name} at key {key}")]
    DefaultValueRejected {
        key: String,
        type_name: &'static str,
    },

    /// Distributed store unreachable or returned a failure
    #[error("Distributed store {operation} failed for key {key}: {source}")]
    Backend {
        operation: &'static str,
        key: String,
        #[source]
        source: BackendCause,
    },

    /// Caller cancelled the operation
    #[error("Operation {operation} cancelled for key {key}")]
    Cancelled { operation: &'static str, key: String },

    /// Operation exceeded its deadline
    #[error("Operation {operation} timed out for key {key} after {after:?}")]
    Timeout {
        operation: &'static str,
        key: String,
        after: Duration,
    },

    /// A zero TTL would delete the key instead of storing it
    #[error("TTL must be greater than zero for key {key}")]
    InvalidTtl { key: String },

    /// Member expired before it could be attached
    #[error("Member {member} already expired")]
    MemberExpired { member: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a backend failure with the operation and key it happened on
    pub fn backend(
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<BackendCause>,
    ) -> Self {
        Error::Backend {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    /// True for failures of the distributed tier itself
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Backend { .. } | Error::Timeout { .. })
    }

    /// True if the caller's token fired
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
