//! Error types for the chainstore commit pipeline.

use thiserror::Error;

/// Errors that can occur while connecting to or committing into a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable, or used before `connect()` / after `disconnect()`.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A write is malformed, or does not fit the type already stored under its key.
    #[error("Validation error on '{key}': {reason}")]
    Validation { key: String, reason: String },

    /// The atomic batch was rejected as a whole.
    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Handler error: {reason}")]
    Handler { reason: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn validation(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler {
            reason: reason.into(),
        }
    }

    /// Returns `true` for lifecycle / reachability failures.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns `true` if a write was rejected for its shape or key type.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
