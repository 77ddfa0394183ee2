//! Storage error types.

use thiserror::Error;

/// Failures raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `insert` found an existing record for the app. Treated as benign
    /// idempotence by the connector.
    #[error("record already exists for app: {0}")]
    AlreadyExists(String),

    /// Filesystem failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failure.
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether this is the benign duplicate-insert condition.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
