//! Errors of the alert store.

use thiserror::Error;

/// Errors returned by an [`AlertStore`](super::AlertStore).
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The database rejected or failed a statement.
    #[error("Alert store operation failed: {0}")]
    OperationFailed(String),

    /// A stored alert document could not be encoded or decoded.
    #[error("Failed to encode or decode alert document: {0}")]
    SerializationError(String),

    /// Schema migrations failed at startup.
    #[error("Alert store migration failed: {0}")]
    MigrationError(String),

    /// The write is not allowed, e.g. putting a COMPLETED alert.
    #[error("Invalid alert store input: {0}")]
    InvalidInput(String),

    /// The stored alert does not carry the version the writer read.
    #[error("Version conflict on alert '{id}': expected version {expected}")]
    VersionConflict {
        /// Alert id.
        id: String,
        /// The version the writer expected.
        expected: i64,
    },
}

impl PersistenceError {
    /// Whether a re-read and retry can resolve the error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PersistenceError::VersionConflict { .. })
    }
}
