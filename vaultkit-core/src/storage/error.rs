//! Error types for the key-value collaborator.

use thiserror::Error;

/// Result type for key-value store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by [`KeyValueStore`](super::KeyValueStore) implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store refused or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A persisted value could not be parsed.
    #[error("corrupted row in {collection}: {reason}")]
    CorruptedRow {
        /// Collection holding the bad row.
        collection: &'static str,
        /// Description of the issue.
        reason: String,
    },

    /// Errors coming from the store lock.
    #[error("store lock error: {0}")]
    Lock(String),
}
