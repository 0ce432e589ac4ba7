//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A key contained characters outside `[A-Za-z0-9_.-]`.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error for key {key}: {source}")]
    Serialization {
        /// The key being accessed.
        key: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}
