//! Key-value backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A key-value storage backend.
///
/// Backends are **opaque byte stores**. The engine owns the meaning of every
/// key and value; a backend only has to hand back exactly what was written.
///
/// # Invariants
///
/// - `read` returns the bytes of the last successful `write` for that key
/// - `clear` on a missing key succeeds
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - session-scoped
/// - [`super::FileBackend`] - durable
pub trait KeyValueBackend: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn clear(&self, key: &str) -> StorageResult<()>;

    /// Lists the stored keys in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Checks that `key` is non-empty and only uses `[A-Za-z0-9_.-]`.
///
/// Keys that are all dots are rejected as well, so a key can never name a
/// parent or current directory.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-');
    if key.is_empty() || !key.chars().all(allowed) || key.chars().all(|c| c == '.') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
