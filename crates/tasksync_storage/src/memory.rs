//! In-memory storage backend.

use crate::backend::{validate_key, KeyValueBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value backend.
///
/// Used as the session-scoped medium: values live as long as the backend
/// does. Also handy in tests.
///
/// # Example
///
/// ```rust
/// use tasksync_storage::{KeyValueBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write("sync", b"{}").unwrap();
/// assert_eq!(backend.keys().unwrap(), vec!["sync".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueBackend for InMemoryBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn clear(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn memory_write_then_read() {
        let backend = InMemoryBackend::new();
        backend.write("tasks", b"[1]").unwrap();
        assert_eq!(backend.read("tasks").unwrap(), Some(b"[1]".to_vec()));
        assert_eq!(backend.read("other").unwrap(), None);
    }

    #[test]
    fn memory_write_replaces() {
        let backend = InMemoryBackend::new();
        backend.write("k", b"one").unwrap();
        backend.write("k", b"two").unwrap();
        assert_eq!(backend.read("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn memory_clear_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.write("k", b"v").unwrap();
        backend.clear("k").unwrap();
        backend.clear("k").unwrap();
        assert_eq!(backend.read("k").unwrap(), None);
    }

    #[test]
    fn memory_keys_sorted() {
        let backend = InMemoryBackend::new();
        backend.write("b", b"").unwrap();
        backend.write("a", b"").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn memory_rejects_bad_key() {
        let backend = InMemoryBackend::new();
        let result = backend.write("a/b", b"");
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
