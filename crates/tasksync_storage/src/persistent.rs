//! Runtime-swappable persistence.

use crate::backend::KeyValueBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Which storage medium a [`PersistentStore`] is routing to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Medium {
    /// Lives for the current session only. Active while online.
    Session,
    /// Survives restarts. Active while offline or in error.
    Durable,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Medium::Session => f.write_str("session"),
            Medium::Durable => f.write_str("durable"),
        }
    }
}

/// A key-value store whose backing medium can be swapped at runtime.
///
/// Reads and writes go to the active medium. Swapping does not copy data
/// between media and is not synchronized against writes already in flight:
/// a write that started before [`swap_to`](Self::swap_to) may land in the
/// previous medium.
pub struct PersistentStore {
    session: Arc<dyn KeyValueBackend>,
    durable: Arc<dyn KeyValueBackend>,
    active: RwLock<Medium>,
}

impl PersistentStore {
    /// Creates a store over the given media. The durable medium starts active.
    pub fn new(
        session: impl KeyValueBackend + 'static,
        durable: impl KeyValueBackend + 'static,
    ) -> Self {
        Self::from_arcs(Arc::new(session), Arc::new(durable))
    }

    /// Creates a store over shared backends.
    pub fn from_arcs(session: Arc<dyn KeyValueBackend>, durable: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            session,
            durable,
            active: RwLock::new(Medium::Durable),
        }
    }

    /// Returns the active medium.
    pub fn active(&self) -> Medium {
        *self.active.read()
    }

    /// Makes `medium` the active one. Returns the previously active medium.
    pub fn swap_to(&self, medium: Medium) -> Medium {
        let previous = std::mem::replace(&mut *self.active.write(), medium);
        if previous != medium {
            tracing::debug!(from = %previous, to = %medium, "persistence medium swapped");
        }
        previous
    }

    fn backend(&self, medium: Medium) -> &dyn KeyValueBackend {
        match medium {
            Medium::Session => self.session.as_ref(),
            Medium::Durable => self.durable.as_ref(),
        }
    }

    /// Reads `key` from the active medium.
    pub fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.backend(self.active()).read(key)
    }

    /// Writes `key` to the active medium.
    pub fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.backend(self.active()).write(key, value)
    }

    /// Clears `key` on the active medium.
    pub fn clear(&self, key: &str) -> StorageResult<()> {
        self.backend(self.active()).clear(key)
    }

    /// Clears `key` on a specific medium regardless of which one is active.
    pub fn clear_in(&self, medium: Medium, key: &str) -> StorageResult<()> {
        self.backend(medium).clear(key)
    }

    /// Reads `key` from a specific medium.
    pub fn read_from(&self, medium: Medium, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.backend(medium).read(key)
    }

    /// Reads and decodes a JSON value from the active medium.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.read(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Serialization {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Encodes and writes a JSON value to the active medium.
    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.write(key, &bytes)
    }
}

impl fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStore")
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}
