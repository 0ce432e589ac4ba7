//! # tasksync storage
//!
//! Key-value persistence for the tasksync engine.
//!
//! Backends are **opaque byte stores** keyed by short names. They do not
//! interpret the values they hold; typed access lives on [`PersistentStore`].
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - session-scoped storage, lost when the process exits
//! - [`FileBackend`] - durable storage, one file per key
//!
//! [`PersistentStore`] holds one backend of each kind and routes reads and
//! writes to whichever [`Medium`] is currently active. The engine swaps the
//! active medium when the connectivity mode changes.
//!
//! ## Example
//!
//! ```rust
//! use tasksync_storage::{InMemoryBackend, Medium, PersistentStore};
//!
//! let store = PersistentStore::new(InMemoryBackend::new(), InMemoryBackend::new());
//! store.write("tasks", b"[]").unwrap();
//! assert_eq!(store.read("tasks").unwrap().as_deref(), Some(&b"[]"[..]));
//! assert_eq!(store.active(), Medium::Durable);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod persistent;

pub use backend::{validate_key, KeyValueBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use persistent::{Medium, PersistentStore};
