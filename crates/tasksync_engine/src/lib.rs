//! # tasksync engine
//!
//! Offline-first synchronization of a task list with a remote record store.
//!
//! This crate provides:
//! - Store mode state machine (offline → online → error → online)
//! - Side-effect bus announcing every connectivity change
//! - Connectivity monitor (platform notifications and periodic pings)
//! - Resilient HTTP client with exponential backoff
//! - Push-then-pull reconciliation of staged changes
//!
//! ## Architecture
//!
//! While `Online`, task mutations go straight to the server. While `Offline`
//! or in `Error`, they are staged locally as `Unsynced` and tombstones. Going
//! online pushes the staged batch first, then replaces local state with the
//! server's canonical list:
//! 1. Delete tombstoned tasks
//! 2. Update tasks the server knows, create the rest
//! 3. Fetch the canonical list
//!
//! A lost connection while `Online` moves the store to `Error`, notifies the
//! user once and starts a bounded reconnect loop.
//!
//! ## Key Invariants
//!
//! - `Offline -> Error` is never taken
//! - `BeforeChange` handlers run before a value is written, `AfterChange`
//!   handlers after; pairs never interleave
//! - Only responses without a status or with a 5xx status are retried
//! - At most one reconciliation runs at a time
//! - The server is authoritative after a successful reconciliation

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod client;
mod config;
mod credentials;
mod engine;
mod error;
mod http;
mod mode;
mod monitor;
mod notify;
mod reconciler;
mod state;
mod store;
mod transport;

pub use bus::{EffectHandler, EffectKey, Phase, Property, SideEffectBus};
pub use client::ResilientClient;
pub use config::{default_should_retry, Attempt, EngineConfig, RetryPolicy};
pub use credentials::{Anonymous, CredentialProvider, CsrfCredentials, LogoutHook, SessionCredentials};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, LoopbackClient, LoopbackServer, ReqwestClient, ScriptedHttpClient};
pub use mode::{ModeController, ReconnectSchedule};
pub use monitor::ConnectivityMonitor;
pub use notify::{Notification, Notifier, RecordingNotifier, SyncProgress, TracingNotifier};
pub use reconciler::{ReconcileStrategy, Reconciler};
pub use state::{
    ConnectionState, ConnectivitySnapshot, ConnectivityState, ServerConnectionState, StoreMode,
    Transition, FAILURE_COUNTER_HANDLER,
};
pub use store::{SyncMetadata, TaskStore, SYNC_KEY, TASKS_KEY};
pub use transport::{HttpTaskTransport, MockFailure, MockTransport, TaskTransport, TransportCall};
