//! User-facing notifications.

use parking_lot::Mutex;

/// Progress of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncProgress {
    /// Pushing staged changes.
    Syncing {
        /// Number of operations planned.
        pending: usize,
    },
    /// Staged changes pushed and server list fetched.
    Synced {
        /// Number of tasks in the canonical list.
        tasks: usize,
    },
    /// The run stopped early.
    Failed {
        /// Task whose operation failed, when known.
        task_id: Option<String>,
    },
}

/// A notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The engine entered error mode.
    ConnectionLost {
        /// Why the connection was considered lost.
        reason: String,
    },
    /// A reconnect ping succeeded.
    Reconnected,
    /// The reconnect budget ran out; no further automatic attempts.
    ReconnectExhausted {
        /// Number of pings attempted.
        attempts: u32,
    },
    /// Reconciliation progress.
    SyncProgress(SyncProgress),
    /// Reconciliation failed but the engine went online anyway.
    SyncWarning {
        /// Description of the failure.
        message: String,
    },
}

/// Receives notifications.
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::ConnectionLost { reason } => {
                tracing::warn!(%reason, "connection lost, working offline");
            }
            Notification::Reconnected => tracing::info!("connection restored"),
            Notification::ReconnectExhausted { attempts } => {
                tracing::warn!(attempts, "giving up on reconnecting");
            }
            Notification::SyncProgress(progress) => tracing::debug!(?progress, "sync progress"),
            Notification::SyncWarning { message } => {
                tracing::warn!(%message, "sync incomplete");
            }
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications received so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    /// Number of notifications matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        self.seen.lock().iter().filter(|n| predicate(n)).count()
    }

    /// Forgets everything recorded.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}
