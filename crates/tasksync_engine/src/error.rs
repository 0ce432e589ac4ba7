//! Error types for the sync engine.

use crate::state::StoreMode;
use tasksync_protocol::{HttpResponse, ProtocolError};
use tasksync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No response was received at all.
    #[error("network error: {message}")]
    Network {
        /// Error message from the HTTP client.
        message: String,
    },

    /// The server answered with a 5xx status. The response is kept intact.
    #[error("server error: status {}", .0.status)]
    ServerStatus(HttpResponse),

    /// The server answered with a non-success status below 500. The response
    /// is kept intact.
    #[error("request rejected: status {}", .0.status)]
    ClientStatus(HttpResponse),

    /// A reconciliation batch stopped at the first failing task.
    #[error("reconciliation failed at task {task_id}: {source}")]
    Reconciliation {
        /// Task whose operation failed.
        task_id: String,
        /// Failure of that operation.
        #[source]
        source: Box<SyncError>,
    },

    /// A mode transition that the state machine does not allow.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current mode.
        from: StoreMode,
        /// Requested mode.
        to: StoreMode,
    },

    /// Another reconciliation is already running for this store.
    #[error("reconciliation already in progress")]
    ReconcileInProgress,

    /// The operation needs a logged-in user.
    #[error("not authenticated")]
    NotAuthenticated,

    /// No task with the given id is held locally.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Invalid configuration value.
    #[error("invalid configuration {name}: {message}")]
    Config {
        /// Setting or environment variable name.
        name: String,
        /// What was wrong with it.
        message: String,
    },

    /// A background task was requested outside a Tokio runtime.
    #[error("no async runtime available")]
    NoRuntime,

    /// A request or response body could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Wraps an HTTP response with a non-success status.
    pub fn from_response(response: HttpResponse) -> Self {
        if response.is_server_error() {
            Self::ServerStatus(response)
        } else {
            Self::ClientStatus(response)
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network { .. } | SyncError::ServerStatus(_))
    }

    /// Returns true if no response was received.
    ///
    /// Looks through reconciliation errors to the failure that stopped them.
    pub fn is_network(&self) -> bool {
        match self {
            SyncError::Network { .. } => true,
            SyncError::Reconciliation { source, .. } => source.is_network(),
            _ => false,
        }
    }

    /// Returns the preserved HTTP response, if there is one.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            SyncError::ServerStatus(r) | SyncError::ClientStatus(r) => Some(r),
            SyncError::Reconciliation { source, .. } => source.response(),
            _ => None,
        }
    }

    /// Returns the preserved HTTP status, if there is one.
    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection refused").is_retryable());
        assert!(SyncError::ServerStatus(HttpResponse::new(503)).is_retryable());
        assert!(!SyncError::ClientStatus(HttpResponse::new(422)).is_retryable());
        assert!(!SyncError::ReconcileInProgress.is_retryable());
    }

    #[test]
    fn from_response_splits_on_500() {
        assert!(matches!(
            SyncError::from_response(HttpResponse::new(500)),
            SyncError::ServerStatus(_)
        ));
        assert!(matches!(
            SyncError::from_response(HttpResponse::new(499)),
            SyncError::ClientStatus(_)
        ));
    }

    #[test]
    fn reconciliation_exposes_source_status() {
        let err = SyncError::Reconciliation {
            task_id: "t2".into(),
            source: Box::new(SyncError::ClientStatus(HttpResponse::with_body(404, "gone"))),
        };
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_network());
        assert_eq!(
            err.to_string(),
            "reconciliation failed at task t2: request rejected: status 404"
        );
    }

    #[test]
    fn error_display() {
        let err = SyncError::InvalidStateTransition {
            from: StoreMode::Offline,
            to: StoreMode::Error,
        };
        assert_eq!(err.to_string(), "invalid state transition from offline to error");
    }
}
