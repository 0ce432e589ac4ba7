//! Error types for the record store.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the record store.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed body or a field failing validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, malformed or expired bearer token, or bad login.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// Authenticated but not allowed, or the anti-forgery check failed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No such task or route.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another task of the same user already has this name.
    #[error("duplicate task name: {0}")]
    DuplicateName(String),

    /// The username is already registered.
    #[error("user already exists: {0}")]
    UserExists(String),

    /// A failure injected for testing.
    #[error("injected failure with status {0}")]
    Injected(u16),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// The HTTP status this error is answered with.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotAuthenticated(_) => 401,
            ServerError::Forbidden(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::UserExists(_) => 409,
            ServerError::DuplicateName(_) => 422,
            ServerError::Injected(status) => *status,
            ServerError::Internal(_) | ServerError::Io(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}
