//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A body could not be encoded or decoded as JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A request or response carried no body where one was required.
    #[error("missing body")]
    MissingBody,

    /// A path did not match any known route.
    #[error("unknown route: {method} {path}")]
    UnknownRoute {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// An unrecognised HTTP method name.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownRoute {
            method: "GET".into(),
            path: "/nowhere".into(),
        };
        assert_eq!(err.to_string(), "unknown route: GET /nowhere");
        assert_eq!(ProtocolError::MissingBody.to_string(), "missing body");
    }
}
