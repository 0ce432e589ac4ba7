//! Request and response bodies for the auxiliary endpoints.

use serde::{Deserialize, Serialize};

/// Body of `POST /auth/login` and `POST /auth/signin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Account name.
    pub username: String,
    /// Account secret.
    pub password: String,
}

impl LoginRequest {
    /// Creates a login request.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Bearer credentials issued by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Bearer token.
    pub token: String,
    /// User the token was issued for.
    pub user_id: String,
}

/// Body of `GET /token/csrf-token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    /// Token to echo in the anti-forgery header.
    pub csrf_token: String,
    /// Name of the header the server expects.
    pub header_name: String,
}

/// Body of `GET /generic/ping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Always `"pong"`.
    pub message: String,
}

impl PingResponse {
    /// The canonical pong.
    pub fn pong() -> Self {
        Self {
            message: "pong".into(),
        }
    }
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human readable reason.
    pub message: String,
    /// Task that caused a bulk sync to stop, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            task_id: None,
        }
    }

    /// Attaches the id of the task that failed.
    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_field_names() {
        let body = TokenResponse {
            token: "t".into(),
            user_id: "u".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"token":"t","userId":"u"}"#);
    }

    #[test]
    fn error_body_omits_missing_task() {
        let plain = serde_json::to_string(&ErrorBody::new("bad")).unwrap();
        assert_eq!(plain, r#"{"message":"bad"}"#);
        let tagged = serde_json::to_string(&ErrorBody::new("bad").for_task("t1")).unwrap();
        assert_eq!(tagged, r#"{"message":"bad","taskId":"t1"}"#);
    }

    #[test]
    fn csrf_response_decodes() {
        let body: CsrfTokenResponse =
            serde_json::from_str(r#"{"csrfToken":"abc","headerName":"x-csrf-token"}"#).unwrap();
        assert_eq!(body.csrf_token, "abc");
        assert_eq!(body.header_name, "x-csrf-token");
    }
}
