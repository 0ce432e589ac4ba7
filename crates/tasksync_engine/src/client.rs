//! Resilient request client.
//!
//! Wraps an [`HttpClient`] with credentials and bounded exponential-backoff
//! retry. Attempts are strictly sequential.

use crate::config::{Attempt, RetryPolicy};
use crate::credentials::{csrf_cookie_header, CredentialProvider};
use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use crate::state::ConnectivityState;
use std::sync::Arc;
use tasksync_protocol::{HttpRequest, HttpResponse, AUTHORIZATION_HEADER};
use tracing::{debug, warn};

/// HTTP client with retry and credential handling.
pub struct ResilientClient {
    http: Arc<dyn HttpClient>,
    policy: RetryPolicy,
    credentials: Arc<dyn CredentialProvider>,
    state: Option<Arc<ConnectivityState>>,
}

impl ResilientClient {
    /// Creates a client.
    pub fn new(
        http: Arc<dyn HttpClient>,
        policy: RetryPolicy,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            policy,
            credentials,
            state: None,
        }
    }

    /// Counts network failures on `state`.
    pub fn with_connectivity(mut self, state: Arc<ConnectivityState>) -> Self {
        self.state = Some(state);
        self
    }

    /// The retry policy used by [`send`](Self::send).
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends a request, retrying per the configured policy.
    ///
    /// Returns the first 2xx response. Otherwise returns the last failure:
    /// [`SyncError::Network`] when nothing came back, or the last response
    /// wrapped intact in [`SyncError::ServerStatus`] / [`SyncError::ClientStatus`].
    pub async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        self.send_with(request, &self.policy, true).await
    }

    /// Sends a request once, without retries and without touching the
    /// failure counter. Used for liveness probes.
    pub async fn probe(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        self.send_with(request, &RetryPolicy::no_retry(), false).await
    }

    async fn send_with(
        &self,
        request: HttpRequest,
        policy: &RetryPolicy,
        count_failures: bool,
    ) -> SyncResult<HttpResponse> {
        let request = self.decorate(request);
        let mut attempt: u32 = 0;

        loop {
            let outcome = self.http.send(request.clone()).await;

            let retry = match &outcome {
                Ok(response) if response.is_success() => None,
                Ok(response) => {
                    if response.status == 401 {
                        self.credentials.on_unauthorized();
                    }
                    Some((policy.should_retry)(&Attempt::Response(response)))
                }
                Err(message) => {
                    if count_failures {
                        if let Some(state) = &self.state {
                            state.increment_connection_errors();
                        }
                    }
                    Some((policy.should_retry)(&Attempt::NetworkFailure(message)))
                }
            };
            let Some(retry) = retry else {
                if attempt > 0 {
                    debug!(path = %request.path, attempt, "request succeeded after retry");
                }
                return outcome.map_err(SyncError::network);
            };

            if !retry || attempt >= policy.max_retries {
                return Err(match outcome {
                    Ok(response) => SyncError::from_response(response),
                    Err(message) => SyncError::network(message),
                });
            }

            let delay = policy.delay_for_attempt(attempt);
            warn!(
                method = %request.method,
                path = %request.path,
                attempt = attempt + 1,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn decorate(&self, mut request: HttpRequest) -> HttpRequest {
        if let Some(token) = self.credentials.bearer_token() {
            request.set_header(AUTHORIZATION_HEADER, format!("Bearer {token}"));
        }
        if let Some(csrf) = self.credentials.csrf() {
            if let Some(cookie) = csrf_cookie_header(&csrf) {
                request.set_header("cookie", cookie);
            }
            request.set_header(csrf.header_name, csrf.token);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SideEffectBus;
    use crate::credentials::{Anonymous, CsrfCredentials, SessionCredentials};
    use crate::http::ScriptedHttpClient;
    use std::time::Duration;
    use tasksync_protocol::Method;

    fn client(http: Arc<ScriptedHttpClient>, max_retries: u32) -> ResilientClient {
        ResilientClient::new(
            http,
            RetryPolicy::new(max_retries, Duration::from_millis(1)),
            Arc::new(Anonymous),
        )
    }

    fn get() -> HttpRequest {
        HttpRequest::new(Method::Get, "/task/u1")
    }

    #[tokio::test]
    async fn retries_until_success() {
        let http = Arc::new(ScriptedHttpClient::with_statuses([500, 500, 200]));
        let response = client(Arc::clone(&http), 5).send(get()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "status 200");
        assert_eq!(http.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let http = Arc::new(ScriptedHttpClient::with_statuses([500, 500, 200]));
        let client = ResilientClient::new(
            Arc::clone(&http) as Arc<dyn HttpClient>,
            RetryPolicy::new(5, Duration::from_millis(100)),
            Arc::new(Anonymous),
        );
        let start = tokio::time::Instant::now();

        let response = client.send(get()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn exhaustion_returns_last_response() {
        let http = Arc::new(ScriptedHttpClient::new());
        for i in 1..=6 {
            http.push_response(HttpResponse::with_body(500, format!("failure {i}")));
        }
        let err = client(Arc::clone(&http), 5).send(get()).await.unwrap_err();
        assert_eq!(http.call_count(), 6);
        match err {
            SyncError::ServerStatus(response) => assert_eq!(response.text(), "failure 6"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_below_500_is_not_retried() {
        let http = Arc::new(ScriptedHttpClient::new());
        let redirect = HttpResponse::with_body(300, "elsewhere").with_header("location", "/x");
        http.push_response(redirect.clone());
        let err = client(Arc::clone(&http), 5).send(get()).await.unwrap_err();
        assert_eq!(http.call_count(), 1);
        match err {
            SyncError::ClientStatus(response) => assert_eq!(response, redirect),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn network_failures_are_retried_and_counted() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_failure("refused");
        http.push_failure("refused");
        http.push_response(HttpResponse::new(204));

        let state = Arc::new(ConnectivityState::new(Arc::new(SideEffectBus::new())));
        let client = client(Arc::clone(&http), 5).with_connectivity(Arc::clone(&state));
        client.send(get()).await.unwrap();
        assert_eq!(state.connection_errors(), 2);
    }

    #[tokio::test]
    async fn responses_do_not_count_as_connection_errors() {
        let http = Arc::new(ScriptedHttpClient::with_statuses([503, 200]));
        let state = Arc::new(ConnectivityState::new(Arc::new(SideEffectBus::new())));
        client(Arc::clone(&http), 5)
            .with_connectivity(Arc::clone(&state))
            .send(get())
            .await
            .unwrap();
        assert_eq!(state.connection_errors(), 0);
    }

    #[tokio::test]
    async fn network_exhaustion_is_network_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        let err = client(Arc::clone(&http), 2).send(get()).await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(http.call_count(), 3);
    }

    #[tokio::test]
    async fn probe_never_retries_or_counts() {
        let http = Arc::new(ScriptedHttpClient::new());
        let state = Arc::new(ConnectivityState::new(Arc::new(SideEffectBus::new())));
        let client = client(Arc::clone(&http), 5).with_connectivity(Arc::clone(&state));
        assert!(client.probe(get()).await.is_err());
        assert_eq!(http.call_count(), 1);
        assert_eq!(state.connection_errors(), 0);
    }

    #[tokio::test]
    async fn custom_predicate_is_honored() {
        let http = Arc::new(ScriptedHttpClient::with_statuses([429, 200]));
        let policy = RetryPolicy::new(3, Duration::from_millis(1)).with_predicate(|a| {
            matches!(a, Attempt::Response(r) if r.status == 429)
        });
        let client = ResilientClient::new(http.clone(), policy, Arc::new(Anonymous));
        assert_eq!(client.send(get()).await.unwrap().status, 200);
        assert_eq!(http.call_count(), 2);
    }

    #[tokio::test]
    async fn credentials_are_attached() {
        let http = Arc::new(ScriptedHttpClient::with_statuses([200]));
        let creds = Arc::new(SessionCredentials::new());
        creds.set_session("u1", "tok");
        creds.set_csrf(CsrfCredentials {
            header_name: "x-csrf-token".into(),
            token: "abc".into(),
            cookie: Some("sig".into()),
        });
        let client = ResilientClient::new(http.clone(), RetryPolicy::no_retry(), creds);
        client.send(get()).await.unwrap();

        let sent = &http.requests()[0];
        assert_eq!(sent.bearer_token(), Some("tok"));
        assert_eq!(sent.header("x-csrf-token"), Some("abc"));
        assert_eq!(sent.cookie("csrf_token"), Some("sig"));
    }

    #[tokio::test]
    async fn unauthorized_ends_session() {
        let http = Arc::new(ScriptedHttpClient::with_statuses([401]));
        let creds = Arc::new(SessionCredentials::new());
        creds.set_session("u1", "tok");
        let client = ResilientClient::new(http, RetryPolicy::default(), creds.clone());
        let err = client.send(get()).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(!creds.is_authenticated());
    }
}
