//! HTTP client abstraction.
//!
//! The engine never talks to a socket directly. It hands an [`HttpRequest`] to
//! an [`HttpClient`] and gets an [`HttpResponse`] back, or an error message when
//! no response arrived at all. Any non-2xx response is still a response.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasksync_protocol::{HttpRequest, HttpResponse, Method};

use crate::error::{SyncError, SyncResult};

/// Sends HTTP requests.
///
/// Implement this trait to plug in a different HTTP stack. `Err` means no
/// response was received (DNS, refused connection, timeout...).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends one request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// HTTP client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration, user_agent: &str) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| SyncError::Config {
                name: "http client".into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| e.to_string())?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Trait for servers that can handle requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles one request.
    fn handle(&self, request: HttpRequest) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle(&self, request: HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}

/// An HTTP client that routes requests directly to an in-process server.
///
/// Reachability can be switched off to simulate a dropped network.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    reachable: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            reachable: AtomicBool::new(true),
        }
    }

    /// Makes the server reachable or unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        Ok(self.server.handle(request))
    }
}

/// An HTTP client that answers from a script. Records every request.
///
/// Once the script is exhausted every request fails as unreachable.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, String>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    /// Creates a client with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client answering with the given statuses, in order.
    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        let client = Self::new();
        for status in statuses {
            client.push_response(HttpResponse::with_body(status, format!("status {status}")));
        }
        client
    }

    /// Appends a response to the script.
    pub fn push_response(&self, response: HttpResponse) {
        self.script.lock().push_back(Ok(response));
    }

    /// Appends a network failure to the script.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(message.into()));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.requests.lock().push(request);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoServer;

    impl LoopbackServer for EchoServer {
        fn handle(&self, request: HttpRequest) -> HttpResponse {
            HttpResponse::with_body(200, request.path)
        }
    }

    #[tokio::test]
    async fn loopback_routes_to_server() {
        let client = LoopbackClient::new(EchoServer);
        let response = client
            .send(HttpRequest::new(Method::Get, "/generic/ping"))
            .await
            .unwrap();
        assert_eq!(response.text(), "/generic/ping");
    }

    #[tokio::test]
    async fn loopback_can_be_unreachable() {
        let client = LoopbackClient::new(Arc::new(EchoServer));
        client.set_reachable(false);
        assert!(client
            .send(HttpRequest::new(Method::Get, "/"))
            .await
            .is_err());
        client.set_reachable(true);
        assert!(client.send(HttpRequest::new(Method::Get, "/")).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_client_replays_in_order() {
        let client = ScriptedHttpClient::with_statuses([500, 200]);
        client.push_failure("reset");

        let req = HttpRequest::new(Method::Get, "/x");
        assert_eq!(client.send(req.clone()).await.unwrap().status, 500);
        assert_eq!(client.send(req.clone()).await.unwrap().status, 200);
        assert_eq!(client.send(req.clone()).await.unwrap_err(), "reset");
        assert!(client.send(req).await.is_err());
        assert_eq!(client.call_count(), 4);
    }

    #[test]
    fn reqwest_client_trims_base_url() {
        let client =
            ReqwestClient::new("http://localhost:8080/", Duration::from_secs(1), "test").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
