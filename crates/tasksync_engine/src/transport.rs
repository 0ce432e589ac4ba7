//! Transport layer abstraction for the record store.

use crate::client::ResilientClient;
use crate::credentials::CsrfCredentials;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasksync_protocol::{
    plan_batch, CsrfTokenResponse, ErrorBody, HttpRequest, HttpResponse, LoginRequest,
    PlannedOp, Route, SyncStatus, Task, TaskPatch, TokenResponse, CSRF_COOKIE_NAME,
};

/// Typed access to the record store.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-memory mock for testing, etc.).
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// `GET /task/{userId}`.
    async fn fetch_tasks(&self, user_id: &str) -> SyncResult<Vec<Task>>;

    /// `POST /task`.
    async fn create_task(&self, task: &Task) -> SyncResult<Task>;

    /// `PUT /task`.
    async fn update_task(&self, task: &Task) -> SyncResult<Task>;

    /// `PATCH /task/{id}`.
    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> SyncResult<Task>;

    /// `DELETE /task/{id}`.
    async fn delete_task(&self, id: &str) -> SyncResult<()>;

    /// `POST /task/sync/{userId}`.
    async fn sync_tasks(&self, user_id: &str, tasks: &[Task]) -> SyncResult<Vec<Task>>;

    /// `GET /generic/ping`, sent once without retries.
    async fn ping(&self) -> SyncResult<()>;

    /// `GET /token/csrf-token`.
    async fn csrf_token(&self) -> SyncResult<CsrfCredentials>;

    /// `POST /auth/login`.
    async fn login(&self, request: &LoginRequest) -> SyncResult<TokenResponse>;

    /// `POST /auth/signin`.
    async fn signin(&self, request: &LoginRequest) -> SyncResult<TokenResponse>;
}

/// HTTP implementation of [`TaskTransport`] over a [`ResilientClient`].
pub struct HttpTaskTransport {
    client: Arc<ResilientClient>,
}

impl HttpTaskTransport {
    /// Creates a transport over `client`.
    pub fn new(client: Arc<ResilientClient>) -> Self {
        Self { client }
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    fn request(route: &Route) -> HttpRequest {
        HttpRequest::new(route.method(), route.path())
    }

    fn json_request<B: serde::Serialize + ?Sized>(route: &Route, body: &B) -> SyncResult<HttpRequest> {
        Ok(HttpRequest::json(route.method(), route.path(), &body)?)
    }

    async fn call<T: DeserializeOwned>(&self, request: HttpRequest) -> SyncResult<T> {
        let response = self.client.send(request).await?;
        Ok(response.decode_json()?)
    }
}

#[async_trait]
impl TaskTransport for HttpTaskTransport {
    async fn fetch_tasks(&self, user_id: &str) -> SyncResult<Vec<Task>> {
        let route = Route::FetchTasks {
            user_id: user_id.to_string(),
        };
        self.call(Self::request(&route)).await
    }

    async fn create_task(&self, task: &Task) -> SyncResult<Task> {
        self.call(Self::json_request(&Route::CreateTask, task)?).await
    }

    async fn update_task(&self, task: &Task) -> SyncResult<Task> {
        self.call(Self::json_request(&Route::UpdateTask, task)?).await
    }

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> SyncResult<Task> {
        let route = Route::PatchTask { id: id.to_string() };
        self.call(Self::json_request(&route, patch)?).await
    }

    async fn delete_task(&self, id: &str) -> SyncResult<()> {
        let route = Route::DeleteTask { id: id.to_string() };
        self.client.send(Self::request(&route)).await?;
        Ok(())
    }

    async fn sync_tasks(&self, user_id: &str, tasks: &[Task]) -> SyncResult<Vec<Task>> {
        let route = Route::SyncTasks {
            user_id: user_id.to_string(),
        };
        self.call(Self::json_request(&route, tasks)?).await
    }

    async fn ping(&self) -> SyncResult<()> {
        self.client.probe(Self::request(&Route::Ping)).await?;
        Ok(())
    }

    async fn csrf_token(&self) -> SyncResult<CsrfCredentials> {
        let response = self.client.send(Self::request(&Route::CsrfToken)).await?;
        let body: CsrfTokenResponse = response.decode_json()?;
        Ok(CsrfCredentials {
            header_name: body.header_name,
            token: body.csrf_token,
            cookie: set_cookie_value(&response, CSRF_COOKIE_NAME),
        })
    }

    async fn login(&self, request: &LoginRequest) -> SyncResult<TokenResponse> {
        self.call(Self::json_request(&Route::Login, request)?).await
    }

    async fn signin(&self, request: &LoginRequest) -> SyncResult<TokenResponse> {
        self.call(Self::json_request(&Route::Signin, request)?).await
    }
}

fn set_cookie_value(response: &HttpResponse, name: &str) -> Option<String> {
    response
        .headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
        .find_map(|(_, v)| {
            let first = v.split(';').next()?;
            let (k, value) = first.trim().split_once('=')?;
            (k == name).then(|| value.to_string())
        })
}

/// A call recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportCall {
    /// `fetch_tasks(user_id)`.
    FetchTasks(String),
    /// `create_task(task.id)`.
    Create(String),
    /// `update_task(task.id)`.
    Update(String),
    /// `patch_task(id)`.
    Patch(String),
    /// `delete_task(id)`.
    Delete(String),
    /// `sync_tasks(user_id)`.
    SyncTasks(String),
    /// `ping()`.
    Ping,
    /// `csrf_token()`.
    CsrfToken,
    /// `login(username)`.
    Login(String),
    /// `signin(username)`.
    Signin(String),
}

/// Failure injected into a [`MockTransport`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// No response.
    Network,
    /// A response with this status.
    Status(u16),
}

impl MockFailure {
    fn into_error(self, task_id: Option<&str>) -> SyncError {
        match self {
            MockFailure::Network => SyncError::network("mock transport unreachable"),
            MockFailure::Status(status) => {
                let mut body = ErrorBody::new(format!("mock failure {status}"));
                if let Some(id) = task_id {
                    body = body.for_task(id);
                }
                let response = HttpResponse::json(status, &body)
                    .unwrap_or_else(|_| HttpResponse::new(status));
                SyncError::from_response(response)
            }
        }
    }
}

/// An in-memory record store for testing.
///
/// Holds the server-side task list, records every call, and fails calls on
/// demand.
#[derive(Debug)]
pub struct MockTransport {
    tasks: Mutex<Vec<Task>>,
    calls: Mutex<Vec<TransportCall>>,
    failures: Mutex<Vec<(TransportCall, MockFailure)>>,
    pings: Mutex<VecDeque<bool>>,
    reachable: AtomicBool,
    latency: Mutex<Duration>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a reachable mock with no tasks.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            pings: Mutex::new(VecDeque::new()),
            reachable: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Creates a mock holding `tasks` server-side.
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mock = Self::new();
        *mock.tasks.lock() = tasks
            .into_iter()
            .map(|t| t.with_status(SyncStatus::Synced))
            .collect();
        mock
    }

    /// Server-side tasks.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().clone()
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Calls other than pings received so far.
    pub fn task_calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| **c != TransportCall::Ping)
            .cloned()
            .collect()
    }

    /// Number of pings received.
    pub fn ping_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| **c == TransportCall::Ping)
            .count()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Makes every future `call` fail with `failure`.
    pub fn fail_on(&self, call: TransportCall, failure: MockFailure) {
        self.failures.lock().push((call, failure));
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Queues ping outcomes; once drained, pings follow reachability.
    pub fn script_pings(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.pings.lock().extend(outcomes);
    }

    /// Makes every call fail as unreachable, or restores it.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn enter(&self, call: TransportCall, task_id: Option<&str>) -> SyncResult<()> {
        self.calls.lock().push(call.clone());
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(MockFailure::Network.into_error(None));
        }
        self.check_failure(&call, task_id)
    }

    fn check_failure(&self, call: &TransportCall, task_id: Option<&str>) -> SyncResult<()> {
        let failure = self
            .failures
            .lock()
            .iter()
            .find(|(c, _)| c == call)
            .map(|(_, f)| *f);
        match failure {
            Some(failure) => Err(failure.into_error(task_id)),
            None => Ok(()),
        }
    }

    fn not_found(id: &str) -> SyncError {
        MockFailure::Status(404).into_error(Some(id))
    }

    fn upsert(&self, task: &Task, must_exist: bool) -> SyncResult<Task> {
        let stored = Task {
            sync_status: SyncStatus::Synced,
            deleted: false,
            ..task.clone()
        };
        let mut tasks = self.tasks.lock();
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = stored.clone(),
            None if must_exist => return Err(Self::not_found(&task.id)),
            None => tasks.push(stored.clone()),
        }
        Ok(stored)
    }

    fn remove(&self, id: &str) -> SyncResult<()> {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    fn list(&self, user_id: &str) -> Vec<Task> {
        self.tasks
            .lock()
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskTransport for MockTransport {
    async fn fetch_tasks(&self, user_id: &str) -> SyncResult<Vec<Task>> {
        self.enter(TransportCall::FetchTasks(user_id.to_string()), None)
            .await?;
        Ok(self.list(user_id))
    }

    async fn create_task(&self, task: &Task) -> SyncResult<Task> {
        self.enter(TransportCall::Create(task.id.clone()), Some(&task.id))
            .await?;
        self.upsert(task, false)
    }

    async fn update_task(&self, task: &Task) -> SyncResult<Task> {
        self.enter(TransportCall::Update(task.id.clone()), Some(&task.id))
            .await?;
        self.upsert(task, true)
    }

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> SyncResult<Task> {
        self.enter(TransportCall::Patch(id.to_string()), Some(id))
            .await?;
        let mut tasks = self.tasks.lock();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        task.apply_patch(patch);
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &str) -> SyncResult<()> {
        self.enter(TransportCall::Delete(id.to_string()), Some(id))
            .await?;
        self.remove(id)
    }

    async fn sync_tasks(&self, user_id: &str, tasks: &[Task]) -> SyncResult<Vec<Task>> {
        self.enter(TransportCall::SyncTasks(user_id.to_string()), None)
            .await?;
        let existing: HashSet<String> = self.list(user_id).into_iter().map(|t| t.id).collect();
        for op in plan_batch(tasks, &existing) {
            let id = op.task().id.as_str();
            let (call, result) = match op {
                PlannedOp::Delete(t) => (TransportCall::Delete(t.id.clone()), None),
                PlannedOp::Update(t) => (TransportCall::Update(t.id.clone()), Some((t, true))),
                PlannedOp::Create(t) => (TransportCall::Create(t.id.clone()), Some((t, false))),
                PlannedOp::Discard(_) => continue,
            };
            self.check_failure(&call, Some(id))?;
            match result {
                Some((task, must_exist)) => {
                    self.upsert(task, must_exist)?;
                }
                None => self.remove(id)?,
            }
        }
        Ok(self.list(user_id))
    }

    async fn ping(&self) -> SyncResult<()> {
        self.calls.lock().push(TransportCall::Ping);
        let scripted = self.pings.lock().pop_front();
        let ok = scripted.unwrap_or_else(|| self.reachable.load(Ordering::SeqCst));
        if ok {
            Ok(())
        } else {
            Err(MockFailure::Network.into_error(None))
        }
    }

    async fn csrf_token(&self) -> SyncResult<CsrfCredentials> {
        self.enter(TransportCall::CsrfToken, None).await?;
        Ok(CsrfCredentials {
            header_name: tasksync_protocol::DEFAULT_CSRF_HEADER.to_string(),
            token: "mock-csrf".to_string(),
            cookie: None,
        })
    }

    async fn login(&self, request: &LoginRequest) -> SyncResult<TokenResponse> {
        self.enter(TransportCall::Login(request.username.clone()), None)
            .await?;
        Ok(TokenResponse {
            token: format!("mock-token-{}", request.username),
            user_id: request.username.clone(),
        })
    }

    async fn signin(&self, request: &LoginRequest) -> SyncResult<TokenResponse> {
        self.enter(TransportCall::Signin(request.username.clone()), None)
            .await?;
        Ok(TokenResponse {
            token: format!("mock-token-{}", request.username),
            user_id: request.username.clone(),
        })
    }
}
