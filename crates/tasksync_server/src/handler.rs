//! Request handling, independent of the HTTP stack.

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::repository::TaskRepository;
use crate::users::UserStore;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tasksync_protocol::{
    CsrfTokenResponse, ErrorBody, HttpRequest, HttpResponse, LoginRequest, PingResponse, Route,
    Task, TaskPatch, TokenResponse, CSRF_COOKIE_NAME,
};
use tracing::{debug, warn};

/// Shared state of the request handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Task table.
    pub repository: Arc<TaskRepository>,
    /// Registered users.
    pub users: UserStore,
    /// Token issuer.
    pub tokens: TokenValidator,
    faults: Mutex<VecDeque<u16>>,
}

impl HandlerContext {
    /// Creates a context over `repository`.
    pub fn new(config: ServerConfig, repository: Arc<TaskRepository>) -> Self {
        let tokens = TokenValidator::new(config.secret.clone(), config.token_expiry);
        Self {
            config,
            repository,
            users: UserStore::new(),
            tokens,
            faults: Mutex::new(VecDeque::new()),
        }
    }

    /// Answers the next `count` requests with `status`.
    pub fn fail_next(&self, count: usize, status: u16) {
        self.faults
            .lock()
            .extend(std::iter::repeat(status).take(count));
    }

    fn next_fault(&self) -> Option<u16> {
        self.faults.lock().pop_front()
    }
}

/// A handling failure, optionally attributed to one task of a batch.
#[derive(Debug)]
struct Failure {
    error: ServerError,
    task_id: Option<String>,
}

impl From<ServerError> for Failure {
    fn from(error: ServerError) -> Self {
        Self {
            error,
            task_id: None,
        }
    }
}

/// Turns requests into responses.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles one request. Failures become error responses with an
    /// [`ErrorBody`].
    pub fn handle(&self, request: &HttpRequest) -> HttpResponse {
        match self.dispatch(request) {
            Ok(response) => {
                debug!(
                    method = %request.method,
                    path = request.route_path(),
                    status = response.status,
                    "request handled"
                );
                response
            }
            Err(Failure { error, task_id }) => {
                let status = error.status();
                if error.is_server_error() {
                    warn!(method = %request.method, path = request.route_path(), status, %error, "request failed");
                } else {
                    debug!(method = %request.method, path = request.route_path(), status, %error, "request rejected");
                }
                let mut body = ErrorBody::new(error.to_string());
                if let Some(id) = task_id {
                    body = body.for_task(id);
                }
                HttpResponse::json(status, &body)
                    .unwrap_or_else(|_| HttpResponse::with_body(status, error.to_string()))
            }
        }
    }

    fn dispatch(&self, request: &HttpRequest) -> Result<HttpResponse, Failure> {
        if let Some(status) = self.context.next_fault() {
            return Err(ServerError::Injected(status).into());
        }

        let path = request.route_path();
        let route = Route::parse(request.method, path)
            .ok_or_else(|| ServerError::NotFound(format!("{} {path}", request.method)))?;
        let caller = self.authenticate(&route, request)?;
        self.check_csrf(&route, request)?;

        let repo = &self.context.repository;
        let response = match route {
            Route::Ping => json(200, &PingResponse::pong())?,
            Route::CsrfToken => {
                let token = self.context.tokens.create_csrf()?;
                let body = CsrfTokenResponse {
                    csrf_token: token.clone(),
                    header_name: self.context.config.csrf_header.clone(),
                };
                json(200, &body)?.with_header(
                    "set-cookie",
                    format!("{CSRF_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Strict"),
                )
            }
            Route::Login => {
                let login: LoginRequest = decode(request)?;
                let user_id = self.context.users.verify(&login.username, &login.password)?;
                self.token_response(user_id)?
            }
            Route::Signin => {
                let login: LoginRequest = decode(request)?;
                let user_id = self.context.users.register(&login.username, &login.password)?;
                self.token_response(user_id)?
            }
            Route::FetchTasks { user_id } => {
                authorize_user(&caller, &user_id)?;
                json(200, &repo.list(&user_id))?
            }
            Route::CreateTask => {
                let task: Task = decode(request)?;
                authorize_user(&caller, &task.user_id)?;
                json(201, &repo.create(task)?)?
            }
            Route::UpdateTask => {
                let task: Task = decode(request)?;
                authorize_user(&caller, &task.user_id)?;
                self.authorize_task(&caller, &task.id)?;
                json(200, &repo.update(task)?)?
            }
            Route::PatchTask { id } => {
                let patch: TaskPatch = decode(request)?;
                self.authorize_task(&caller, &id)?;
                json(200, &repo.patch(&id, &patch)?)?
            }
            Route::DeleteTask { id } => {
                self.authorize_task(&caller, &id)?;
                repo.delete(&id)?;
                HttpResponse::new(204)
            }
            Route::SyncTasks { user_id } => {
                authorize_user(&caller, &user_id)?;
                let batch: Vec<Task> = decode(request)?;
                if let Some(foreign) = batch.iter().find(|t| t.user_id != user_id) {
                    return Err(Failure {
                        error: ServerError::Forbidden("task belongs to another user".into()),
                        task_id: Some(foreign.id.clone()),
                    });
                }
                let list = repo
                    .apply_batch(&user_id, &batch)
                    .map_err(|(task_id, error)| Failure {
                        error,
                        task_id: Some(task_id),
                    })?;
                json(200, &list)?
            }
        };
        Ok(response)
    }

    /// Returns the caller's user id when authentication applies.
    fn authenticate(&self, route: &Route, request: &HttpRequest) -> ServerResult<Option<String>> {
        if !self.context.config.require_auth || !route.requires_auth() {
            return Ok(None);
        }
        let token = request
            .bearer_token()
            .ok_or_else(|| ServerError::NotAuthenticated("missing bearer token".into()))?;
        self.context.tokens.validate_token(token).map(Some)
    }

    fn check_csrf(&self, route: &Route, request: &HttpRequest) -> ServerResult<()> {
        if !self.context.config.require_csrf || !route.requires_csrf() {
            return Ok(());
        }
        self.context.tokens.validate_csrf(
            request.header(&self.context.config.csrf_header),
            request.cookie(CSRF_COOKIE_NAME),
        )
    }

    fn authorize_task(&self, caller: &Option<String>, id: &str) -> ServerResult<()> {
        match self.context.repository.get(id) {
            Some(task) => authorize_user(caller, &task.user_id),
            None => Err(ServerError::NotFound(format!("task {id}"))),
        }
    }

    fn token_response(&self, user_id: String) -> ServerResult<HttpResponse> {
        let token = self.context.tokens.create_token(&user_id)?;
        json(200, &TokenResponse { token, user_id })
    }
}

fn authorize_user(caller: &Option<String>, user_id: &str) -> ServerResult<()> {
    match caller {
        Some(caller) if caller != user_id => {
            Err(ServerError::Forbidden("task belongs to another user".into()))
        }
        _ => Ok(()),
    }
}

fn decode<T: DeserializeOwned>(request: &HttpRequest) -> ServerResult<T> {
    request
        .decode_json()
        .map_err(|e| ServerError::InvalidRequest(e.to_string()))
}

fn json<T: Serialize + ?Sized>(status: u16, body: &T) -> ServerResult<HttpResponse> {
    HttpResponse::json(status, body).map_err(|e| ServerError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_protocol::Method;

    fn handler(config: ServerConfig) -> (RequestHandler, Arc<HandlerContext>) {
        let context = Arc::new(HandlerContext::new(config, Arc::new(TaskRepository::new())));
        (RequestHandler::new(Arc::clone(&context)), context)
    }

    fn open() -> (RequestHandler, Arc<HandlerContext>) {
        handler(ServerConfig::default().without_auth())
    }

    fn post(path: &str, body: &impl Serialize) -> HttpRequest {
        HttpRequest::json(Method::Post, path, body).unwrap()
    }

    fn error_of(response: &HttpResponse) -> ErrorBody {
        response.decode_json().unwrap()
    }

    #[test]
    fn ping() {
        let (h, _) = handler(ServerConfig::default());
        let response = h.handle(&HttpRequest::new(Method::Get, "/generic/ping"));
        assert_eq!(response.status, 200);
        assert_eq!(response.decode_json::<PingResponse>().unwrap(), PingResponse::pong());
    }

    #[test]
    fn unknown_route_is_404() {
        let (h, _) = open();
        let response = h.handle(&HttpRequest::new(Method::Get, "/nope/a/b"));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn create_validates_body() {
        let (h, _) = open();
        let missing_priority = HttpRequest::new(Method::Post, "/task")
            .with_body(br#"{"id":"1","userId":"u1","displayName":"a"}"#.to_vec());
        assert_eq!(h.handle(&missing_priority).status, 400);

        let empty_name = post("/task", &Task::new("u1", "", 1));
        assert_eq!(h.handle(&empty_name).status, 400);

        assert_eq!(h.handle(&post("/task", &Task::new("u1", "a", 1))).status, 201);
        let duplicate = h.handle(&post("/task", &Task::new("u1", "a", 2)));
        assert_eq!(duplicate.status, 422);
    }

    #[test]
    fn task_lifecycle() {
        let (h, context) = open();
        let task = Task::new("u1", "a", 1).with_id("t1");
        assert_eq!(h.handle(&post("/task", &task)).status, 201);

        let patch = HttpRequest::json(Method::Patch, "/task/t1", &TaskPatch::done(true)).unwrap();
        let patched: Task = h.handle(&patch).decode_json().unwrap();
        assert!(patched.done);

        let listed: Vec<Task> = h
            .handle(&HttpRequest::new(Method::Get, "/task/u1"))
            .decode_json()
            .unwrap();
        assert_eq!(listed, vec![patched]);

        let deleted = h.handle(&HttpRequest::new(Method::Delete, "/task/t1"));
        assert_eq!(deleted.status, 204);
        assert!(context.repository.is_empty());
        let again = h.handle(&HttpRequest::new(Method::Delete, "/task/t1"));
        assert_eq!(again.status, 404);
    }

    #[test]
    fn sync_failure_names_task() {
        let (h, context) = open();
        context.repository.create(Task::new("u1", "taken", 1).with_id("1")).unwrap();
        let batch = vec![Task::new("u1", "taken", 1).with_id("2")];

        let response = h.handle(&post("/task/sync/u1", &batch));
        assert_eq!(response.status, 422);
        assert_eq!(error_of(&response).task_id.as_deref(), Some("2"));
    }

    #[test]
    fn injected_faults_come_first() {
        let (h, context) = open();
        context.fail_next(2, 503);
        let ping = HttpRequest::new(Method::Get, "/generic/ping");
        assert_eq!(h.handle(&ping).status, 503);
        assert_eq!(h.handle(&ping).status, 503);
        assert_eq!(h.handle(&ping).status, 200);
    }

    #[test]
    fn auth_and_csrf_are_enforced() {
        let (h, _) = handler(ServerConfig::default());

        let signin = h.handle(&post("/auth/signin", &LoginRequest::new("alice", "pw")));
        assert_eq!(signin.status, 200);
        let token: TokenResponse = signin.decode_json().unwrap();

        let list = HttpRequest::new(Method::Get, format!("/task/{}", token.user_id));
        assert_eq!(h.handle(&list).status, 401);
        let authed = list.with_header("authorization", format!("Bearer {}", token.token));
        assert_eq!(h.handle(&authed).status, 200);

        let other_user = HttpRequest::new(Method::Get, "/task/someone-else")
            .with_header("authorization", format!("Bearer {}", token.token));
        assert_eq!(h.handle(&other_user).status, 403);

        let task = Task::new(token.user_id.clone(), "a", 1);
        let create = post("/task", &task)
            .with_header("authorization", format!("Bearer {}", token.token));
        assert_eq!(h.handle(&create).status, 403);

        let csrf = h.handle(&HttpRequest::new(Method::Get, "/token/csrf-token"));
        let body: CsrfTokenResponse = csrf.decode_json().unwrap();
        assert!(csrf.header("set-cookie").unwrap().starts_with("csrf_token="));
        let create = create
            .with_header(body.header_name, body.csrf_token.clone())
            .with_header("cookie", format!("csrf_token={}", body.csrf_token));
        assert_eq!(h.handle(&create).status, 201);
    }

    #[test]
    fn bad_login_is_401() {
        let (h, _) = handler(ServerConfig::default());
        h.handle(&post("/auth/signin", &LoginRequest::new("alice", "pw")));
        let response = h.handle(&post("/auth/login", &LoginRequest::new("alice", "nope")));
        assert_eq!(response.status, 401);
        let response = h.handle(&post("/auth/login", &LoginRequest::new("alice", "pw")));
        assert_eq!(response.status, 200);
    }
}
