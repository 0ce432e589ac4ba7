//! The record store.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::repository::TaskRepository;
use std::sync::Arc;
use tasksync_protocol::{HttpRequest, HttpResponse};

/// The record store.
///
/// Answers [`HttpRequest`]s in-process. Serve it over TCP with
/// [`serve`](crate::serve).
///
/// # Example
///
/// ```
/// use tasksync_protocol::{HttpRequest, Method};
/// use tasksync_server::{ServerConfig, TaskServer};
///
/// let server = TaskServer::new(ServerConfig::default());
/// let response = server.handle(HttpRequest::new(Method::Get, "/generic/ping"));
/// assert_eq!(response.status, 200);
/// ```
pub struct TaskServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl TaskServer {
    /// Creates a server with an empty task table.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_repository(config, Arc::new(TaskRepository::new()))
    }

    /// Creates a server over an existing task table.
    pub fn with_repository(config: ServerConfig, repository: Arc<TaskRepository>) -> Self {
        let context = Arc::new(HandlerContext::new(config, repository));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles one request.
    pub fn handle(&self, request: HttpRequest) -> HttpResponse {
        self.handler.handle(&request)
    }

    /// Answers the next `count` requests with `status`, whatever they ask.
    pub fn fail_next(&self, count: usize, status: u16) {
        self.context.fail_next(count, status);
    }

    /// Registers a user directly, returning the user id.
    pub fn register_user(&self, username: &str, password: &str) -> ServerResult<String> {
        self.context.users.register(username, password)
    }

    /// Issues a bearer token for `user_id`.
    pub fn issue_token(&self, user_id: &str) -> ServerResult<String> {
        self.context.tokens.create_token(user_id)
    }

    /// The task table.
    pub fn repository(&self) -> &Arc<TaskRepository> {
        &self.context.repository
    }

    /// The configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}
