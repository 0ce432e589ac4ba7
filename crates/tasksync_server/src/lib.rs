//! # tasksync server
//!
//! Reference record store for the tasksync engine.
//!
//! This crate provides:
//! - Task endpoints (list, create, update, patch, delete, bulk sync)
//! - Authentication (HMAC-SHA256 bearer tokens, salted password hashes)
//! - Anti-forgery tokens (signed, double-submit cookie)
//! - Fault injection for tests
//!
//! # Architecture
//!
//! [`RequestHandler`] turns a transport-neutral `HttpRequest` into an
//! `HttpResponse`. [`TaskServer`] wraps it for in-process use, and [`serve`]
//! puts it behind axum on a TCP listener.
//!
//! # Authentication
//!
//! Enabled by default. Clients log in or sign in, then send
//! `Authorization: Bearer <token>` with every task request. Mutating task
//! requests must also echo the token from `GET /token/csrf-token` in the
//! anti-forgery header and cookie.
//!
//! ```rust,ignore
//! use tasksync_server::{ServerConfig, TaskServer};
//!
//! let server = TaskServer::new(ServerConfig::default().with_secret(b"shared".to_vec()));
//! let user_id = server.register_user("alice", "secret")?;
//! let token = server.issue_token(&user_id)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod http;
mod repository;
mod server;
mod users;

pub use auth::TokenValidator;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use http::{router, serve, serve_with_shutdown};
pub use repository::TaskRepository;
pub use server::TaskServer;
pub use users::UserStore;
