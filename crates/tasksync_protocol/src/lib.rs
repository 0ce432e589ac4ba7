//! # tasksync protocol
//!
//! Task model and wire types shared by the tasksync client engine and the
//! reference record-store server.
//!
//! This crate provides:
//! - [`Task`] and [`SyncStatus`], the records being synchronized
//! - Request/response bodies for the HTTP surface
//! - [`Route`], the table of endpoints and how they map to paths
//! - [`HttpRequest`]/[`HttpResponse`], transport-neutral HTTP values
//! - [`plan_batch`], the ordering rules for reconciling a staged batch
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod http;
mod messages;
mod plan;
mod route;
mod task;

pub use error::{ProtocolError, ProtocolResult};
pub use http::{
    HttpRequest, HttpResponse, Method, AUTHORIZATION_HEADER, CONTENT_TYPE_JSON,
    CSRF_COOKIE_NAME, DEFAULT_CSRF_HEADER,
};
pub use messages::{CsrfTokenResponse, ErrorBody, LoginRequest, PingResponse, TokenResponse};
pub use plan::{plan_batch, PlannedOp};
pub use route::Route;
pub use task::{SyncStatus, Task, TaskPatch};
