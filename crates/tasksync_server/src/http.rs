//! Serving the record store over TCP with axum.

use crate::error::ServerResult;
use crate::server::TaskServer;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tasksync_protocol::{HttpRequest, HttpResponse, Method};
use tokio::net::TcpListener;
use tracing::info;

/// Builds a router sending every request to `server`.
pub fn router(server: Arc<TaskServer>) -> Router {
    Router::new().fallback(dispatch).with_state(server)
}

/// Serves `server` on `listener` until the process exits.
pub async fn serve(server: Arc<TaskServer>, listener: TcpListener) -> ServerResult<()> {
    info!(addr = %listener.local_addr()?, "record store listening");
    axum::serve(listener, router(server)).await?;
    Ok(())
}

/// Serves `server` on `listener` until `shutdown` completes.
pub async fn serve_with_shutdown(
    server: Arc<TaskServer>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> ServerResult<()> {
    info!(addr = %listener.local_addr()?, "record store listening");
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("record store stopped");
    Ok(())
}

async fn dispatch(
    State(server): State<Arc<TaskServer>>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(method) = method.as_str().parse::<Method>() else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let path = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());

    let mut request = HttpRequest::new(method, path);
    request.headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    if !body.is_empty() {
        request.body = Some(body.to_vec());
    }

    into_response(server.handle(request))
}

fn into_response(response: HttpResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    (status, headers, response.body).into_response()
}
