//! `serve` command.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tasksync_server::{ServerConfig, TaskServer};
use tokio::net::TcpListener;
use tracing::info;

/// Secret used to sign tokens, shared by restarts when set.
const SECRET_VAR: &str = "TASKSYNC_SERVER_SECRET";

/// Runs the record store until Ctrl-C.
pub async fn run(bind: SocketAddr, require_auth: bool, require_csrf: bool) -> anyhow::Result<()> {
    let mut config = ServerConfig::new(bind).with_csrf(require_csrf);
    if !require_auth {
        config = config.without_auth();
    }
    if let Ok(secret) = std::env::var(SECRET_VAR) {
        config = config.with_secret(secret.into_bytes());
    }

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("cannot listen on {bind}"))?;
    let server = Arc::new(TaskServer::new(config));

    tasksync_server::serve_with_shutdown(server, listener, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await?;
    Ok(())
}
