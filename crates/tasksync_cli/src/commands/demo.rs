//! `demo` command.
//!
//! Runs the engine against an in-process record store: works offline, goes
//! online, loses the network and comes back.

use std::sync::Arc;
use std::time::Duration;
use tasksync_engine::{
    EngineConfig, LoopbackClient, LoopbackServer, RetryPolicy, StoreMode, SyncEngine,
};
use tasksync_protocol::{HttpRequest, HttpResponse};
use tasksync_server::{ServerConfig, TaskServer};

struct InProcess(Arc<TaskServer>);

impl LoopbackServer for InProcess {
    fn handle(&self, request: HttpRequest) -> HttpResponse {
        self.0.handle(request)
    }
}

/// Runs the walkthrough.
pub async fn run() -> anyhow::Result<()> {
    let server = Arc::new(TaskServer::new(ServerConfig::default()));
    let client = Arc::new(LoopbackClient::new(InProcess(Arc::clone(&server))));

    let config = EngineConfig::new("http://in-process")
        .with_retry(RetryPolicy::new(2, Duration::from_millis(10)))
        .with_reconnect(Duration::from_millis(200), 10);
    let engine = SyncEngine::builder(config)
        .http_client(client.clone())
        .build()?;
    engine.on_reconnect("demo", || println!("→ reconnected"));

    engine.signin("demo", "demo").await?;
    println!("signed in, mode {}", engine.mode());

    engine.add_task("write report", 2).await?;
    let milk = engine.add_task("buy milk", 1).await?;
    engine.set_done(&milk.id, true).await?;
    println!("offline, {} staged change(s):", engine.pending_count());
    super::print_tasks(&engine.tasks());

    engine.go_online().await?;
    println!("online, mode {}:", engine.mode());
    super::print_tasks(&engine.tasks());

    client.set_reachable(false);
    engine.add_task("call bob", 3).await?;
    engine.network_changed(false);
    println!("network lost, mode {}:", engine.mode());
    super::print_tasks(&engine.tasks());

    client.set_reachable(true);
    engine.network_changed(true);
    for _ in 0..50 {
        if engine.mode() == StoreMode::Online {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("mode {}:", engine.mode());
    super::print_tasks(&engine.tasks());
    println!("server holds {} task(s)", server.repository().len());

    engine.logout().await?;
    Ok(())
}
