//! `ping` command.

use tasksync_engine::SyncEngine;

/// Sends one liveness ping.
pub async fn run(url: Option<String>) -> anyhow::Result<()> {
    let config = super::engine_config(url)?;
    let engine = SyncEngine::builder(config).build()?;

    if engine.ping().await {
        println!("✓ {} is reachable", engine.config().server_url);
        Ok(())
    } else {
        anyhow::bail!("{} did not answer", engine.config().server_url)
    }
}
