//! `list` command.

use anyhow::Context;
use std::path::PathBuf;
use tasksync_engine::SyncEngine;

/// Logs in, pushes whatever is staged in the data directory and prints the
/// resulting list.
pub async fn run(
    url: Option<String>,
    username: &str,
    password: &str,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = super::engine_config(url)?;
    if let Some(dir) = data_dir {
        config.data_dir = Some(dir);
    }
    let engine = SyncEngine::builder(config).build()?;

    engine.login(username, password).await.context("login failed")?;
    let staged = engine.pending_count();
    engine.go_online().await?;

    println!("{username} ({staged} staged change(s) pushed)");
    super::print_tasks(&engine.tasks());

    engine.go_offline().await?;
    Ok(())
}
