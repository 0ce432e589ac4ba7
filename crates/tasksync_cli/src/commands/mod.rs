//! CLI command implementations.

pub mod demo;
pub mod list;
pub mod ping;
pub mod serve;

use anyhow::Context;
use tasksync_engine::EngineConfig;
use tasksync_protocol::Task;

/// Reads the engine configuration from the environment, overriding the
/// server URL when one was given on the command line.
pub fn engine_config(url: Option<String>) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::from_env().context("invalid TASKSYNC_* environment")?;
    if let Some(url) = url {
        config.server_url = url;
    }
    Ok(config)
}

/// Prints a task list, one task per line.
pub fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("  (no tasks)");
        return;
    }
    for task in tasks {
        let mark = if task.done { "x" } else { " " };
        println!(
            "  [{mark}] {:<24} p{} {:?}",
            task.display_name, task.priority, task.sync_status
        );
    }
}
