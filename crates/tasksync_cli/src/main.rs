//! tasksync CLI
//!
//! Command-line tools for the tasksync engine and record store.
//!
//! # Commands
//!
//! - `serve` - Run the reference record store
//! - `ping` - Check that a record store answers
//! - `list` - Log in, reconcile and print a user's tasks
//! - `demo` - Walk through an offline session against an in-process store

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tasksync command-line tools.
#[derive(Parser)]
#[command(name = "tasksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reference record store
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Accept task requests without a bearer token
        #[arg(long)]
        no_auth: bool,

        /// Do not require anti-forgery tokens
        #[arg(long)]
        no_csrf: bool,
    },

    /// Check that a record store answers
    Ping {
        /// Base URL of the record store (defaults to TASKSYNC_SERVER_URL)
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Log in, reconcile staged changes and print the task list
    List {
        /// Base URL of the record store (defaults to TASKSYNC_SERVER_URL)
        #[arg(long)]
        url: Option<String>,

        /// Account name
        #[arg(short, long)]
        username: String,

        /// Account password
        #[arg(short, long)]
        password: String,

        /// Directory holding staged changes (defaults to TASKSYNC_DATA_DIR)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Walk through an offline session against an in-process store
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tasksync=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            no_auth,
            no_csrf,
        } => commands::serve::run(bind, !no_auth, !no_csrf).await?,
        Commands::Ping { url } => commands::ping::run(url).await?,
        Commands::List {
            url,
            username,
            password,
            data_dir,
        } => commands::list::run(url, &username, &password, data_dir).await?,
        Commands::Demo => commands::demo::run().await?,
    }

    Ok(())
}
