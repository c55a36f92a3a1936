pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "readsync")]
#[command(about = "Offline-first reading progress sync", long_about = None)]
pub struct Cli {
    /// Database file (default: <data dir>/readsync/readsync.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file (default: ~/.config/readsync/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Bearer token for the sync service
    #[arg(long, env = "READSYNC_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sync daemon, reading one JSON message per stdin line
    Run {
        /// Retry interval for queued updates (e.g., "30s", "5m")
        #[arg(short, long)]
        retry_interval: Option<String>,

        /// Skip the reconcile and drain on start
        #[arg(long)]
        no_initial_drain: bool,
    },
    /// Ingest a single progress message (envelope or bare payload)
    Ingest {
        /// JSON message
        json: String,
    },
    /// Reconcile unsynced positions and send every queued update
    Drain,
    /// Show connectivity, pending updates and position store usage
    Status,
    /// List stored reading positions
    Positions {
        /// Only show positions not yet confirmed by the server
        #[arg(long)]
        unsynced: bool,
    },
    /// Delete positions already confirmed by the server
    Prune,
}
