use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "deadman-server", version, about = "Dead man's switch monitor: check-in endpoint and missed-ping alerts")]
pub struct Cli {
    /// Config file (created with defaults if missing)
    #[arg(long, short, global = true, env = "DEADMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default log level; RUST_LOG overrides it
    #[arg(long, global = true, env = "DEADMAN_LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP check-in endpoint and the periodic scanner (default)
    Serve {
        /// Keep monitors in memory instead of the configured database
        #[arg(long)]
        memory: bool,
    },
    /// Run a single missed-check sweep and deliver its alerts
    ScanOnce,
    /// Register a new monitor
    AddMonitor(AddMonitorArgs),
    /// Print the liveness status of a monitor
    Status { id: Uuid },
    /// Print the effective configuration
    ShowConfig,
}

#[derive(Args)]
pub struct AddMonitorArgs {
    #[arg(long)]
    pub name: String,
    /// Expected seconds between check-ins
    #[arg(long)]
    pub interval: u64,
    /// Extra seconds tolerated after the interval; defaults to the configured grace period
    #[arg(long)]
    pub grace: Option<u64>,
    #[arg(long, default_value = "local")]
    pub owner: String,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub webhook: Option<String>,
    /// Stop watching after this instant (RFC 3339)
    #[arg(long)]
    pub expires_at: Option<DateTime<Utc>>,
}
