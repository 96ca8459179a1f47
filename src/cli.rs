//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// syncpoint - file-based controller/worker startup coordination
#[derive(Parser)]
#[command(
    name = "syncpoint",
    about = "Coordinate shared startup state between a controller and worker processes",
    version
)]
pub struct Cli {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Publish controller state and optionally wait for worker quorum
    Publish {
        /// Project root the coordination directory lives under
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Payload JSON file to embed in the envelope ("-" for stdin)
        #[arg(long)]
        payload: Option<PathBuf>,

        /// Number of workers to wait for after publishing
        #[arg(long)]
        expect: Option<usize>,

        /// Quorum wait timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Wait for controller state as a worker and acknowledge it
    Wait {
        /// Project root the coordination directory lives under
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// This worker's identifier (e.g. gw0)
        #[arg(long)]
        worker_id: String,

        /// Wait timeout in seconds (default from SYNCPOINT_WORKER_TIMEOUT)
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Show the envelope state and the ready-worker set
    Status {
        /// Project root the coordination directory lives under
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Remove the coordination directory
    Cleanup {
        /// Project root the coordination directory lives under
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}
