//! syncpoint - CLI entry point
//!
//! Drives the coordination protocol from scripts: publish controller state,
//! wait as a worker, inspect the directory, clean up.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use serde_json::{Map, Value};
use tracing::warn;

use syncpoint::cli::{Cli, Command};
use syncpoint::config::DEFAULT_QUORUM_TIMEOUT;
use syncpoint::envelope::{read_envelope, EnvelopeRead};
use syncpoint::{ControllerCoordination, CoordinationConfig, CoordinationDir, WorkerCoordination};

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let level = match cli_log_level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

fn load_payload(path: Option<&Path>) -> Result<Map<String, Value>> {
    let bytes = match path {
        None => return Ok(Map::new()),
        Some(p) if p == Path::new("-") => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read payload from stdin")?;
            buf
        }
        Some(p) => std::fs::read(p).context(format!("Failed to read payload from {}", p.display()))?,
    };

    let value: Value = serde_json::from_slice(&bytes).context("Payload is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(eyre::eyre!("Payload must be a JSON object")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = CoordinationConfig::from_env();

    match cli.command {
        Command::Publish {
            root,
            payload,
            expect,
            timeout,
        } => {
            let payload = load_payload(payload.as_deref())?;
            let mut controller = ControllerCoordination::new(&root, config)
                .await
                .context("Failed to initialize controller coordination")?;

            let envelope = controller
                .publish_state(payload)
                .await
                .context("Failed to publish controller state")?;
            println!("published (controller_pid {})", envelope.controller_pid);

            if let Some(expected) = expect {
                let timeout = timeout
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .unwrap_or(DEFAULT_QUORUM_TIMEOUT);
                let ok = controller.wait_for_quorum(expected, timeout).await;
                let ready = controller.ready_workers().len();
                println!("workers ready: {ready}/{expected}");
                if !ok {
                    std::process::exit(1);
                }
            }
        }

        Command::Wait {
            root,
            worker_id,
            timeout,
        } => {
            let mut worker = WorkerCoordination::new(worker_id.as_str(), &root, config)
                .await
                .context("Failed to initialize worker coordination")?;

            let envelope = worker
                .wait_for_envelope(timeout.and_then(|secs| Duration::try_from_secs_f64(secs).ok()))
                .await
                .context(format!("Worker {worker_id} did not receive controller state"))?;

            let doc = serde_json::to_string_pretty(&Value::Object(envelope.payload().clone()))
                .context("Failed to render payload")?;
            println!("{doc}");
        }

        Command::Status { root } => {
            let marker = config.ready_marker_path(&root);
            match read_envelope(&marker, config.max_state_age).await {
                Ok(EnvelopeRead::Absent) => println!("envelope: absent"),
                Ok(EnvelopeRead::Stale(envelope)) => {
                    println!(
                        "envelope: stale (age {:?}, controller_pid {})",
                        envelope.age(),
                        envelope.controller_pid
                    );
                }
                Ok(EnvelopeRead::Valid(envelope)) => {
                    println!(
                        "envelope: valid (age {:?}, controller_pid {})",
                        envelope.age(),
                        envelope.controller_pid
                    );
                }
                Err(e) => {
                    warn!(error = %e, "could not read envelope");
                    println!("envelope: unreadable ({e})");
                }
            }

            let dir = CoordinationDir::new(&root, &config);
            let mut ready: Vec<String> = dir.ready_workers().into_iter().collect();
            ready.sort();
            println!("workers ready: {}", ready.len());
            for worker_id in ready {
                println!("  {worker_id}");
            }
        }

        Command::Cleanup { root } => {
            let dir = CoordinationDir::new(&root, &config);
            dir.remove().await;
            println!("removed {}", dir.path().display());
        }
    }

    Ok(())
}
