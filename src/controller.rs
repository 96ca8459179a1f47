//! Controller-side coordination
//!
//! The controller publishes the state envelope exactly once per run (a
//! re-publish is a permitted atomic overwrite), then optionally waits for a
//! quorum of worker acknowledgments before proceeding. Quorum failure is a
//! degraded outcome, not an error: the embedding system decides whether
//! partial readiness is acceptable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::CoordinationConfig;
use crate::dir::CoordinationDir;
use crate::envelope::StateEnvelope;
use crate::errors::{CoordinationError, Result};

/// Controller side of the coordination handshake
#[derive(Debug)]
pub struct ControllerCoordination {
    config: CoordinationConfig,
    dir: CoordinationDir,
    ready_marker: PathBuf,
    published: Option<StateEnvelope>,
}

impl ControllerCoordination {
    /// Create the controller handle and the coordination directory
    pub async fn new(root: impl AsRef<Path>, config: CoordinationConfig) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref();
        let dir = CoordinationDir::new(root, &config);
        dir.ensure().await?;
        let ready_marker = config.ready_marker_path(root);
        Ok(Self {
            config,
            dir,
            ready_marker,
            published: None,
        })
    }

    /// Publish the state envelope for workers to pick up
    ///
    /// Stamps the payload with the current time and this process's id and
    /// writes it atomically to the well-known marker path. Calling this
    /// again overwrites the previous envelope; a worker that already read
    /// the first version will not see the second.
    pub async fn publish_state(&mut self, payload: Map<String, Value>) -> Result<StateEnvelope> {
        let (envelope, bytes) = StateEnvelope::publish(payload)?;

        if self.config.debug {
            debug!(path = %self.ready_marker.display(), "writing controller state");
        }
        self.dir.atomic_write(&self.ready_marker, &bytes).await?;

        info!(
            controller_pid = envelope.controller_pid,
            "controller state published"
        );
        self.published = Some(envelope.clone());
        Ok(envelope)
    }

    /// Wait until `expected_count` distinct workers have acknowledged
    ///
    /// Polls the marker listing with exponential backoff. Returns `true` if
    /// quorum was reached before `timeout`, `false` otherwise. An expected
    /// count of zero never polls.
    pub async fn wait_for_quorum(&self, expected_count: usize, timeout: Duration) -> bool {
        if expected_count == 0 {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::from_config(&self.config);

        info!(expected_count, ?timeout, "controller waiting for workers");

        while Instant::now() < deadline {
            let ready = self.dir.ready_workers();
            if ready.len() >= expected_count {
                info!(ready = ready.len(), "all workers ready");
                return true;
            }

            if self.config.debug {
                debug!(ready = ready.len(), expected_count, "workers ready");
            }
            backoff.wait().await;
        }

        let ready = self.dir.ready_workers();
        warn!(
            ready = ready.len(),
            expected_count,
            ?timeout,
            "worker quorum not reached before timeout"
        );
        false
    }

    /// Publish and confirm quorum in one step
    ///
    /// The high-level controller entry point: publishes the payload, then,
    /// if the worker count is known, waits up to
    /// [`DEFAULT_QUORUM_TIMEOUT`](crate::config::DEFAULT_QUORUM_TIMEOUT) for
    /// acknowledgments, logging a warning on partial quorum. Publish
    /// failures wrap as `ControllerNotReady`.
    pub async fn prepare_for_workers(
        &mut self,
        payload: Map<String, Value>,
        num_workers: Option<usize>,
    ) -> Result<StateEnvelope> {
        info!(?num_workers, "controller preparing state for workers");

        let envelope = self
            .publish_state(payload)
            .await
            .map_err(|e| CoordinationError::ControllerNotReady {
                reason: format!("failed to publish state: {e}"),
                source: Some(Box::new(e)),
            })?;

        if let Some(expected) = num_workers {
            let ok = self
                .wait_for_quorum(expected, crate::config::DEFAULT_QUORUM_TIMEOUT)
                .await;
            if !ok {
                warn!("not all workers acknowledged in time");
            }
        }

        Ok(envelope)
    }

    /// The envelope most recently published by this controller, if any
    pub fn published(&self) -> Option<&StateEnvelope> {
        self.published.as_ref()
    }

    /// The set of worker ids that have acknowledged so far
    pub fn ready_workers(&self) -> std::collections::HashSet<String> {
        self.dir.ready_workers()
    }

    /// Remove all worker acknowledgment markers, best-effort
    ///
    /// For reuse of the coordination directory between runs. Only call once
    /// every worker from the previous round has been credited or given up
    /// on.
    pub async fn reset_acknowledgments(&self) {
        self.dir.reset_acknowledgments().await;
    }

    /// Remove the coordination directory, best-effort
    pub async fn cleanup(&self) {
        self.dir.remove().await;
    }
}
