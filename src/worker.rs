//! Worker-side coordination
//!
//! Each worker polls for a valid controller envelope, acknowledges it by
//! touching its own marker file, and only then returns the payload to its
//! caller. The ack-before-return ordering is what makes the controller's
//! quorum count mean "workers that actually observed valid state".

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::CoordinationConfig;
use crate::dir::CoordinationDir;
use crate::envelope::{read_envelope, EnvelopeRead, StateEnvelope};
use crate::errors::{CoordinationError, Result};

/// Worker side of the coordination handshake
///
/// The worker id is an opaque token assigned by the process launcher (e.g.
/// a slot name like `gw0` or an index). Uniqueness is the launcher's
/// responsibility: two workers sharing an id would alias the same
/// acknowledgment marker and the controller would undercount.
#[derive(Debug)]
pub struct WorkerCoordination {
    worker_id: String,
    config: CoordinationConfig,
    dir: CoordinationDir,
    ready_marker: PathBuf,
    ack_path: PathBuf,
    state: Option<StateEnvelope>,
}

impl WorkerCoordination {
    /// Create the worker handle; creates the coordination directory since a
    /// worker may start before the controller has
    pub async fn new(worker_id: impl Into<String>, root: impl AsRef<Path>, config: CoordinationConfig) -> Result<Self> {
        config.validate()?;
        let worker_id = worker_id.into();
        let root = root.as_ref();
        let dir = CoordinationDir::new(root, &config);
        dir.ensure().await?;
        let ready_marker = config.ready_marker_path(root);
        let ack_path = config.worker_ack_path(root, &worker_id);
        Ok(Self {
            worker_id,
            config,
            dir,
            ready_marker,
            ack_path,
            state: None,
        })
    }

    /// Block until a valid envelope is published, then acknowledge it
    ///
    /// A missing envelope and a stale one are both "not yet valid"; stale
    /// finds are logged at warn so diagnostics can tell "never published"
    /// from "published but expired". The acknowledgment marker is written
    /// before this returns. `None` uses the configured worker timeout.
    pub async fn wait_for_envelope(&mut self, timeout: Option<Duration>) -> Result<StateEnvelope> {
        let timeout = timeout.unwrap_or(self.config.worker_timeout);
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::from_config(&self.config);

        info!(worker_id = %self.worker_id, ?timeout, "worker waiting for controller");

        while Instant::now() < deadline {
            match read_envelope(&self.ready_marker, self.config.max_state_age).await? {
                EnvelopeRead::Valid(envelope) => {
                    self.acknowledge().await?;
                    info!(
                        worker_id = %self.worker_id,
                        controller_pid = envelope.controller_pid,
                        "worker received controller state"
                    );
                    self.state = Some(envelope.clone());
                    return Ok(envelope);
                }
                EnvelopeRead::Stale(envelope) => {
                    warn!(
                        worker_id = %self.worker_id,
                        age = ?envelope.age(),
                        "found stale controller state, still waiting"
                    );
                }
                EnvelopeRead::Absent => {
                    if self.config.debug {
                        debug!(worker_id = %self.worker_id, "no controller state yet");
                    }
                }
            }
            backoff.wait().await;
        }

        Err(CoordinationError::Timeout {
            operation: "wait_for_envelope",
            timeout,
        })
    }

    /// Touch this worker's acknowledgment marker; idempotent
    async fn acknowledge(&self) -> Result<()> {
        if self.config.debug {
            debug!(worker_id = %self.worker_id, path = %self.ack_path.display(), "acknowledging ready");
        }
        self.dir.touch_marker(&self.ack_path).await
    }

    /// High-level worker entry point
    ///
    /// Waits for the envelope and retains it for the accessors. A timeout
    /// propagates as-is (callers fall back to uncoordinated mode on it);
    /// any other failure wraps as `WorkerNotReady`.
    pub async fn wait_and_initialize(&mut self, timeout: Option<Duration>) -> Result<StateEnvelope> {
        match self.wait_for_envelope(timeout).await {
            Ok(envelope) => Ok(envelope),
            Err(e @ CoordinationError::Timeout { .. }) => {
                error!(worker_id = %self.worker_id, "timeout waiting for controller");
                Err(e)
            }
            Err(e) => Err(CoordinationError::WorkerNotReady {
                worker_id: self.worker_id.clone(),
                reason: e.to_string(),
                source: Some(Box::new(e)),
            }),
        }
    }

    /// Whether a valid envelope has been observed and acknowledged
    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    /// This worker's identifier
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The observed envelope, once ready
    pub fn state(&self) -> Option<&StateEnvelope> {
        self.state.as_ref()
    }

    /// The observed payload, once ready; read-only
    pub fn payload(&self) -> Option<&Map<String, Value>> {
        self.state.as_ref().map(StateEnvelope::payload)
    }

    /// Well-known payload key passed through from the envelope
    pub fn environment_id(&self) -> Option<i64> {
        self.state.as_ref().and_then(StateEnvelope::environment_id)
    }

    /// Well-known payload key passed through from the envelope
    pub fn database_path(&self) -> Option<&str> {
        self.state.as_ref().and_then(StateEnvelope::database_path)
    }

    /// Look up an entry the controller precreated, once ready
    pub fn precreated(&self, key: &str) -> Option<&Value> {
        self.state.as_ref().and_then(|s| s.precreated(key))
    }
}

/// Initialize worker coordination if the feature is enabled
///
/// Convenience for embedding hooks: returns `None` when coordination is
/// disabled or when initialization fails, so the embedder continues in
/// uncoordinated mode instead of aborting startup.
pub async fn initialize_worker(
    worker_id: &str,
    root: &Path,
    config: &CoordinationConfig,
) -> Option<WorkerCoordination> {
    if !config.enabled {
        debug!("worker coordination disabled");
        return None;
    }

    let mut worker = match WorkerCoordination::new(worker_id, root, config.clone()).await {
        Ok(worker) => worker,
        Err(e) => {
            error!(worker_id, error = %e, "failed to set up worker coordination");
            return None;
        }
    };

    match worker.wait_and_initialize(None).await {
        Ok(_) => {
            info!(worker_id, "worker initialized with coordination");
            Some(worker)
        }
        Err(e) => {
            error!(worker_id, error = %e, "failed to initialize worker, continuing uncoordinated");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerCoordination;
    use serde_json::json;
    use tempfile::tempdir;

    fn test_config() -> CoordinationConfig {
        CoordinationConfig {
            enabled: true,
            check_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn payload() -> Map<String, Value> {
        let Value::Object(map) = json!({"environment_id": 7, "database_path": "/x/y.db"}) else {
            unreachable!()
        };
        map
    }

    #[tokio::test]
    async fn test_wait_times_out_without_publish() {
        let temp = tempdir().unwrap();
        let mut worker = WorkerCoordination::new("gw0", temp.path(), test_config()).await.unwrap();

        let err = worker
            .wait_for_envelope(Some(Duration::from_millis(80)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(!worker.is_ready());
    }

    #[tokio::test]
    async fn test_wait_finds_published_state_and_acknowledges() {
        let temp = tempdir().unwrap();
        let config = test_config();

        let mut controller = ControllerCoordination::new(temp.path(), config.clone()).await.unwrap();
        controller.publish_state(payload()).await.unwrap();

        let mut worker = WorkerCoordination::new("gw1", temp.path(), config.clone()).await.unwrap();
        worker.wait_for_envelope(None).await.unwrap();

        assert!(worker.is_ready());
        assert_eq!(worker.environment_id(), Some(7));
        assert_eq!(worker.database_path(), Some("/x/y.db"));
        assert!(config.worker_ack_path(temp.path(), "gw1").exists());
    }

    #[tokio::test]
    async fn test_stale_envelope_is_not_bound() {
        // The wait loop logs the stale age; run with logging active so the
        // field expressions are actually evaluated
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(std::io::sink)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let temp = tempdir().unwrap();
        let config = test_config();

        let mut worker = WorkerCoordination::new("gw2", temp.path(), config.clone()).await.unwrap();

        // An envelope left behind by a long-gone run, with a garbage
        // timestamp whose age exceeds what a Duration can represent
        let stale = json!({"timestamp": -1e300, "controller_pid": 1, "environment_id": 9});
        tokio::fs::write(
            config.ready_marker_path(temp.path()),
            serde_json::to_vec(&stale).unwrap(),
        )
        .await
        .unwrap();

        let err = worker
            .wait_for_envelope(Some(Duration::from_millis(80)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(worker.payload().is_none());
        assert!(!config.worker_ack_path(temp.path(), "gw2").exists());
    }

    #[tokio::test]
    async fn test_corrupt_envelope_wraps_as_worker_not_ready() {
        let temp = tempdir().unwrap();
        let config = test_config();

        let mut worker = WorkerCoordination::new("gw3", temp.path(), config.clone()).await.unwrap();
        tokio::fs::write(config.ready_marker_path(temp.path()), b"not json")
            .await
            .unwrap();

        let err = worker.wait_and_initialize(None).await.unwrap_err();
        match err {
            CoordinationError::WorkerNotReady { worker_id, source, .. } => {
                assert_eq!(worker_id, "gw3");
                assert!(source.unwrap().is_bad_state());
            }
            other => panic!("expected WorkerNotReady, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_initialize_worker_disabled_returns_none() {
        let temp = tempdir().unwrap();
        let config = CoordinationConfig {
            enabled: false,
            ..test_config()
        };
        let result = initialize_worker("gw0", temp.path(), &config).await;
        assert!(result.is_none());
        // Disabled coordination leaves no directory behind
        assert!(!config.coordination_dir(temp.path()).exists());
    }

    #[tokio::test]
    async fn test_initialize_worker_timeout_returns_none() {
        let temp = tempdir().unwrap();
        let config = CoordinationConfig {
            worker_timeout: Duration::from_millis(60),
            ..test_config()
        };
        let result = initialize_worker("gw0", temp.path(), &config).await;
        assert!(result.is_none());
    }
}
