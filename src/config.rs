//! Coordination configuration and well-known paths
//!
//! Every knob is overridable through the environment so the embedding system
//! can tune the protocol without a config file. The config is an explicit
//! value handed to each component constructor; there is no process-wide
//! singleton.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{CoordinationError, Result};

/// Feature flag: the protocol is inert unless this is set
pub const ENV_ENABLED: &str = "SYNCPOINT_ENABLED";
/// Verbose coordination logging
pub const ENV_DEBUG: &str = "SYNCPOINT_DEBUG";
/// Worker wait timeout, seconds
pub const ENV_WORKER_TIMEOUT: &str = "SYNCPOINT_WORKER_TIMEOUT";
/// Initial poll interval, seconds
pub const ENV_CHECK_INTERVAL: &str = "SYNCPOINT_CHECK_INTERVAL";
/// Backoff multiplier applied between polls
pub const ENV_BACKOFF_FACTOR: &str = "SYNCPOINT_BACKOFF_FACTOR";
/// Poll interval cap, seconds
pub const ENV_MAX_INTERVAL: &str = "SYNCPOINT_MAX_INTERVAL";
/// Maximum envelope age before it is considered stale, seconds
pub const ENV_MAX_STATE_AGE: &str = "SYNCPOINT_MAX_STATE_AGE";

/// Name of the coordination directory under the project root
pub const COORDINATION_DIR_NAME: &str = ".syncpoint";
/// Envelope file name inside the coordination directory
pub const READY_MARKER_NAME: &str = "controller_ready.json";

const WORKER_ACK_PREFIX: &str = "worker_";
const WORKER_ACK_SUFFIX: &str = "_ready";

/// Default timeout for the controller's quorum wait
pub const DEFAULT_QUORUM_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning knobs for the coordination protocol
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinationConfig {
    /// Whether coordination is enabled at all (default: off)
    pub enabled: bool,
    /// Whether to emit per-poll debug logging
    pub debug: bool,
    /// How long a worker waits for the controller's envelope
    pub worker_timeout: Duration,
    /// Initial sleep between polls
    pub check_interval: Duration,
    /// Multiplier applied to the sleep after each poll
    pub backoff_factor: f64,
    /// Cap on the sleep between polls
    pub max_interval: Duration,
    /// Envelopes older than this are stale regardless of presence
    pub max_state_age: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debug: false,
            worker_timeout: Duration::from_secs(30),
            check_interval: Duration::from_millis(100),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(2),
            max_state_age: Duration::from_secs(300),
        }
    }
}

impl CoordinationConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for unset or malformed values
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            enabled: bool_env(ENV_ENABLED, defaults.enabled),
            debug: bool_env(ENV_DEBUG, defaults.debug),
            worker_timeout: secs_env(ENV_WORKER_TIMEOUT, defaults.worker_timeout),
            check_interval: secs_env(ENV_CHECK_INTERVAL, defaults.check_interval),
            backoff_factor: f64_env(ENV_BACKOFF_FACTOR, defaults.backoff_factor),
            max_interval: secs_env(ENV_MAX_INTERVAL, defaults.max_interval),
            max_state_age: secs_env(ENV_MAX_STATE_AGE, defaults.max_state_age),
        };

        if config.debug {
            tracing::info!(?config, "coordination config loaded");
        }

        config
    }

    /// Validate configuration before use
    ///
    /// Call this early so a bad environment fails fast with a clear message
    /// instead of producing a wait loop that spins or never polls.
    pub fn validate(&self) -> Result<()> {
        if self.worker_timeout.is_zero() {
            return Err(CoordinationError::InvalidConfig(
                "worker_timeout must be positive".to_string(),
            ));
        }
        if self.check_interval.is_zero() {
            return Err(CoordinationError::InvalidConfig(
                "check_interval must be positive".to_string(),
            ));
        }
        if self.backoff_factor <= 1.0 {
            return Err(CoordinationError::InvalidConfig(format!(
                "backoff_factor must exceed 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// The coordination directory for a given project root
    pub fn coordination_dir(&self, root: &Path) -> PathBuf {
        root.join(COORDINATION_DIR_NAME)
    }

    /// Path of the envelope file the controller publishes
    pub fn ready_marker_path(&self, root: &Path) -> PathBuf {
        self.coordination_dir(root).join(READY_MARKER_NAME)
    }

    /// Path of a worker's acknowledgment marker
    pub fn worker_ack_path(&self, root: &Path, worker_id: &str) -> PathBuf {
        self.coordination_dir(root)
            .join(format!("{WORKER_ACK_PREFIX}{worker_id}{WORKER_ACK_SUFFIX}"))
    }

    /// Glob pattern matching every worker acknowledgment marker
    pub fn worker_ack_pattern(&self, root: &Path) -> PathBuf {
        self.coordination_dir(root)
            .join(format!("{WORKER_ACK_PREFIX}*{WORKER_ACK_SUFFIX}"))
    }
}

/// Extract the worker id from an acknowledgment marker filename, if it is one
pub(crate) fn worker_id_from_marker(filename: &str) -> Option<&str> {
    filename
        .strip_prefix(WORKER_ACK_PREFIX)?
        .strip_suffix(WORKER_ACK_SUFFIX)
}

fn bool_env(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn f64_env(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn secs_env(key: &str, default: Duration) -> Duration {
    // try_from rejects NaN, negatives, and values beyond Duration range
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(default)
}
