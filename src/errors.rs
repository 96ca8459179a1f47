//! Coordination error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during controller/worker coordination
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// A directory or file operation failed for a non-benign reason
    #[error("{operation} failed for {path}: {source}")]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The envelope file exists but is not well-formed JSON
    #[error("controller state is not valid JSON: {source}")]
    CorruptState {
        #[source]
        source: serde_json::Error,
    },

    /// The envelope parsed but lacks a required field
    #[error("controller state is missing required field `{field}`")]
    MissingField { field: &'static str },

    /// A wait operation exceeded its deadline
    #[error("coordination timeout: {operation} gave up after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Controller-side initialization failed
    #[error("controller not ready: {reason}")]
    ControllerNotReady {
        reason: String,
        #[source]
        source: Option<Box<CoordinationError>>,
    },

    /// Worker-side initialization failed
    #[error("worker {worker_id} not ready: {reason}")]
    WorkerNotReady {
        worker_id: String,
        reason: String,
        #[source]
        source: Option<Box<CoordinationError>>,
    },

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoordinationError {
    pub(crate) fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Check if this is a timeout, the one failure callers are expected to
    /// recover from by falling back to an uncoordinated mode
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoordinationError::Timeout { .. })
    }

    /// Check if the envelope itself was unusable (corrupt or incomplete)
    pub fn is_bad_state(&self) -> bool {
        matches!(
            self,
            CoordinationError::CorruptState { .. } | CoordinationError::MissingField { .. }
        )
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, CoordinationError>;
