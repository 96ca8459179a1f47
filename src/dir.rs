//! Coordination directory management
//!
//! Owns the well-known directory the protocol runs in and the file
//! primitives everything else builds on. The single correctness-critical
//! primitive is [`CoordinationDir::atomic_write`]: publication always goes
//! through write-to-temp-then-rename, so a reader sees either the old
//! complete file or the new complete file, never a torn one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::{worker_id_from_marker, CoordinationConfig};
use crate::errors::{CoordinationError, Result};

const TEMP_SUFFIX: &str = ".tmp";

/// Handle on the coordination directory for one project root
#[derive(Debug, Clone)]
pub struct CoordinationDir {
    root: PathBuf,
    dir: PathBuf,
    ack_pattern: PathBuf,
}

impl CoordinationDir {
    /// Create a handle for the given project root; does not touch the
    /// filesystem until [`ensure`](Self::ensure) is called
    pub fn new(root: impl Into<PathBuf>, config: &CoordinationConfig) -> Self {
        let root = root.into();
        let dir = config.coordination_dir(&root);
        let ack_pattern = config.worker_ack_pattern(&root);
        Self {
            root,
            dir,
            ack_pattern,
        }
    }

    /// The project root this directory belongs to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The coordination directory itself
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Idempotently create the coordination directory
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CoordinationError::io(&self.dir, "create directory", e))
    }

    /// Atomically write `content` to `target`
    ///
    /// Writes to a temporary sibling in the same directory, flushes it, then
    /// renames onto the target in one step. On any failure the temporary
    /// file is removed best-effort and the error carries the target path.
    pub async fn atomic_write(&self, target: &Path, content: &[u8]) -> Result<()> {
        let temp_path = temp_sibling(target);

        let result = write_then_rename(&temp_path, target, content).await;
        if let Err(e) = result {
            if let Err(cleanup_err) = tokio::fs::remove_file(&temp_path).await {
                if cleanup_err.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %temp_path.display(), error = %cleanup_err, "failed to remove temp file");
                }
            }
            return Err(CoordinationError::io(target, "write", e));
        }
        Ok(())
    }

    /// Create an empty marker file if absent; a no-op if it already exists
    ///
    /// Retried waits touch the same marker more than once; that must not
    /// error.
    pub async fn touch_marker(&self, path: &Path) -> Result<()> {
        tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| CoordinationError::io(path, "acknowledge", e))?;
        Ok(())
    }

    /// The set of worker ids whose acknowledgment markers currently exist
    ///
    /// Derived from the directory listing on every call; a listing failure
    /// degrades to the empty set rather than failing the poll loop.
    pub fn ready_workers(&self) -> HashSet<String> {
        let mut ready = HashSet::new();

        let pattern = self.ack_pattern.to_string_lossy();
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "error scanning for ready workers");
                return ready;
            }
        };

        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "error scanning for ready workers");
                    continue;
                }
            };
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(worker_id) = worker_id_from_marker(name) {
                    ready.insert(worker_id.to_string());
                }
            }
        }

        ready
    }

    /// Best-effort recursive removal of the coordination directory
    ///
    /// Cleanup failure must not fail the run; errors are logged and
    /// swallowed. Removing a directory that never existed is a no-op.
    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(dir = %self.dir.display(), "removed coordination directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "failed to remove coordination directory"),
        }
    }

    /// Best-effort removal of every worker acknowledgment marker
    pub async fn reset_acknowledgments(&self) {
        let pattern = self.ack_pattern.to_string_lossy();
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "failed to reset worker acknowledgments");
                return;
            }
        };

        for path in paths.flatten() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove acknowledgment marker");
                }
            }
        }
    }
}

fn temp_sibling(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

async fn write_then_rename(temp_path: &Path, target: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(temp_path).await?;
    file.write_all(content).await?;
    file.flush().await?;
    drop(file);
    // Rename replaces any existing target in one step on POSIX
    tokio::fs::rename(temp_path, target).await
}
