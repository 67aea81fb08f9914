//! Owns the per-task local scratch directory and its safe cleanup.

use std::path::Path;

/// Manages a task's local execute directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkDirectory;

impl WorkDirectory {
    /// Clear `exec_local_path`, unless `develop_mode` is set (leave
    /// artifacts for inspection) or the path is empty or `/` (hard
    /// guard against deleting the filesystem root). Missing-directory
    /// is a no-op success. Any other I/O error is logged and swallowed:
    /// cleanup must never mask the task's own status.
    pub fn clear(&self, exec_local_path: &str, develop_mode: bool) {
        if develop_mode {
            tracing::debug!(path = %exec_local_path, "develop mode: skipping work directory cleanup");
            return;
        }

        if exec_local_path.is_empty() {
            tracing::warn!("work directory cleanup skipped: empty execute path");
            return;
        }

        if exec_local_path == "/" {
            tracing::warn!("work directory cleanup skipped: refusing to delete filesystem root");
            return;
        }

        let path = Path::new(exec_local_path);
        match std::fs::remove_dir_all(path) {
            Ok(()) => tracing::info!(path = %exec_local_path, "work directory cleaned"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %exec_local_path, "work directory already absent, nothing to clean");
            }
            Err(e) => {
                tracing::warn!(path = %exec_local_path, error = %e, "failed to clean work directory, ignoring");
            }
        }
    }
}
