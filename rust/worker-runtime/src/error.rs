//! Error types for the worker task execution runtime.

use thiserror::Error;

/// Core error type for the worker runtime.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// No `TaskChannel` is registered for the requested task type.
    #[error("no task channel registered for task type '{0}'")]
    PluginNotFound(String),

    /// A resource download failed partway through a batch.
    #[error("failed to download resource '{file_name}' for tenant '{tenant_code}': {reason}")]
    ResourceDownloadFailure {
        file_name: String,
        tenant_code: String,
        reason: String,
    },

    /// Resources were required but the object-store feature is disabled.
    #[error("resource upload/download is disabled but {0} resource(s) are required")]
    StorageNotConfigured(usize),

    /// The task plugin's `init`/`handle` raised an error.
    #[error("task plugin runtime error: {0}")]
    PluginRuntimeError(String),

    /// Delivery of a status message to the master failed after all retries.
    #[error("failed to deliver {kind} message to master after {attempts} attempt(s): {reason}")]
    ReportDeliveryFailure {
        kind: String,
        attempts: u32,
        reason: String,
    },

    /// Generic I/O error, e.g. during resource staging.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),
}

/// Result type alias for worker-runtime operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Serde(err.to_string())
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        WorkerError::ReportDeliveryFailure {
            kind: "unknown".to_string(),
            attempts: 1,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_not_found_message() {
        let err = WorkerError::PluginNotFound("SQL".to_string());
        assert_eq!(
            err.to_string(),
            "no task channel registered for task type 'SQL'"
        );
    }

    #[test]
    fn storage_not_configured_message() {
        let err = WorkerError::StorageNotConfigured(2);
        assert_eq!(
            err.to_string(),
            "resource upload/download is disabled but 2 resource(s) are required"
        );
    }
}
