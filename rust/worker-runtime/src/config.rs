//! Process-wide worker configuration.
//!
//! Mirrors the load order used elsewhere in Shannon: an explicit file
//! path from the environment, then a conventional local path, then
//! built-in defaults, each layer overridable by individual environment
//! variables.

use std::env;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};

/// Global configuration instance, lazily initialized on first access.
static CONFIG: RwLock<Option<WorkerConfig>> = RwLock::new(None);

/// Worker-node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the object-store feature is enabled; if false, any task
    /// that requires a resource download fails fast.
    #[serde(default = "default_true")]
    pub resource_upload_enabled: bool,

    /// Suppresses work-directory cleanup when true (diagnostic mode).
    #[serde(default = "default_false")]
    pub develop_mode: bool,

    /// Path to the environment file injected into each task's context.
    #[serde(default = "default_system_env_path")]
    pub system_env_path: String,

    /// Base URL of the master node's status-reporting endpoint.
    #[serde(default = "default_master_address")]
    pub master_address: String,

    /// Maximum attempts for a single status message before giving up.
    #[serde(default = "default_master_rpc_max_attempts")]
    pub master_rpc_max_attempts: u32,

    /// Initial backoff before the first retry, doubled on each
    /// subsequent attempt.
    #[serde(default = "default_master_rpc_initial_backoff_ms")]
    pub master_rpc_initial_backoff_ms: u64,

    /// Per-attempt timeout for a status message, in seconds.
    #[serde(default = "default_master_rpc_timeout_secs")]
    pub master_rpc_timeout_secs: u64,

    /// Number of executor slots in the worker pool.
    #[serde(default = "default_worker_exec_threads")]
    pub worker_exec_threads: usize,
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_system_env_path() -> String {
    "/opt/worker/env.sh".to_string()
}
fn default_master_address() -> String {
    "http://127.0.0.1:5678".to_string()
}
fn default_master_rpc_max_attempts() -> u32 {
    3
}
fn default_master_rpc_initial_backoff_ms() -> u64 {
    1000
}
fn default_master_rpc_timeout_secs() -> u64 {
    10
}
fn default_worker_exec_threads() -> usize {
    4
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            resource_upload_enabled: default_true(),
            develop_mode: default_false(),
            system_env_path: default_system_env_path(),
            master_address: default_master_address(),
            master_rpc_max_attempts: default_master_rpc_max_attempts(),
            master_rpc_initial_backoff_ms: default_master_rpc_initial_backoff_ms(),
            master_rpc_timeout_secs: default_master_rpc_timeout_secs(),
            worker_exec_threads: default_worker_exec_threads(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from file or environment.
    pub fn load() -> WorkerResult<Self> {
        if let Ok(config_path) = env::var("WORKER_CONFIG_PATH") {
            Self::from_file(&config_path)
        } else if Path::new("config/worker.yaml").exists() {
            Self::from_file("config/worker.yaml")
        } else {
            Ok(Self::from_env(Self::default()))
        }
    }

    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn from_file(path: &str) -> WorkerResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| WorkerError::Io(format!("failed to read config file: {e}")))?;
        let config: WorkerConfig = serde_yaml::from_str(&content)
            .map_err(|e| WorkerError::Io(format!("failed to parse config: {e}")))?;
        Ok(Self::from_env(config))
    }

    /// Override configuration with environment variables.
    #[must_use]
    pub fn from_env(mut config: Self) -> Self {
        if let Ok(v) = env::var("WORKER_RESOURCE_UPLOAD_ENABLED") {
            if let Ok(b) = v.parse::<bool>() {
                config.resource_upload_enabled = b;
            }
        }
        if let Ok(v) = env::var("WORKER_DEVELOP_MODE") {
            if let Ok(b) = v.parse::<bool>() {
                config.develop_mode = b;
            }
        }
        if let Ok(v) = env::var("WORKER_SYSTEM_ENV_PATH") {
            config.system_env_path = v;
        }
        if let Ok(v) = env::var("WORKER_MASTER_ADDRESS") {
            config.master_address = v;
        }
        if let Ok(v) = env::var("WORKER_MASTER_RPC_MAX_ATTEMPTS") {
            if let Ok(n) = v.parse::<u32>() {
                config.master_rpc_max_attempts = n;
            }
        }
        if let Ok(v) = env::var("WORKER_EXEC_THREADS") {
            if let Ok(n) = v.parse::<usize>() {
                config.worker_exec_threads = n;
            }
        }
        config
    }

    /// Get the process-wide configuration, initializing it from
    /// environment/file on first access.
    pub fn global() -> WorkerResult<Self> {
        let guard = CONFIG
            .read()
            .map_err(|e| WorkerError::Io(format!("config lock poisoned: {e}")))?;

        if let Some(ref config) = *guard {
            Ok(config.clone())
        } else {
            drop(guard);
            Self::initialize()
        }
    }

    /// Force (re)initialization of the global configuration.
    pub fn initialize() -> WorkerResult<Self> {
        let config = Self::load()?;
        let mut guard = CONFIG
            .write()
            .map_err(|e| WorkerError::Io(format!("config lock poisoned: {e}")))?;
        *guard = Some(config.clone());
        Ok(config)
    }
}
