//! The task plugin contract: `TaskChannel` factories produce
//! `AbstractTask` instances for a given task type. Neither the
//! registry nor the runner knows anything about concrete plugins
//! (shell, SQL, Spark, ...) beyond this capability surface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Property, TaskExecutionContext};
use crate::status_reporter::TaskAlertInfo;

/// The exit status reported by a finished `AbstractTask`.
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    pub code: i32,
}

/// The variable bag carried in and out of plugin execution.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub var_pool: Vec<Property>,
}

/// Capability interface satisfied by every concrete task plugin.
///
/// The registry maps `task_type -> factory`; the runner only ever talks
/// to this trait, never to a concrete plugin type.
#[async_trait]
pub trait AbstractTask: Send + Sync {
    /// Prepare the task for execution (e.g. resolve plugin-specific config).
    async fn init(&mut self) -> anyhow::Result<()>;

    /// Run the task to completion. Blocks until the underlying
    /// process/job finishes or is killed.
    async fn handle(&mut self) -> anyhow::Result<()>;

    /// Request cancellation. Idempotent and must never throw, kill is
    /// best-effort.
    async fn cancel_application(&mut self, force: bool);

    fn exit_status(&self) -> ExitStatus;

    /// Native pid of the spawned subprocess, or 0 if none.
    fn process_id(&self) -> i32;

    /// Comma-separated external application ids (e.g. YARN).
    fn app_ids(&self) -> String;

    fn parameters(&self) -> Parameters;

    fn set_parameters(&mut self, parameters: Parameters);

    fn need_alert(&self) -> bool;

    fn task_alert_info(&self) -> Option<TaskAlertInfo>;
}

/// Factory producing a concrete `AbstractTask` for a given task type.
pub trait TaskChannel: Send + Sync {
    fn create_task(&self, ctx: &TaskExecutionContext) -> Box<dyn AbstractTask>;
}

/// Registry of available task channels, keyed by `task_type`.
#[derive(Default, Clone)]
pub struct TaskChannelRegistry {
    channels: HashMap<String, Arc<dyn TaskChannel>>,
}

impl TaskChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, channel: Arc<dyn TaskChannel>) {
        self.channels.insert(task_type.into(), channel);
    }

    #[must_use]
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskChannel>> {
        self.channels.get(task_type).cloned()
    }
}

impl std::fmt::Debug for TaskChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskChannelRegistry")
            .field("task_types", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}
