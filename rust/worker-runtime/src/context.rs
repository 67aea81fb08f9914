//! The task execution context: the unit of work threaded through the
//! runner's state machine, plus the process-wide cache that tracks
//! contexts currently in flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single key/value parameter. Equality and merge are by `prop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub prop: String,
    pub value: String,
}

impl Property {
    #[must_use]
    pub fn new(prop: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            value: value.into(),
        }
    }
}

/// Terminal execution outcome. `currentExecutionStatus` before
/// completion is modeled as `Option<ExecutionStatus>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// The unit of work passed from the master to a `TaskRunner`.
///
/// Identifiers, scheduling, execution, parameters, resources, and
/// status output all live on one struct so the whole lifecycle can
/// mutate it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionContext {
    // Identifiers
    pub task_instance_id: i64,
    pub process_instance_id: i64,
    pub process_define_code: i64,
    pub process_define_version: i32,
    pub first_submit_time: DateTime<Utc>,

    // Scheduling
    pub schedule_time: Option<DateTime<Utc>>,
    pub delay_minutes: u32,

    // Execution
    pub task_type: String,
    pub execute_path: String,
    pub env_file: String,
    pub dry_run: bool,

    // Parameters
    pub global_params: String,
    pub params_map: HashMap<String, Property>,
    pub defined_params: HashMap<String, String>,
    pub var_pool: Vec<Property>,

    // Resources: resource file name -> tenant code
    pub resources: HashMap<String, String>,

    // Status output
    pub current_execution_status: Option<ExecutionStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub process_id: i32,
    pub app_ids: String,
    pub task_log_name: String,
}

impl TaskExecutionContext {
    /// `"{processInstanceId}_{taskInstanceId}"`, stable once assigned.
    #[must_use]
    pub fn task_app_id(&self) -> String {
        format!("{}_{}", self.process_instance_id, self.task_instance_id)
    }

    /// `"{firstSubmitTimeEpochSec}_{processDefineCode}_{processDefineVersion}_{processInstanceId}_{taskInstanceId}"`.
    #[must_use]
    pub fn build_task_log_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.first_submit_time.timestamp(),
            self.process_define_code,
            self.process_define_version,
            self.process_instance_id,
            self.task_instance_id
        )
    }

    /// Sets `start_time` if unset. Per the invariant, it is set at most once.
    pub fn stamp_start_time(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
    }
}

/// Process-wide cache of in-flight contexts, keyed by `task_instance_id`.
///
/// Passed as an explicit collaborator rather than an ambient global:
/// constructed once at `WorkerPool` construction and shared via `Arc`
/// with every `TaskRunner`.
#[derive(Debug, Default, Clone)]
pub struct TaskExecutionContextCache {
    inner: Arc<RwLock<HashMap<i64, TaskExecutionContext>>>,
}

impl TaskExecutionContextCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context, e.g. before it is enqueued into the delay queue.
    pub fn register(&self, ctx: TaskExecutionContext) {
        self.inner.write().insert(ctx.task_instance_id, ctx);
    }

    /// Remove a context by id. Idempotent: removing twice is harmless.
    pub fn remove(&self, task_instance_id: i64) {
        self.inner.write().remove(&task_instance_id);
    }

    #[must_use]
    pub fn contains(&self, task_instance_id: i64) -> bool {
        self.inner.read().contains_key(&task_instance_id)
    }

    #[must_use]
    pub fn get(&self, task_instance_id: i64) -> Option<TaskExecutionContext> {
        self.inner.read().get(&task_instance_id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ctx() -> TaskExecutionContext {
        TaskExecutionContext {
            task_instance_id: 42,
            process_instance_id: 7,
            process_define_code: 100,
            process_define_version: 1,
            first_submit_time: Utc::now(),
            schedule_time: None,
            delay_minutes: 0,
            task_type: "SHELL".to_string(),
            execute_path: "/tmp/exec/7_42".to_string(),
            env_file: String::new(),
            dry_run: false,
            global_params: "[]".to_string(),
            params_map: HashMap::new(),
            defined_params: HashMap::new(),
            var_pool: Vec::new(),
            resources: HashMap::new(),
            current_execution_status: None,
            start_time: None,
            end_time: None,
            process_id: 0,
            app_ids: String::new(),
            task_log_name: String::new(),
        }
    }

    #[test]
    fn task_app_id_format() {
        let ctx = sample_ctx();
        assert_eq!(ctx.task_app_id(), "7_42");
    }

    #[test]
    fn stamp_start_time_sets_once() {
        let mut ctx = sample_ctx();
        ctx.stamp_start_time();
        let first = ctx.start_time;
        ctx.stamp_start_time();
        assert_eq!(ctx.start_time, first);
    }

    #[test]
    fn cache_register_and_remove_is_idempotent() {
        let cache = TaskExecutionContextCache::new();
        let ctx = sample_ctx();
        cache.register(ctx);
        assert!(cache.contains(42));
        cache.remove(42);
        assert!(!cache.contains(42));
        // Removing again must not panic or error.
        cache.remove(42);
        assert!(!cache.contains(42));
    }
}
