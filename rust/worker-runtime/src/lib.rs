//! Worker-side task execution runtime.
//!
//! Accepts task-execution contexts dispatched by a master node, drives
//! each through a per-task state machine (staging, plugin dispatch,
//! status reporting, cleanup), and supports delayed-start scheduling
//! through an ordered wait queue ahead of a fixed pool of executor
//! slots.
//!
//! # Architecture
//!
//! - [`context`]: `TaskExecutionContext`, the unit of work, plus the
//!   process-wide cache of contexts currently in flight.
//! - [`resource_stager`]: stages resources referenced by a task onto
//!   the local filesystem ahead of execution.
//! - [`parameter_binder`]: merges global parameters with derived
//!   time parameters and the schedule-time business parameter.
//! - [`work_directory`]: safe cleanup of a task's local scratch space.
//! - [`status_reporter`]: delivers RUNNING/RESULT messages to the
//!   master with bounded retry, and forwards alerts.
//! - [`task_channel`]: the plugin contract (`TaskChannel`/`AbstractTask`)
//!   concrete task types implement.
//! - [`delay_queue`]: a min-heap wait structure releasing elements
//!   only once their deadline has passed.
//! - [`task_runner`]: the per-task state machine composing the above.
//! - [`worker_pool`]: a fixed pool of executor slots draining the
//!   delay queue.
//!
//! # Usage
//!
//! ```rust,ignore
//! use worker_runtime::prelude::*;
//!
//! let config = WorkerConfig::load()?;
//! let cache = TaskExecutionContextCache::new();
//! let pool = WorkerPool::start(config, cache.clone());
//!
//! // pool.submit(runner).await;
//! ```

pub mod config;
pub mod context;
pub mod delay_queue;
pub mod error;
pub mod parameter_binder;
pub mod resource_stager;
pub mod status_reporter;
pub mod task_channel;
pub mod task_runner;
pub mod work_directory;
pub mod worker_pool;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::WorkerConfig;
    pub use crate::context::{ExecutionStatus, Property, TaskExecutionContext, TaskExecutionContextCache};
    pub use crate::error::{WorkerError, WorkerResult};
    pub use crate::resource_stager::StorageOperate;
    pub use crate::status_reporter::AlertSender;
    pub use crate::task_channel::{AbstractTask, TaskChannel, TaskChannelRegistry};
    pub use crate::task_runner::{AppKiller, TaskRunner};
    pub use crate::worker_pool::WorkerPool;
}
