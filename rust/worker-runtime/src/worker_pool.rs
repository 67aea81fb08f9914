//! Drains the delay queue and drives ready `TaskRunner`s to completion
//! across a fixed number of executor slots.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::context::TaskExecutionContextCache;
use crate::delay_queue::DelayQueue;
use crate::task_channel::TaskChannelRegistry;
use crate::task_runner::{KillSwitch, TaskRunner};

/// Handle to a dispatched runner, kept so a caller can request a kill
/// by `task_instance_id` while the runner is executing on a slot.
#[derive(Clone)]
struct Handle {
    kill_switch: KillSwitch,
}

/// A fixed pool of executor slots draining a shared `DelayQueue`.
///
/// Each slot loops `take()` -> run one `TaskRunner` to completion ->
/// `take()` again, matching the worker's documented model of a small,
/// bounded number of concurrent task executions rather than one task
/// per tokio task.
pub struct WorkerPool {
    queue: Arc<DelayQueue<TaskRunner>>,
    cache: TaskExecutionContextCache,
    in_flight: Arc<Mutex<HashMap<i64, Handle>>>,
    slots: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.worker_exec_threads` executor slots, each pulling
    /// from a fresh, empty `DelayQueue`. Use `submit` to enqueue work.
    #[must_use]
    pub fn start(config: WorkerConfig, cache: TaskExecutionContextCache) -> Self {
        let queue: Arc<DelayQueue<TaskRunner>> = Arc::new(DelayQueue::new());
        let in_flight: Arc<Mutex<HashMap<i64, Handle>>> = Arc::new(Mutex::new(HashMap::new()));

        let slot_count = config.worker_exec_threads.max(1);
        let mut slots = Vec::with_capacity(slot_count);

        for slot_id in 0..slot_count {
            let queue = Arc::clone(&queue);
            let in_flight = Arc::clone(&in_flight);
            let cache = cache.clone();

            slots.push(tokio::spawn(async move {
                loop {
                    let mut runner = queue.take().await;
                    let task_instance_id = runner.task_instance_id();

                    in_flight.lock().await.insert(
                        task_instance_id,
                        Handle {
                            kill_switch: runner.kill_switch(),
                        },
                    );

                    tracing::debug!(slot_id, task_instance_id, "slot picked up task");
                    runner.run().await;

                    in_flight.lock().await.remove(&task_instance_id);
                    cache.remove(task_instance_id);
                }
            }));
        }

        Self {
            queue,
            cache,
            in_flight,
            slots,
        }
    }

    /// Enqueue a runner. Its deadline (`first_submit_time + delay_minutes`)
    /// determines when a slot picks it up; `TaskExecutionContextCache`
    /// registration is the caller's responsibility before submission.
    pub async fn submit(&self, runner: TaskRunner) {
        self.queue.offer(runner).await;
    }

    /// Number of runners still waiting in the queue (not yet picked up
    /// by a slot).
    pub async fn pending(&self) -> usize {
        self.queue.size().await
    }

    /// Best-effort kill of an in-flight (already dispatched) task. A
    /// task still waiting in the queue is not reachable by this call;
    /// callers that need to cancel queued-but-not-yet-running work
    /// should use `DelayQueue::remove` directly via the queue returned
    /// by other means, or simply let `kill` race the dispatch and
    /// observe the `KillSwitch` once picked up.
    pub async fn kill(&self, task_instance_id: i64) {
        let switch = self
            .in_flight
            .lock()
            .await
            .get(&task_instance_id)
            .map(|h| h.kill_switch.clone());

        if let Some(switch) = switch {
            switch.trigger();
        } else {
            tracing::debug!(task_instance_id, "kill requested for task not currently in flight");
        }

        self.cache.remove(task_instance_id);
    }

    /// Number of slots currently configured.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Abort all executor slots. Intended for orderly shutdown; any
    /// task mid-`handle()` is dropped, not gracefully cancelled.
    pub fn shutdown(&self) {
        for slot in &self.slots {
            slot.abort();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("slot_count", &self.slots.len())
            .finish()
    }
}
