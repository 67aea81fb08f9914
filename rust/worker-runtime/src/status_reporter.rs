//! Delivers lifecycle messages to the master with bounded retry, and
//! forwards alerts through the alert collaborator.

use async_trait::async_trait;

use crate::config::WorkerConfig;
use crate::context::{ExecutionStatus, TaskExecutionContext};

/// Which lifecycle message is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Running,
    Result,
}

impl MessageKind {
    #[must_use]
    fn path_segment(self) -> &'static str {
        match self {
            MessageKind::Running => "task/execute-running",
            MessageKind::Result => "task/execute-result",
        }
    }

    #[must_use]
    fn label(self) -> &'static str {
        match self {
            MessageKind::Running => "RUNNING",
            MessageKind::Result => "RESULT",
        }
    }
}

/// Alert strategy, mirroring the master's `WarningType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningType {
    Success = 1,
    Failure = 2,
}

/// Information needed to raise an alert for a task.
#[derive(Debug, Clone)]
pub struct TaskAlertInfo {
    pub alert_group_id: i64,
    pub title: String,
    pub content: String,
}

/// Capability interface for the alert service.
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send_alert(
        &self,
        group_id: i64,
        title: &str,
        content: &str,
        strategy: WarningType,
    ) -> anyhow::Result<()>;
}

/// Sends status messages and alerts on behalf of a `TaskRunner`.
pub struct StatusReporter {
    client: reqwest::Client,
    master_address: String,
    max_attempts: u32,
    initial_backoff_ms: u64,
    timeout_secs: u64,
}

impl StatusReporter {
    #[must_use]
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            master_address: config.master_address.clone(),
            max_attempts: config.master_rpc_max_attempts.max(1),
            initial_backoff_ms: config.master_rpc_initial_backoff_ms,
            timeout_secs: config.master_rpc_timeout_secs,
        }
    }

    /// Send `ctx` to the master as `kind`. Delivery is at-least-once
    /// with bounded exponential-backoff retry; after exhaustion the
    /// failure is logged but never returned to the caller: the task's
    /// own status is locally authoritative, and the master is expected
    /// to reconcile via its own timeout loop.
    pub async fn send(&self, ctx: &TaskExecutionContext, kind: MessageKind) {
        let url = format!("{}/{}", self.master_address.trim_end_matches('/'), kind.path_segment());
        let mut backoff_ms = self.initial_backoff_ms;

        for attempt in 1..=self.max_attempts {
            let result = tokio::time::timeout(
                std::time::Duration::from_secs(self.timeout_secs),
                self.client.post(&url).json(ctx).send(),
            )
            .await;

            match result {
                Ok(Ok(resp)) if resp.status().is_success() => {
                    tracing::debug!(
                        kind = kind.label(),
                        task_instance_id = ctx.task_instance_id,
                        attempt,
                        "status message delivered"
                    );
                    return;
                }
                Ok(Ok(resp)) => {
                    tracing::warn!(
                        kind = kind.label(),
                        task_instance_id = ctx.task_instance_id,
                        attempt,
                        status = %resp.status(),
                        "master rejected status message"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        kind = kind.label(),
                        task_instance_id = ctx.task_instance_id,
                        attempt,
                        error = %e,
                        "status message delivery failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        kind = kind.label(),
                        task_instance_id = ctx.task_instance_id,
                        attempt,
                        "status message delivery timed out"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
            }
        }

        tracing::error!(
            kind = kind.label(),
            task_instance_id = ctx.task_instance_id,
            attempts = self.max_attempts,
            "giving up on status message delivery; master must reconcile via its own timeout"
        );
    }

    /// Forward a best-effort alert. `status_code` maps to a success or
    /// failure strategy; failures here are logged only.
    pub async fn alert(
        &self,
        alert_sender: &dyn AlertSender,
        info: &TaskAlertInfo,
        status: ExecutionStatus,
    ) {
        let strategy = match status {
            ExecutionStatus::Success => WarningType::Success,
            ExecutionStatus::Failure => WarningType::Failure,
        };

        if let Err(e) = alert_sender
            .send_alert(info.alert_group_id, &info.title, &info.content, strategy)
            .await
        {
            tracing::warn!(error = %e, "failed to deliver task alert");
        }
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("master_address", &self.master_address)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_paths_are_distinct() {
        assert_ne!(
            MessageKind::Running.path_segment(),
            MessageKind::Result.path_segment()
        );
    }

    #[test]
    fn alert_strategy_maps_success_and_failure() {
        assert_eq!(
            match ExecutionStatus::Success {
                ExecutionStatus::Success => WarningType::Success,
                ExecutionStatus::Failure => WarningType::Failure,
            },
            WarningType::Success
        );
        assert_eq!(
            match ExecutionStatus::Failure {
                ExecutionStatus::Success => WarningType::Success,
                ExecutionStatus::Failure => WarningType::Failure,
            },
            WarningType::Failure
        );
    }

    struct RecordingAlertSender {
        calls: std::sync::Mutex<Vec<WarningType>>,
    }

    #[async_trait]
    impl AlertSender for RecordingAlertSender {
        async fn send_alert(
            &self,
            _group_id: i64,
            _title: &str,
            _content: &str,
            strategy: WarningType,
        ) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(strategy);
            Ok(())
        }
    }

    #[tokio::test]
    async fn alert_forwards_best_effort() {
        let config = WorkerConfig::default();
        let reporter = StatusReporter::new(&config);
        let sender = RecordingAlertSender {
            calls: std::sync::Mutex::new(Vec::new()),
        };
        let info = TaskAlertInfo {
            alert_group_id: 1,
            title: "task failed".to_string(),
            content: "details".to_string(),
        };

        reporter.alert(&sender, &info, ExecutionStatus::Failure).await;
        assert_eq!(sender.calls.lock().unwrap().as_slice(), [WarningType::Failure]);
    }
}
