//! The per-task state machine: the heart of the runtime. Composes
//! `ResourceStager`, `ParameterBinder`, a `TaskChannel`-created task
//! instance, `WorkDirectory`, and `StatusReporter` to drive one
//! `TaskExecutionContext` from submission to cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::config::WorkerConfig;
use crate::context::{ExecutionStatus, TaskExecutionContext, TaskExecutionContextCache};
use crate::delay_queue::Delayed;
use crate::parameter_binder::ParameterBinder;
use crate::resource_stager::ResourceStager;
use crate::status_reporter::{AlertSender, MessageKind, StatusReporter};
use crate::task_channel::{Parameters, TaskChannelRegistry};
use crate::work_directory::WorkDirectory;
use tracing::Instrument;

/// Observable state of a `TaskRunner`, useful for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    New,
    DryRunDone,
    Staging,
    Running,
    Failing,
    Reporting,
    Cleaned,
}

/// Tracks whether a `TaskRunner` has already been killed, so a second
/// `kill()` call (e.g. a retried master RPC) is a cheap no-op rather
/// than issuing `cancel_application` twice. Also lets the executing
/// slot race a running plugin's `handle()` against an external kill
/// request arriving from outside that slot (e.g. `WorkerPool::kill`).
/// Cloneable so callers can hold a handle without borrowing the runner
/// itself.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    killed: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            killed: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Resolves once `trigger` has been called, including a `trigger`
    /// that races with this call. Interest is registered before
    /// `is_killed` is checked, so a concurrent `trigger` landing
    /// between the check and the await can't be missed: `notify_waiters`
    /// only wakes already-registered waiters, it does not save the
    /// wakeup for a listener that registers afterward.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_killed() {
            return;
        }
        notified.await;
    }
}

/// External collaborator for out-of-band application kill (e.g. YARN).
#[async_trait::async_trait]
pub trait AppKiller: Send + Sync {
    async fn kill_app(&self, app_id: &str);
}

/// No-op `AppKiller` for contexts with nothing to kill out-of-band.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAppKiller;

#[async_trait::async_trait]
impl AppKiller for NoopAppKiller {
    async fn kill_app(&self, _app_id: &str) {}
}

/// The per-task state machine.
///
/// Not thread-safe and must not be invoked concurrently from two
/// slots: the `WorkerPool` is the only component that calls `run`.
pub struct TaskRunner {
    ctx: TaskExecutionContext,
    cache: TaskExecutionContextCache,
    config: WorkerConfig,
    channels: TaskChannelRegistry,
    storage: Arc<dyn crate::resource_stager::StorageOperate>,
    alert_sender: Arc<dyn AlertSender>,
    app_killer: Arc<dyn AppKiller>,
    kill_switch: KillSwitch,
    state: RunnerState,
    active_task: Option<Box<dyn crate::task_channel::AbstractTask>>,
}

impl TaskRunner {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: TaskExecutionContext,
        cache: TaskExecutionContextCache,
        config: WorkerConfig,
        channels: TaskChannelRegistry,
        storage: Arc<dyn crate::resource_stager::StorageOperate>,
        alert_sender: Arc<dyn AlertSender>,
        app_killer: Arc<dyn AppKiller>,
    ) -> Self {
        Self {
            ctx,
            cache,
            config,
            channels,
            storage,
            alert_sender,
            app_killer,
            kill_switch: KillSwitch::new(),
            state: RunnerState::New,
            active_task: None,
        }
    }

    #[must_use]
    pub fn kill_switch(&self) -> KillSwitch {
        self.kill_switch.clone()
    }

    #[must_use]
    pub fn state(&self) -> RunnerState {
        self.state
    }

    #[must_use]
    pub fn task_instance_id(&self) -> i64 {
        self.ctx.task_instance_id
    }

    /// External cancellation entry point. Safe to call from outside
    /// the executing slot, idempotent, and never throws.
    pub async fn kill(&mut self) {
        if self.kill_switch.is_killed() {
            return;
        }
        self.kill_switch.trigger();
        self.do_kill().await;
    }

    async fn do_kill(&mut self) {
        if let Some(task) = self.active_task.as_mut() {
            task.cancel_application(true).await;
        }
        for app_id in self.ctx.app_ids.split(',').filter(|s| !s.is_empty()) {
            self.app_killer.kill_app(app_id).await;
        }
    }

    /// Drive the context through its full lifecycle: dry-run, or
    /// staging -> running -> reporting -> cleaned (with a failing
    /// detour on any error). Always delivers exactly one RESULT
    /// message and always runs cleanup, even after failure.
    pub async fn run(&mut self) {
        let task_log_name = self.ctx.build_task_log_name();
        let span = tracing::info_span!(
            "task_run",
            task_log_name = %task_log_name,
            task_instance_id = self.ctx.task_instance_id,
        );
        self.run_inner().instrument(span).await;
    }

    async fn run_inner(&mut self) {
        if self.ctx.dry_run {
            self.run_dry_run().await;
            return;
        }

        self.state = RunnerState::Staging;
        let reporter = StatusReporter::new(&self.config);
        self.ctx.stamp_start_time();
        reporter.send(&self.ctx, MessageKind::Running).await;

        let outcome = self.stage_and_execute().await;

        match outcome {
            Ok(()) => {
                tracing::debug!("task completed without error");
            }
            Err(e) => {
                self.state = RunnerState::Failing;
                tracing::warn!(error = %e, "task failed, running best-effort kill before reporting");
                // A kill mid-handle() already ran cancel_application
                // once from inside stage_and_execute; don't repeat it.
                if !self.kill_switch.is_killed() {
                    self.do_kill().await;
                }
                self.ctx.current_execution_status = Some(ExecutionStatus::Failure);
            }
        }

        self.ctx.end_time = Some(Utc::now());
        if self.ctx.current_execution_status.is_none() {
            // Should not happen on the success path (RUNNING ->
            // REPORTING sets it), but never leave a task unreported.
            self.ctx.current_execution_status = Some(ExecutionStatus::Failure);
        }

        self.finish(reporter).await;
    }

    async fn run_dry_run(&mut self) {
        self.ctx.current_execution_status = Some(ExecutionStatus::Success);
        let now = Utc::now();
        self.ctx.start_time = Some(now);
        self.ctx.end_time = Some(now);

        self.cache.remove(self.ctx.task_instance_id);

        let reporter = StatusReporter::new(&self.config);
        reporter.send(&self.ctx, MessageKind::Result).await;

        self.state = RunnerState::DryRunDone;
    }

    async fn stage_and_execute(&mut self) -> anyhow::Result<()> {
        let exec_path = std::path::PathBuf::from(&self.ctx.execute_path);

        let binder = ParameterBinder;
        let global_params_map = binder.build_global_params_map(&self.ctx.global_params);
        self.ctx.defined_params = global_params_map;

        let stager = ResourceStager;
        let downloads = stager.plan_downloads(
            &exec_path,
            &self.ctx.resources,
            self.config.resource_upload_enabled,
        )?;
        if !downloads.is_empty() {
            std::fs::create_dir_all(&exec_path)?;
            stager.download(self.storage.as_ref(), &exec_path, &downloads).await?;
        }

        self.ctx.env_file = self.config.system_env_path.clone();
        let task_app_id = self.ctx.task_app_id();
        let business_params = binder.pre_build_business_params(self.ctx.schedule_time);
        for (key, property) in business_params {
            self.ctx.params_map.insert(key, property);
        }

        self.state = RunnerState::Running;
        self.ctx.task_log_name = self.ctx.build_task_log_name();

        let channel = self
            .channels
            .get(&self.ctx.task_type)
            .ok_or_else(|| anyhow::anyhow!(crate::error::WorkerError::PluginNotFound(self.ctx.task_type.clone())))?;

        let mut task = channel.create_task(&self.ctx);
        task.init()
            .await
            .map_err(|e| crate::error::WorkerError::PluginRuntimeError(e.to_string()))?;
        task.set_parameters(Parameters {
            var_pool: self.ctx.var_pool.clone(),
        });

        self.active_task = Some(task);
        tracing::info!(task_app_id = %task_app_id, "task handed to plugin, blocking on handle()");

        // `cancelled()` checks `is_killed` itself after registering
        // interest, so a kill already requested (or one racing with
        // the start of `handle()`) is observed either way.
        let kill_switch = self.kill_switch.clone();
        let handle_result = tokio::select! {
            result = self
                .active_task
                .as_mut()
                .expect("active_task was just set")
                .handle() => result,
            () = kill_switch.cancelled() => {
                self.do_kill().await;
                Err(anyhow::anyhow!("task killed during handle()"))
            }
        };

        handle_result.map_err(|e| crate::error::WorkerError::PluginRuntimeError(e.to_string()))?;

        let task = self.active_task.as_ref().expect("active_task was just set");

        let exit_status = task.exit_status();
        let execution_status = if exit_status.code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failure
        };

        if task.need_alert() {
            if let Some(info) = task.task_alert_info() {
                let reporter = StatusReporter::new(&self.config);
                reporter
                    .alert(self.alert_sender.as_ref(), &info, execution_status)
                    .await;
            }
        }

        self.ctx.current_execution_status = Some(execution_status);
        self.ctx.process_id = task.process_id();
        self.ctx.app_ids = task.app_ids();
        self.ctx.var_pool = task.parameters().var_pool;

        self.state = RunnerState::Reporting;
        Ok(())
    }

    /// REPORTING -> CLEANED: always runs, even after failure. Evicts
    /// the context cache entry, sends RESULT with retry, clears the
    /// work directory, and lets the per-task log span end on drop.
    async fn finish(&mut self, reporter: StatusReporter) {
        self.cache.remove(self.ctx.task_instance_id);
        reporter.send(&self.ctx, MessageKind::Result).await;
        WorkDirectory.clear(&self.ctx.execute_path, self.config.develop_mode);
        self.state = RunnerState::Cleaned;
    }

    #[must_use]
    pub fn context(&self) -> &TaskExecutionContext {
        &self.ctx
    }
}

impl Delayed for TaskRunner {
    fn deadline(&self) -> chrono::DateTime<Utc> {
        self.ctx.first_submit_time + chrono::Duration::minutes(i64::from(self.ctx.delay_minutes))
    }

    fn tie_break_key(&self) -> i64 {
        self.ctx.task_instance_id
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("task_instance_id", &self.ctx.task_instance_id)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_stager::StorageOperate;
    use crate::status_reporter::TaskAlertInfo;
    use crate::task_channel::{AbstractTask, ExitStatus, TaskChannel};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct NoopStorage;
    #[async_trait]
    impl StorageOperate for NoopStorage {
        fn resolve_resource_path(&self, tenant_code: &str, file_name: &str) -> String {
            format!("hdfs://{tenant_code}/{file_name}")
        }
        async fn download(
            &self,
            _tenant_code: &str,
            _remote_path: &str,
            local_path: &std::path::Path,
            _delete_source: bool,
            _overwrite: bool,
        ) -> anyhow::Result<()> {
            std::fs::write(local_path, b"x")?;
            Ok(())
        }
    }

    struct NoopAlertSender;
    #[async_trait]
    impl AlertSender for NoopAlertSender {
        async fn send_alert(
            &self,
            _group_id: i64,
            _title: &str,
            _content: &str,
            _strategy: crate::status_reporter::WarningType,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct ScriptedTask {
        exit_code: i32,
        fail_handle: bool,
        cancel_calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl AbstractTask for ScriptedTask {
        async fn init(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn handle(&mut self) -> anyhow::Result<()> {
            if self.fail_handle {
                anyhow::bail!("simulated plugin failure");
            }
            Ok(())
        }
        async fn cancel_application(&mut self, _force: bool) {
            *self.cancel_calls.lock().unwrap() += 1;
        }
        fn exit_status(&self) -> ExitStatus {
            ExitStatus { code: self.exit_code }
        }
        fn process_id(&self) -> i32 {
            123
        }
        fn app_ids(&self) -> String {
            String::new()
        }
        fn parameters(&self) -> Parameters {
            Parameters::default()
        }
        fn set_parameters(&mut self, _parameters: Parameters) {}
        fn need_alert(&self) -> bool {
            false
        }
        fn task_alert_info(&self) -> Option<TaskAlertInfo> {
            None
        }
    }

    struct ScriptedChannel {
        exit_code: i32,
        fail_handle: bool,
        cancel_calls: Arc<Mutex<u32>>,
    }

    impl TaskChannel for ScriptedChannel {
        fn create_task(&self, _ctx: &TaskExecutionContext) -> Box<dyn AbstractTask> {
            Box::new(ScriptedTask {
                exit_code: self.exit_code,
                fail_handle: self.fail_handle,
                cancel_calls: Arc::clone(&self.cancel_calls),
            })
        }
    }

    fn base_ctx(task_instance_id: i64, dry_run: bool, task_type: &str) -> TaskExecutionContext {
        TaskExecutionContext {
            task_instance_id,
            process_instance_id: 1,
            process_define_code: 10,
            process_define_version: 1,
            first_submit_time: Utc::now(),
            schedule_time: None,
            delay_minutes: 0,
            task_type: task_type.to_string(),
            execute_path: std::env::temp_dir()
                .join(format!("worker-runtime-test-{task_instance_id}"))
                .to_string_lossy()
                .to_string(),
            env_file: String::new(),
            dry_run,
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

    fn runner(ctx: TaskExecutionContext, channels: TaskChannelRegistry) -> (TaskRunner, TaskExecutionContextCache) {
        let cache = TaskExecutionContextCache::new();
        cache.register(ctx.clone());
        let config = WorkerConfig {
            master_rpc_max_attempts: 1,
            ..WorkerConfig::default()
        };
        let runner = TaskRunner::new(
            ctx,
            cache.clone(),
            config,
            channels,
            Arc::new(NoopStorage),
            Arc::new(NoopAlertSender),
            Arc::new(NoopAppKiller),
        );
        (runner, cache)
    }

    #[tokio::test]
    async fn dry_run_succeeds_without_plugin_or_running_message() {
        let ctx = base_ctx(42, true, "UNUSED");
        let (mut runner, cache) = runner(ctx, TaskChannelRegistry::new());

        runner.run().await;

        assert_eq!(runner.state(), RunnerState::DryRunDone);
        assert_eq!(
            runner.context().current_execution_status,
            Some(ExecutionStatus::Success)
        );
        assert_eq!(runner.context().start_time, runner.context().end_time);
        assert!(!cache.contains(42));
    }

    #[tokio::test]
    async fn unknown_plugin_fails_and_cleans_up() {
        let ctx = base_ctx(7, false, "DOES_NOT_EXIST");
        let exec_path = ctx.execute_path.clone();
        std::fs::create_dir_all(&exec_path).unwrap();

        let (mut runner, cache) = runner(ctx, TaskChannelRegistry::new());
        runner.run().await;

        assert_eq!(
            runner.context().current_execution_status,
            Some(ExecutionStatus::Failure)
        );
        assert!(!cache.contains(7));
        assert!(!std::path::Path::new(&exec_path).exists());
    }

    #[tokio::test]
    async fn resources_required_but_storage_disabled_fails_without_download() {
        let mut ctx = base_ctx(8, false, "SHELL");
        ctx.resources.insert("a.sh".to_string(), "tenantA".to_string());

        let mut channels = TaskChannelRegistry::new();
        channels.register(
            "SHELL",
            Arc::new(ScriptedChannel {
                exit_code: 0,
                fail_handle: false,
                cancel_calls: Arc::new(Mutex::new(0)),
            }),
        );

        let cache = TaskExecutionContextCache::new();
        cache.register(ctx.clone());
        let config = WorkerConfig {
            master_rpc_max_attempts: 1,
            resource_upload_enabled: false,
            ..WorkerConfig::default()
        };
        let mut runner = TaskRunner::new(
            ctx,
            cache,
            config,
            channels,
            Arc::new(NoopStorage),
            Arc::new(NoopAlertSender),
            Arc::new(NoopAppKiller),
        );

        runner.run().await;

        assert_eq!(
            runner.context().current_execution_status,
            Some(ExecutionStatus::Failure)
        );
        assert!(!std::path::Path::new(&runner.context().execute_path.clone()).join("a.sh").exists());
    }

    #[tokio::test]
    async fn successful_plugin_run_reports_success() {
        let ctx = base_ctx(9, false, "SHELL");
        let mut channels = TaskChannelRegistry::new();
        channels.register(
            "SHELL",
            Arc::new(ScriptedChannel {
                exit_code: 0,
                fail_handle: false,
                cancel_calls: Arc::new(Mutex::new(0)),
            }),
        );

        let (mut runner, _cache) = runner(ctx, channels);
        runner.run().await;

        assert_eq!(
            runner.context().current_execution_status,
            Some(ExecutionStatus::Success)
        );
        assert_eq!(runner.context().process_id, 123);
        assert!(runner.context().end_time.unwrap() >= runner.context().start_time.unwrap());
    }

    #[tokio::test]
    async fn plugin_runtime_error_triggers_best_effort_kill() {
        let ctx = base_ctx(10, false, "SHELL");
        let cancel_calls = Arc::new(Mutex::new(0));
        let mut channels = TaskChannelRegistry::new();
        channels.register(
            "SHELL",
            Arc::new(ScriptedChannel {
                exit_code: 0,
                fail_handle: true,
                cancel_calls: Arc::clone(&cancel_calls),
            }),
        );

        let (mut runner, _cache) = runner(ctx, channels);
        runner.run().await;

        assert_eq!(
            runner.context().current_execution_status,
            Some(ExecutionStatus::Failure)
        );
        assert_eq!(*cancel_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let ctx = base_ctx(11, false, "SHELL");
        let cancel_calls = Arc::new(Mutex::new(0));
        let mut channels = TaskChannelRegistry::new();
        channels.register(
            "SHELL",
            Arc::new(ScriptedChannel {
                exit_code: 0,
                fail_handle: false,
                cancel_calls: Arc::clone(&cancel_calls),
            }),
        );
        let (mut runner, _cache) = runner(ctx, channels);

        runner.kill().await;
        runner.kill().await;

        assert!(runner.kill_switch().is_killed());
        // No active task was ever installed (kill called before run),
        // so cancel_application should not have been reached via the
        // task path; idempotence here is about the switch itself.
        assert_eq!(*cancel_calls.lock().unwrap(), 0);
    }

    struct BlockingTask {
        cancel_calls: Arc<Mutex<u32>>,
        canceled: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl AbstractTask for BlockingTask {
        async fn init(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn handle(&mut self) -> anyhow::Result<()> {
            // Blocks forever unless cancel_application wakes it.
            self.canceled.notified().await;
            Ok(())
        }
        async fn cancel_application(&mut self, _force: bool) {
            *self.cancel_calls.lock().unwrap() += 1;
            self.canceled.notify_waiters();
        }
        fn exit_status(&self) -> ExitStatus {
            ExitStatus { code: 0 }
        }
        fn process_id(&self) -> i32 {
            321
        }
        fn app_ids(&self) -> String {
            String::new()
        }
        fn parameters(&self) -> Parameters {
            Parameters::default()
        }
        fn set_parameters(&mut self, _parameters: Parameters) {}
        fn need_alert(&self) -> bool {
            false
        }
        fn task_alert_info(&self) -> Option<TaskAlertInfo> {
            None
        }
    }

    struct BlockingChannel {
        cancel_calls: Arc<Mutex<u32>>,
        canceled: Arc<tokio::sync::Notify>,
    }

    impl TaskChannel for BlockingChannel {
        fn create_task(&self, _ctx: &TaskExecutionContext) -> Box<dyn AbstractTask> {
            Box::new(BlockingTask {
                cancel_calls: Arc::clone(&self.cancel_calls),
                canceled: Arc::clone(&self.canceled),
            })
        }
    }

    #[tokio::test]
    async fn kill_during_handle_cancels_exactly_once_and_reports_failure() {
        let ctx = base_ctx(12, false, "SHELL");
        let cancel_calls = Arc::new(Mutex::new(0));
        let canceled = Arc::new(tokio::sync::Notify::new());
        let mut channels = TaskChannelRegistry::new();
        channels.register(
            "SHELL",
            Arc::new(BlockingChannel {
                cancel_calls: Arc::clone(&cancel_calls),
                canceled,
            }),
        );

        let (mut runner, _cache) = runner(ctx, channels);
        let kill_switch = runner.kill_switch();

        let run_handle = tokio::spawn(async move {
            runner.run().await;
            runner
        });

        // Give the runner a moment to reach handle() before killing it.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        kill_switch.trigger();

        let runner = tokio::time::timeout(std::time::Duration::from_secs(1), run_handle)
            .await
            .expect("run should finish shortly after kill")
            .expect("runner task should not panic");

        assert_eq!(
            runner.context().current_execution_status,
            Some(ExecutionStatus::Failure)
        );
        assert_eq!(*cancel_calls.lock().unwrap(), 1);
    }
}
