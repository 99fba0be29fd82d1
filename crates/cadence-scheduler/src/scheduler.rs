//! Task Scheduler: owns the live trigger registry and the dispatch runtime.
//!
//! Each live trigger is a spawned tokio task that sleeps until the next cron
//! occurrence and then asks the scheduler to fire. Firing runs as its own
//! spawned unit, so a stopped or replaced trigger never cancels an execution
//! that has already begun.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use cadence_core::config::SchedulerConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::TaskRepository;
use cadence_core::types::{TaskDefinition, TaskFilter, TaskId, TaskPatch, TaskStatus};
use cadence_executor::ExecutorRegistry;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio::task::JoinHandle;

use crate::cron::CronSchedule;
use crate::limiter::{ConcurrencyLimiter, LimiterStats};
use crate::recorder::ExecutionRecorder;

/// A live trigger. Dropping the handle kills the trigger loop.
struct TriggerHandle {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Default)]
struct Registry {
    triggers: HashMap<TaskId, TriggerHandle>,
    /// Completion signal per executing task; flips to `true` once its log exists.
    in_flight: HashMap<TaskId, watch::Receiver<bool>>,
}

struct Shared {
    repo: Arc<dyn TaskRepository>,
    executors: Arc<ExecutorRegistry>,
    recorder: ExecutionRecorder,
    limiter: ConcurrencyLimiter,
    running: AtomicBool,
    generations: AtomicU64,
    registry: RwLock<Registry>,
    load_page_size: usize,
}

/// What a trigger loop should do after a fire attempt.
enum Fire {
    Continue,
    Retire,
}

/// Held by a dispatched execution; releases its tracker and slot on drop.
struct InFlight {
    shared: Arc<Shared>,
    task_id: TaskId,
    done: watch::Sender<bool>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.registry.write().in_flight.remove(&self.task_id);
        self.done.send_replace(true);
    }
}

impl Shared {
    /// Called by a trigger loop at a cron occurrence.
    fn fire(
        self: &Arc<Self>,
        task: &TaskDefinition,
        schedule: &CronSchedule,
        generation: u64,
    ) -> Fire {
        if !self.running.load(Ordering::SeqCst) {
            tracing::debug!("⏸️ Runtime stopped, task #{} not fired", task.id);
            return Fire::Continue;
        }

        let mut registry = self.registry.write();
        let current = registry
            .triggers
            .get(&task.id)
            .is_some_and(|t| t.generation == generation);
        if !current {
            return Fire::Retire;
        }
        if registry.in_flight.contains_key(&task.id) {
            tracing::debug!("⏭️ Task #{} still executing, skipping this occurrence", task.id);
            return Fire::Continue;
        }
        let Some(permit) = self.limiter.try_acquire() else {
            tracing::debug!(
                "⏭️ Concurrency ceiling ({}) reached, task #{} deferred to its next occurrence",
                self.limiter.max_concurrent(),
                task.id
            );
            return Fire::Continue;
        };

        let (done, watcher) = watch::channel(false);
        registry.in_flight.insert(task.id, watcher);
        drop(registry);

        let guard = InFlight {
            shared: Arc::clone(self),
            task_id: task.id,
            done,
            _permit: permit,
        };
        let task = task.clone();
        let schedule = schedule.clone();
        tokio::spawn(async move {
            guard.shared.dispatch(task, &schedule).await;
            drop(guard);
        });
        Fire::Continue
    }

    async fn dispatch(&self, task: TaskDefinition, schedule: &CronSchedule) {
        let started_at = Utc::now();
        tracing::info!("🔔 Task triggered: '{}' (#{})", task.name, task.id);

        let running = TaskPatch::status(TaskStatus::Running).with_last_execute_time(started_at);
        if let Err(e) = self.repo.update(task.id, running).await {
            tracing::warn!("⚠️ Failed to mark task #{} running: {}", task.id, e);
        }

        let clock = Instant::now();
        let result = AssertUnwindSafe(self.executors.execute(&task))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                Err(CadenceError::Execution(format!("executor panicked: {reason}")))
            });
        let duration_ms = clock.elapsed().as_millis() as u64;

        let (status, retire) = match &result {
            Err(_) => (TaskStatus::Error, true),
            Ok(()) if task.is_one_time() => (TaskStatus::Completed, true),
            Ok(()) => (TaskStatus::Enabled, false),
        };
        match &result {
            Ok(()) => tracing::info!(
                "✅ Task '{}' (#{}) finished in {}ms → {}",
                task.name,
                task.id,
                duration_ms,
                status
            ),
            Err(e) => tracing::error!(
                "❌ Task '{}' (#{}) failed after {}ms: {}",
                task.name,
                task.id,
                duration_ms,
                e
            ),
        }

        let next = if retire {
            None
        } else {
            schedule.next_after(Utc::now())
        };
        let finished = TaskPatch::status(status).with_next_execute_time(next);
        if let Err(e) = self.repo.update(task.id, finished).await {
            tracing::warn!("⚠️ Failed to persist status of task #{}: {}", task.id, e);
        }

        // A terminal status retires whatever trigger is live now, including
        // one installed by an update while this execution ran.
        if retire && self.deregister(task.id) {
            tracing::info!("🗑️ Trigger for task #{} removed ({})", task.id, status);
        }

        if let Err(e) = self
            .recorder
            .record(task.id, started_at, duration_ms, result.as_ref().err())
            .await
        {
            tracing::warn!("⚠️ Failed to record execution of task #{}: {}", task.id, e);
        }
    }

    fn deregister(&self, id: TaskId) -> bool {
        self.registry.write().triggers.remove(&id).is_some()
    }
}

async fn trigger_loop(
    shared: Weak<Shared>,
    task: TaskDefinition,
    schedule: CronSchedule,
    generation: u64,
) {
    let mut last_fired: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        // Never compute from before the last fired slot, so a slot fires once.
        let after = match last_fired {
            Some(at) if at > now => at,
            _ => now,
        };
        let Some(next) = schedule.next_after(after) else {
            tracing::warn!("⚠️ Task #{} has no future occurrence, trigger idle", task.id);
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        last_fired = Some(next);

        let Some(scheduler) = shared.upgrade() else {
            return;
        };
        if let Fire::Retire = scheduler.fire(&task, &schedule, generation) {
            return;
        }
    }
}

/// Cron-driven task scheduler.
///
/// Holds at most one live trigger per task ID. Execution failures never
/// propagate out of the dispatch runtime: they become a `failure` log and an
/// `error` task status.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        executors: Arc<ExecutorRegistry>,
        recorder: ExecutionRecorder,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                repo,
                executors,
                recorder,
                limiter: ConcurrencyLimiter::new(config.max_concurrent),
                running: AtomicBool::new(false),
                generations: AtomicU64::new(0),
                registry: RwLock::new(Registry::default()),
                load_page_size: config.load_page_size.max(1),
            }),
        }
    }

    /// Load every enabled task, register its trigger, then start firing.
    ///
    /// Tasks with a malformed cron expression are logged and skipped.
    pub async fn start(&self) -> Result<()> {
        let live = self.load_enabled().await?;
        self.shared.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "🚀 Scheduler started: {} trigger(s) live, concurrency ceiling {}",
            live,
            self.shared.limiter.max_concurrent()
        );
        Ok(())
    }

    /// Stop firing. In-flight executions run to completion.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        tracing::info!("🛑 Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop firing and destroy every live trigger.
    pub fn shutdown(&self) {
        self.stop();
        let dropped = std::mem::take(&mut self.shared.registry.write().triggers);
        tracing::info!("👋 Scheduler shut down, {} trigger(s) destroyed", dropped.len());
    }

    /// Wait until no execution is in flight, at most `grace`.
    ///
    /// Returns `false` when executions were still running at the deadline.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let pending: Vec<_> = self
                .shared
                .registry
                .read()
                .in_flight
                .values()
                .cloned()
                .collect();
            if pending.is_empty() {
                return true;
            }
            tracing::info!("⏳ Waiting for {} in-flight execution(s)", pending.len());
            for mut watcher in pending {
                let finished = tokio::time::timeout_at(deadline, watcher.wait_for(|done| *done));
                if finished.await.is_err() {
                    let left = self.shared.registry.read().in_flight.len();
                    tracing::warn!("⚠️ {} execution(s) still running after {:?}", left, grace);
                    return false;
                }
            }
        }
    }

    /// (Re)register the trigger of a persisted, enabled task.
    pub async fn start_task(&self, id: TaskId) -> Result<()> {
        let task = self.shared.repo.get_by_id(id).await?;
        if !task.is_enabled() {
            return Err(CadenceError::NotEnabled(id));
        }
        self.shared.deregister(id);
        self.install(task).await
    }

    /// Remove a task's trigger, waiting for an in-flight execution to finish
    /// and record its log first.
    pub async fn stop_task(&self, id: TaskId) -> Result<()> {
        loop {
            let mut pending = {
                let mut registry = self.shared.registry.write();
                if !registry.triggers.contains_key(&id) {
                    return Err(CadenceError::NotFound(id));
                }
                match registry.in_flight.get(&id) {
                    Some(watcher) => watcher.clone(),
                    None => {
                        registry.triggers.remove(&id);
                        tracing::info!("⏹️ Trigger for task #{} stopped", id);
                        return Ok(());
                    }
                }
            };
            tracing::info!("⏳ Task #{} is executing, waiting before stopping it", id);
            // An error means the execution is gone as well.
            let _ = pending.wait_for(|done| *done).await;
        }
    }

    /// Replace any trigger for this task; register a new one only when enabled.
    pub async fn add_task(&self, task: TaskDefinition) -> Result<()> {
        self.shared.deregister(task.id);
        if !task.is_enabled() {
            tracing::info!(
                "💤 Task '{}' (#{}) accepted but dormant ({})",
                task.name,
                task.id,
                task.status
            );
            return Ok(());
        }
        self.install(task).await
    }

    pub async fn update_task(&self, task: TaskDefinition) -> Result<()> {
        self.add_task(task).await
    }

    /// Drop the task's trigger if it has one. Returns whether one existed.
    pub fn remove_task(&self, id: TaskId) -> bool {
        let removed = self.shared.deregister(id);
        if removed {
            tracing::info!("🗑️ Trigger for task #{} removed", id);
        }
        removed
    }

    /// Discard every trigger and load enabled tasks again.
    pub async fn reload_tasks(&self) -> Result<usize> {
        let dropped = std::mem::take(&mut self.shared.registry.write().triggers);
        tracing::info!("🔄 Reloading tasks, {} trigger(s) discarded", dropped.len());
        drop(dropped);
        self.load_enabled().await
    }

    /// Persist `enabled`, then register the trigger.
    pub async fn enable_task(&self, id: TaskId) -> Result<()> {
        self.shared
            .repo
            .update(id, TaskPatch::status(TaskStatus::Enabled))
            .await?;
        self.start_task(id).await
    }

    /// Persist `disabled`, then stop the trigger if there is one.
    pub async fn disable_task(&self, id: TaskId) -> Result<()> {
        self.shared
            .repo
            .update(id, TaskPatch::status(TaskStatus::Disabled))
            .await?;
        match self.stop_task(id).await {
            Ok(()) | Err(CadenceError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// True iff a live trigger exists for the task.
    pub fn get_task_status(&self, id: TaskId) -> bool {
        self.shared.registry.read().triggers.contains_key(&id)
    }

    /// Every live trigger, mapped to whether it is currently executing.
    pub fn list_all_tasks(&self) -> HashMap<TaskId, bool> {
        let registry = self.shared.registry.read();
        registry
            .triggers
            .keys()
            .map(|id| (*id, registry.in_flight.contains_key(id)))
            .collect()
    }

    pub fn limiter_stats(&self) -> LimiterStats {
        self.shared.limiter.stats()
    }

    async fn load_enabled(&self) -> Result<usize> {
        let mut filter = TaskFilter::with_status(TaskStatus::Enabled, self.shared.load_page_size);
        let mut tasks = Vec::new();
        loop {
            let page = self.shared.repo.search_paginated(&filter).await?;
            let done = page.is_last() || page.items.is_empty();
            tasks.extend(page.items);
            if done {
                break;
            }
            filter.page += 1;
        }

        let mut live = 0;
        for task in tasks {
            let (id, name) = (task.id, task.name.clone());
            match self.install(task).await {
                Ok(()) => live += 1,
                Err(e) => tracing::warn!("⚠️ Task '{}' (#{}) not scheduled: {}", name, id, e),
            }
        }
        Ok(live)
    }

    async fn install(&self, task: TaskDefinition) -> Result<()> {
        let schedule = CronSchedule::parse(&task.cron_expression)?;
        let next = schedule.next_after(Utc::now());
        let id = task.id;
        if !self.shared.executors.contains(&task.task_type) {
            // Still scheduled; each run fails until an executor is registered.
            tracing::warn!(
                "⚠️ Task #{} has type '{}' with no registered executor",
                id,
                task.task_type
            );
        }
        tracing::info!(
            "📅 Task scheduled: '{}' (#{}) on '{}'",
            task.name,
            id,
            schedule.expression()
        );

        {
            let mut registry = self.shared.registry.write();
            let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed) + 1;
            let handle = tokio::spawn(trigger_loop(
                Arc::downgrade(&self.shared),
                task,
                schedule,
                generation,
            ));
            registry
                .triggers
                .insert(id, TriggerHandle { generation, handle });
        }

        let stamp = TaskPatch::default().with_next_execute_time(next);
        if let Err(e) = self.shared.repo.update(id, stamp).await {
            tracing::warn!("⚠️ Failed to stamp next run of task #{}: {}", id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogBroadcaster;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use cadence_core::traits::TaskExecutor;
    use cadence_core::types::{ExecType, NewTask};
    use cadence_executor::{HttpExecutor, ShellExecutor};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const EVERY_SECOND: &str = "* * * * * *";
    const YEARLY: &str = "0 0 1 1 *";

    /// Test executor: sleeps `sleep_ms`, then fails when `fail` is set or
    /// panics when `panic` is set. Tracks how many executions overlap.
    #[derive(Default)]
    struct Scripted {
        current: AtomicUsize,
        peak: AtomicUsize,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(&self, task: &TaskDefinition) -> Result<()> {
            let params: serde_json::Value = serde_json::from_str(&task.params)?;
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            let sleep_ms = params["sleep_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            if params["panic"].as_bool().unwrap_or(false) {
                panic!("scripted panic");
            }
            if params["fail"].as_bool().unwrap_or(false) {
                return Err(CadenceError::Execution("scripted failure".into()));
            }
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        scripted: Arc<Scripted>,
        scheduler: TaskScheduler,
    }

    fn fixture(max_concurrent: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let scripted = Arc::new(Scripted::default());
        let executors = Arc::new(ExecutorRegistry::new());
        executors.register_executor("scripted", scripted.clone());
        executors.register_executor("shell", Arc::new(ShellExecutor::default()));
        executors.register_executor(
            "http",
            Arc::new(HttpExecutor::new(30, "cadence-test").unwrap()),
        );
        let recorder = ExecutionRecorder::new(store.clone(), Arc::new(LogBroadcaster::default()));
        let config = SchedulerConfig {
            max_concurrent,
            load_page_size: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = TaskScheduler::new(store.clone(), executors, recorder, &config);
        Fixture {
            store,
            scripted,
            scheduler,
        }
    }

    async fn create(
        store: &MemoryStore,
        name: &str,
        cron: &str,
        task_type: &str,
        params: serde_json::Value,
        exec_type: ExecType,
        status: TaskStatus,
    ) -> TaskDefinition {
        TaskRepository::create(
            store,
            NewTask {
                name: name.into(),
                description: String::new(),
                cron_expression: cron.into(),
                task_type: task_type.into(),
                params: params.to_string(),
                exec_type,
                status,
            },
        )
        .await
        .unwrap()
    }

    async fn wait_until(secs: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(secs);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        check()
    }

    async fn status_of(store: &MemoryStore, id: TaskId) -> TaskStatus {
        store.get_by_id(id).await.unwrap().status
    }

    #[tokio::test]
    async fn test_at_most_one_trigger_per_task() {
        let fx = fixture(4);
        let task = create(&fx.store, "once", YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;

        fx.scheduler.start().await.unwrap();
        fx.scheduler.add_task(task.clone()).await.unwrap();
        fx.scheduler.update_task(task.clone()).await.unwrap();
        fx.scheduler.start_task(task.id).await.unwrap();
        fx.scheduler.start_task(task.id).await.unwrap();

        let all = fx.scheduler.list_all_tasks();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get(&task.id), Some(&false));
        assert!(fx.scheduler.get_task_status(task.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replaced_trigger_fires_once_per_slot() {
        let fx = fixture(4);
        let task = create(&fx.store, "tick", EVERY_SECOND, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;

        fx.scheduler.start().await.unwrap();
        for _ in 0..5 {
            fx.scheduler.update_task(task.clone()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(2500)).await;
        fx.scheduler.shutdown();

        // Two or three whole-second slots elapsed; replaced loops never fire.
        let runs = fx.scripted.runs.load(Ordering::SeqCst);
        assert!((1..=3).contains(&runs), "unexpected run count {runs}");
        assert_eq!(fx.scripted.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_task_waits_for_in_flight_execution() {
        let fx = fixture(4);
        let task = create(
            &fx.store,
            "slow",
            EVERY_SECOND,
            "scripted",
            json!({"sleep_ms": 1500}),
            ExecType::Recurring,
            TaskStatus::Enabled,
        )
        .await;
        fx.scheduler.start().await.unwrap();

        let executing = wait_until(5, || {
            fx.scheduler.list_all_tasks().get(&task.id) == Some(&true)
        })
        .await;
        assert!(executing, "task never started executing");
        assert!(fx.store.all_logs().is_empty());

        fx.scheduler.stop_task(task.id).await.unwrap();

        let logs = fx.store.all_logs();
        assert!(logs.iter().any(|l| l.task_id == task.id && l.is_success()));
        assert!(!fx.scheduler.get_task_status(task.id));
        assert!(matches!(
            fx.scheduler.stop_task(task.id).await,
            Err(CadenceError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_time_shell_task_completes_and_retires() {
        let fx = fixture(4);
        let task = create(
            &fx.store,
            "echo",
            EVERY_SECOND,
            "shell",
            json!({"command": "echo ok"}),
            ExecType::OneTime,
            TaskStatus::Enabled,
        )
        .await;
        fx.scheduler.start().await.unwrap();
        assert!(fx.scheduler.get_task_status(task.id));

        assert!(wait_until(5, || !fx.store.all_logs().is_empty()).await);
        let logs = fx.store.all_logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].is_success());
        assert!(logs[0].error_message.is_empty());
        assert!(!fx.scheduler.get_task_status(task.id));

        let stored = fx.store.get_by_id(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.last_execute_time.is_some());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fx.store.all_logs().len(), 1, "one-time task fired again");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_recurring_failure_parks_task_in_error() {
        let fx = fixture(4);
        let task = create(
            &fx.store,
            "flaky",
            EVERY_SECOND,
            "scripted",
            json!({"fail": true}),
            ExecType::Recurring,
            TaskStatus::Enabled,
        )
        .await;
        fx.scheduler.start().await.unwrap();

        assert!(wait_until(5, || !fx.store.all_logs().is_empty()).await);
        let log = &fx.store.all_logs()[0];
        assert!(!log.is_success());
        assert!(log.error_message.contains("scripted failure"));
        assert_eq!(status_of(&fx.store, task.id).await, TaskStatus::Error);
        assert!(!fx.scheduler.get_task_status(task.id));

        // Not retried automatically.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fx.store.all_logs().len(), 1);

        assert!(matches!(
            fx.scheduler.start_task(task.id).await,
            Err(CadenceError::NotEnabled(_))
        ));
        fx.store
            .update(task.id, TaskPatch::status(TaskStatus::Enabled))
            .await
            .unwrap();
        fx.scheduler.start_task(task.id).await.unwrap();
        assert!(fx.scheduler.get_task_status(task.id));
        fx.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_cron_is_isolated() {
        let fx = fixture(4);
        let good = create(&fx.store, "good", YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;
        let bad = create(&fx.store, "bad", "not a cron", "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;

        fx.scheduler.start().await.unwrap();
        assert!(fx.scheduler.get_task_status(good.id));
        assert!(!fx.scheduler.get_task_status(bad.id));

        assert!(matches!(
            fx.scheduler.start_task(bad.id).await,
            Err(CadenceError::InvalidCron { .. })
        ));
        assert!(!fx.scheduler.get_task_status(bad.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_ceiling_defers_to_next_occurrence() {
        let fx = fixture(1);
        for name in ["a", "b"] {
            create(
                &fx.store,
                name,
                EVERY_SECOND,
                "scripted",
                json!({"sleep_ms": 1200}),
                ExecType::Recurring,
                TaskStatus::Enabled,
            )
            .await;
        }
        fx.scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        fx.scheduler.shutdown();

        assert_eq!(fx.scripted.peak.load(Ordering::SeqCst), 1);
        let stats = fx.scheduler.limiter_stats();
        assert_eq!(stats.max_concurrent, 1);
        assert!(stats.total_dispatched >= 1);
        assert!(stats.total_deferred >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_http_timeout_marks_task_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fx = fixture(4);
        let task = create(
            &fx.store,
            "hang",
            EVERY_SECOND,
            "http",
            json!({"url": format!("http://{addr}/"), "timeoutSeconds": 1}),
            ExecType::Recurring,
            TaskStatus::Enabled,
        )
        .await;
        fx.scheduler.start().await.unwrap();

        assert!(wait_until(6, || !fx.store.all_logs().is_empty()).await);
        let log = &fx.store.all_logs()[0];
        assert!(!log.is_success());
        assert!(log.error_message.contains("timed out"), "{}", log.error_message);
        assert_eq!(status_of(&fx.store, task.id).await, TaskStatus::Error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stopped_runtime_does_not_fire() {
        let fx = fixture(4);
        let task = create(&fx.store, "idle", EVERY_SECOND, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;

        // Registered but the runtime was never started.
        fx.scheduler.add_task(task.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fx.scripted.runs.load(Ordering::SeqCst), 0);
        assert!(!fx.scheduler.is_running());

        fx.scheduler.start().await.unwrap();
        assert!(wait_until(5, || fx.scripted.runs.load(Ordering::SeqCst) > 0).await);
        fx.scheduler.stop();
        assert!(fx.scheduler.get_task_status(task.id));
        fx.scheduler.shutdown();
        assert!(fx.scheduler.list_all_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ids_and_idempotent_remove() {
        let fx = fixture(4);
        assert!(matches!(
            fx.scheduler.stop_task(42).await,
            Err(CadenceError::NotFound(42))
        ));
        assert!(matches!(
            fx.scheduler.start_task(42).await,
            Err(CadenceError::NotFound(42))
        ));
        assert!(!fx.scheduler.remove_task(42));

        let task = create(&fx.store, "r", YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;
        fx.scheduler.add_task(task.clone()).await.unwrap();
        assert!(fx.scheduler.remove_task(task.id));
        assert!(!fx.scheduler.remove_task(task.id));
    }

    #[tokio::test]
    async fn test_disabled_task_is_accepted_but_dormant() {
        let fx = fixture(4);
        let task = create(&fx.store, "off", YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Disabled).await;
        fx.scheduler.add_task(task.clone()).await.unwrap();
        assert!(!fx.scheduler.get_task_status(task.id));

        // Updating a live task to disabled drops its trigger.
        let mut live = create(&fx.store, "on", YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;
        fx.scheduler.add_task(live.clone()).await.unwrap();
        assert!(fx.scheduler.get_task_status(live.id));
        live.status = TaskStatus::Disabled;
        fx.scheduler.update_task(live.clone()).await.unwrap();
        assert!(!fx.scheduler.get_task_status(live.id));
    }

    #[tokio::test]
    async fn test_reload_follows_persisted_state() {
        let fx = fixture(4);
        let first = create(&fx.store, "first", YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;
        fx.scheduler.start().await.unwrap();
        assert_eq!(fx.scheduler.list_all_tasks().len(), 1);

        // Page size is 2, so five tasks span three pages.
        for i in 0..4 {
            create(&fx.store, &format!("more-{i}"), YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;
        }
        fx.store
            .update(first.id, TaskPatch::status(TaskStatus::Disabled))
            .await
            .unwrap();

        let live = fx.scheduler.reload_tasks().await.unwrap();
        assert_eq!(live, 4);
        assert_eq!(fx.scheduler.list_all_tasks().len(), 4);
        assert!(!fx.scheduler.get_task_status(first.id));
    }

    #[tokio::test]
    async fn test_enable_and_disable() {
        let fx = fixture(4);
        let task = create(&fx.store, "toggle", YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Disabled).await;

        fx.scheduler.enable_task(task.id).await.unwrap();
        assert_eq!(status_of(&fx.store, task.id).await, TaskStatus::Enabled);
        assert!(fx.scheduler.get_task_status(task.id));

        fx.scheduler.disable_task(task.id).await.unwrap();
        assert_eq!(status_of(&fx.store, task.id).await, TaskStatus::Disabled);
        assert!(!fx.scheduler.get_task_status(task.id));

        // No trigger left; still fine.
        fx.scheduler.disable_task(task.id).await.unwrap();
        assert!(fx.scheduler.enable_task(999).await.is_err());
    }

    #[tokio::test]
    async fn test_registration_stamps_next_execute_time() {
        let fx = fixture(4);
        let task = create(&fx.store, "stamp", YEARLY, "scripted", json!({}), ExecType::Recurring, TaskStatus::Enabled).await;
        assert!(task.next_execute_time.is_none());

        fx.scheduler.start_task(task.id).await.unwrap();
        let next = fx.store.get_by_id(task.id).await.unwrap().next_execute_time;
        assert!(next.is_some_and(|at| at > Utc::now()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_executor_panic_is_recorded_as_failure() {
        let fx = fixture(4);
        let task = create(
            &fx.store,
            "boom",
            EVERY_SECOND,
            "scripted",
            json!({"panic": true}),
            ExecType::Recurring,
            TaskStatus::Enabled,
        )
        .await;
        fx.scheduler.start().await.unwrap();

        assert!(wait_until(5, || !fx.store.all_logs().is_empty()).await);
        let log = &fx.store.all_logs()[0];
        assert!(!log.is_success());
        assert!(
            log.error_message.contains("executor panicked: scripted panic"),
            "{}",
            log.error_message
        );
        assert_eq!(status_of(&fx.store, task.id).await, TaskStatus::Error);
        assert!(!fx.scheduler.get_task_status(task.id));
        assert!(fx.scheduler.list_all_tasks().is_empty());
        assert!(wait_until(2, || fx.scheduler.limiter_stats().active == 0).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_during_failing_execution_leaves_no_trigger() {
        let fx = fixture(4);
        let task = create(
            &fx.store,
            "doomed",
            EVERY_SECOND,
            "scripted",
            json!({"sleep_ms": 800, "fail": true}),
            ExecType::Recurring,
            TaskStatus::Enabled,
        )
        .await;
        fx.scheduler.start().await.unwrap();

        let executing = wait_until(5, || {
            fx.scheduler.list_all_tasks().get(&task.id) == Some(&true)
        })
        .await;
        assert!(executing, "task never started executing");
        // A fresh trigger replaces the one whose execution is still running.
        fx.scheduler.update_task(task.clone()).await.unwrap();
        assert!(fx.scheduler.get_task_status(task.id));

        assert!(wait_until(5, || !fx.store.all_logs().is_empty()).await);
        assert!(wait_until(2, || !fx.scheduler.get_task_status(task.id)).await);
        assert_eq!(status_of(&fx.store, task.id).await, TaskStatus::Error);

        // The error status stays put: nothing fires again.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fx.store.all_logs().len(), 1);
        assert_eq!(fx.scripted.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_then_wait_idle_leaves_terminal_status() {
        let fx = fixture(4);
        let task = create(
            &fx.store,
            "draining",
            EVERY_SECOND,
            "scripted",
            json!({"sleep_ms": 1000}),
            ExecType::OneTime,
            TaskStatus::Enabled,
        )
        .await;
        fx.scheduler.start().await.unwrap();

        let executing = wait_until(5, || {
            fx.scheduler.list_all_tasks().get(&task.id) == Some(&true)
        })
        .await;
        assert!(executing, "task never started executing");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(status_of(&fx.store, task.id).await, TaskStatus::Running);

        fx.scheduler.shutdown();
        assert!(fx.scheduler.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(status_of(&fx.store, task.id).await, TaskStatus::Completed);
        let logs = fx.store.all_logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].is_success());
        assert!(wait_until(2, || fx.scheduler.limiter_stats().active == 0).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_wait_idle_gives_up_at_deadline() {
        let fx = fixture(4);
        assert!(fx.scheduler.wait_idle(Duration::ZERO).await);

        let task = create(
            &fx.store,
            "long",
            EVERY_SECOND,
            "scripted",
            json!({"sleep_ms": 3000}),
            ExecType::Recurring,
            TaskStatus::Enabled,
        )
        .await;
        fx.scheduler.start().await.unwrap();
        let executing = wait_until(5, || {
            fx.scheduler.list_all_tasks().get(&task.id) == Some(&true)
        })
        .await;
        assert!(executing, "task never started executing");

        fx.scheduler.shutdown();
        assert!(!fx.scheduler.wait_idle(Duration::from_millis(200)).await);
    }
}
