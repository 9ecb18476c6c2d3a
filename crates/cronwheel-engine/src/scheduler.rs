//! Scheduler orchestrator: tick loop, concurrency admission, persistence
//! and missed-task catch-up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronwheel_expr::{next_run, ExprError, ParsedExpression, Tz};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{EngineError, Result};
use crate::event::{EventBus, SchedulerEvent};
use crate::queue::ExecutionQueue;
use crate::stats::{SchedulerStats, StatsCounters};
use crate::store::record::new_task;
use crate::store::{MemoryStore, TaskPatch, TaskStore};
use crate::task::{
    validate_name, validate_options, Task, TaskFn, TaskId, TaskOptions, TaskStatus,
};

/// Retry horizon applied when the occurrence search fails closed.
const FAIL_CLOSED_HORIZON_HOURS: i64 = 24;
/// Backoff while waiting for in-flight tasks to drain on shutdown.
const DRAIN_POLL_MS: u64 = 50;

/// A task registration request.
pub struct TaskDefinition {
    pub name: String,
    pub options: TaskOptions,
    pub execute: TaskFn,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, options: TaskOptions, execute: TaskFn) -> Self {
        Self {
            name: name.into(),
            options,
            execute,
        }
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    queue: ExecutionQueue,
    events: EventBus,
    counters: Arc<StatsCounters>,
    shutdown_tx: watch::Sender<bool>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
}

/// The scheduling engine. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Scheduler over the in-memory reference backend.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Scheduler over any storage backend implementing the contract.
    pub fn with_store(config: SchedulerConfig, store: Arc<dyn TaskStore>) -> Self {
        let events = EventBus::new();
        let counters = Arc::new(StatsCounters::default());
        let queue = ExecutionQueue::new(events.clone(), counters.clone());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                store,
                queue,
                events,
                counters,
                shutdown_tx,
                started_at: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Independent receiver for engine events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Initialize storage, restore persisted tasks, catch up on missed
    /// runs and begin ticking. Only storage failures propagate.
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.store.init().await?;
        for task in self.inner.store.get_all().await? {
            self.inner.queue.enqueue(task);
        }
        *self.inner.started_at.lock().unwrap() = Some(Utc::now());
        let _ = self.inner.shutdown_tx.send(false);

        if self.inner.config.handle_missed_tasks {
            self.catch_up();
        }

        let scheduler = self.clone();
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        info!(
            tick_interval_ms = self.inner.config.tick_interval_ms,
            max_concurrent = self.inner.config.max_concurrent,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop ticking, wait for in-flight tasks to drain, then persist a
    /// final snapshot of every task. No execution is abandoned mid-flight.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.inner.shutdown_tx.send(true);

        while self.inner.queue.running_count() > 0 {
            tokio::time::sleep(Duration::from_millis(DRAIN_POLL_MS)).await;
        }

        for task in self.inner.queue.all() {
            self.inner
                .store
                .update(&task.id, TaskPatch::from_record(&task.record()))
                .await?;
        }
        info!("scheduler stopped");
        Ok(())
    }

    /// Register a task: resolve its timezone per policy, validate the
    /// expression, compute the initial next run, persist and enqueue.
    pub async fn add_task(&self, definition: TaskDefinition) -> Result<Task> {
        validate_name(&definition.name)?;
        validate_options(&definition.options)?;

        let mut task = new_task(&definition.name, definition.options, definition.execute);
        task.metadata.next_run = Some(self.compute_next_run(&task.id, &task.options)?);

        let stored = self.inner.store.add(task).await?;
        self.inner.queue.enqueue(stored.clone());
        info!(task_id = %stored.id, name = %stored.name, "task added");
        Ok(stored)
    }

    /// Remove a task from the queue and storage.
    pub async fn remove_task(&self, id: &str) -> Result<bool> {
        let in_queue = self.inner.queue.dequeue(id);
        let in_store = self.inner.store.remove(id).await?;
        if in_queue || in_store {
            info!(task_id = %id, "task removed");
        }
        Ok(in_queue || in_store)
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.inner.queue.get(id)
    }

    pub fn get_tasks(&self) -> Vec<Task> {
        self.inner.queue.all()
    }

    /// Exclude a task from scheduling until resumed.
    pub async fn pause_task(&self, id: &str) -> Result<Task> {
        let task = self.inner.queue.pause(id)?;
        self.persist(&task).await;
        Ok(task)
    }

    /// Return a paused task to scheduling, with a freshly computed next
    /// run strictly after the resume instant.
    pub async fn resume_task(&self, id: &str) -> Result<Task> {
        let task = self.inner.queue.resume(id)?;
        let next = self.compute_next_run(id, &task.options)?;
        let updated = self
            .inner
            .queue
            .with_task(id, |t| t.metadata.next_run = Some(next))
            .ok_or_else(|| EngineError::TaskNotFound { id: id.to_string() })?;
        self.persist(&updated).await;
        Ok(updated)
    }

    /// Aggregate runtime counters.
    pub fn stats(&self) -> SchedulerStats {
        let uptime_ms = self
            .inner
            .started_at
            .lock()
            .unwrap()
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        SchedulerStats {
            total_run: self.inner.counters.total_run(),
            total_failed: self.inner.counters.total_failed(),
            total_retried: self.inner.counters.total_retried(),
            active_count: self.inner.queue.running_count(),
            queued_count: self.inner.queue.len(),
            uptime_ms,
        }
    }

    // --- internals ---------------------------------------------------------

    /// Tick loop. A failed tick is reported and absorbed; the timer never
    /// stops until shutdown.
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.inner.config.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("scheduler tick failed: {e}");
                        self.inner.events.emit(SchedulerEvent::Error {
                            context: format!("tick: {e}"),
                        });
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("tick loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One scan: select due tasks, admit up to the remaining concurrency
    /// budget, dispatch each as an independent cycle.
    async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let budget = self
            .inner
            .config
            .max_concurrent
            .saturating_sub(self.inner.queue.running_count());
        if budget == 0 {
            return Ok(());
        }

        let mut due: Vec<Task> = self
            .inner
            .queue
            .all()
            .into_iter()
            .filter(|t| t.status != TaskStatus::Paused)
            .filter(|t| t.metadata.next_run.is_some_and(|n| n <= now))
            .filter(|t| !self.inner.queue.is_running(&t.id))
            .collect();
        // Earliest registered first, as a convenience; not a guarantee.
        due.sort_by_key(|t| t.metadata.created_at);

        for task in due.into_iter().take(budget) {
            debug!(task_id = %task.id, "dispatching due task");
            self.dispatch(task.id);
        }
        Ok(())
    }

    /// Admit one execution cycle and recompute/persist its next run once
    /// the attempt resolves.
    fn dispatch(&self, id: TaskId) {
        let attempt = self.inner.queue.execute_task(&id);
        let scheduler = self.clone();
        tokio::spawn(async move {
            attempt.await;
            scheduler.finish_cycle(&id).await;
        });
    }

    /// Post-cycle bookkeeping: schedule the next occurrence and return
    /// the task to `Pending`, then persist.
    async fn finish_cycle(&self, id: &str) {
        let Some(task) = self.inner.queue.get(id) else {
            return; // removed mid-flight
        };

        let next = match self.compute_next_run(id, &task.options) {
            Ok(next) => next,
            Err(e) => {
                error!(task_id = %id, "next-run recomputation failed: {e}");
                self.inner.events.emit(SchedulerEvent::Error {
                    context: format!("finish_cycle({id}): {e}"),
                });
                return;
            }
        };

        let updated = self.inner.queue.with_task(id, |t| {
            t.metadata.next_run = Some(next);
            t.status = TaskStatus::Pending;
        });
        if let Some(task) = updated {
            self.persist(&task).await;
        }
    }

    /// Startup catch-up: run every task whose scheduled instant passed
    /// while the scheduler was down, if it opted in.
    fn catch_up(&self) {
        let now = Utc::now();
        for task in self.inner.queue.all() {
            if task.status == TaskStatus::Paused || !task.options.catch_up {
                continue;
            }
            if task.metadata.next_run.is_some_and(|n| n <= now) {
                info!(task_id = %task.id, name = %task.name, "catching up missed task");
                self.dispatch(task.id);
            }
        }
    }

    /// Resolve the effective timezone, parse the expression against it
    /// and find the next occurrence. An exhausted occurrence search fails
    /// closed to a coarse retry horizon instead of propagating.
    fn compute_next_run(&self, task_id: &str, options: &TaskOptions) -> Result<DateTime<Utc>> {
        let tz = self.effective_timezone(options.timezone.as_deref())?;
        let parsed = ParsedExpression::parse(&options.expression, tz)?;
        match next_run(&parsed, Utc::now()) {
            Ok(next) => Ok(next),
            Err(e @ ExprError::NoUpcomingOccurrence { .. }) => {
                warn!(task_id = %task_id, "occurrence search failed closed: {e}");
                self.inner.events.emit(SchedulerEvent::Error {
                    context: format!("next_run({task_id}): {e}"),
                });
                Ok(Utc::now() + chrono::Duration::hours(FAIL_CLOSED_HORIZON_HOURS))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Strict mode always uses the scheduler-wide timezone and rejects a
    /// differing per-task override; flexible mode prefers the task's own
    /// timezone, then the configured default, then UTC.
    fn effective_timezone(&self, task_tz: Option<&str>) -> Result<Tz> {
        let policy = &self.inner.config.timezone;
        if policy.strict {
            if let Some(requested) = task_tz {
                if requested != policy.default {
                    return Err(EngineError::TimezonePolicy {
                        requested: requested.to_string(),
                        configured: policy.default.clone(),
                    });
                }
            }
            return Ok(cronwheel_expr::resolve_timezone(&policy.default)?);
        }

        let name = task_tz.unwrap_or(&policy.default);
        if policy.validate {
            Ok(cronwheel_expr::resolve_timezone(name)?)
        } else {
            Ok(cronwheel_expr::resolve_timezone(name).unwrap_or_else(|_| {
                warn!(timezone = %name, "unvalidated timezone did not resolve, using UTC");
                Tz::UTC
            }))
        }
    }

    /// Persist one task's current record; failures are surfaced as
    /// engine events, the in-memory record stays authoritative.
    async fn persist(&self, task: &Task) {
        if let Err(e) = self
            .inner
            .store
            .update(&task.id, TaskPatch::from_record(&task.record()))
            .await
        {
            error!(task_id = %task.id, "persistence failed: {e}");
            self.inner.events.emit(SchedulerEvent::Error {
                context: format!("persist({}): {e}", task.id),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskFuture;
    use serde_json::Value;
    use std::time::Duration;

    fn options(expression: &str) -> TaskOptions {
        TaskOptions {
            expression: expression.to_string(),
            timezone: None,
            max_retries: None,
            retry_delay_ms: None,
            timeout_ms: None,
            exclusive: false,
            catch_up: false,
        }
    }

    fn noop() -> TaskFn {
        Arc::new(|| Box::pin(async { Ok(Value::Null) }) as TaskFuture)
    }

    fn slow(ms: u64) -> TaskFn {
        Arc::new(move || {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Value::Null)
            }) as TaskFuture
        })
    }

    #[tokio::test]
    async fn add_task_computes_future_next_run() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let before = Utc::now();
        let task = scheduler
            .add_task(TaskDefinition::new("minutely", options("* * * * *"), noop()))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.metadata.next_run.unwrap() > before);
    }

    #[tokio::test]
    async fn add_task_rejects_bad_expression() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let err = scheduler
            .add_task(TaskDefinition::new("broken", options("61 * * * *"), noop()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)));
    }

    #[tokio::test]
    async fn add_task_rejects_bad_name() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let err = scheduler
            .add_task(TaskDefinition::new("no/slashes", options("* * * * *"), noop()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn strict_mode_rejects_differing_override() {
        let mut config = SchedulerConfig::default();
        config.timezone.strict = true;
        let scheduler = Scheduler::new(config);

        let mut opts = options("* * * * *");
        opts.timezone = Some("Asia/Tokyo".to_string());
        let err = scheduler
            .add_task(TaskDefinition::new("tokyo", opts, noop()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timezone.strict"));
    }

    #[tokio::test]
    async fn strict_mode_accepts_matching_override() {
        let mut config = SchedulerConfig::default();
        config.timezone.strict = true;
        let scheduler = Scheduler::new(config);

        let mut opts = options("* * * * *");
        opts.timezone = Some("UTC".to_string());
        assert!(scheduler
            .add_task(TaskDefinition::new("utc", opts, noop()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn flexible_mode_lets_task_timezone_win() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let mut opts = options("0 9 * * *");
        opts.timezone = Some("Asia/Tokyo".to_string());
        let task = scheduler
            .add_task(TaskDefinition::new("tokyo-nine", opts, noop()))
            .await
            .unwrap();
        // 09:00 Tokyo is 00:00 UTC.
        let next = task.metadata.next_run.unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "00:00");
    }

    #[tokio::test]
    async fn flexible_mode_rejects_unknown_timezone_when_validating() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let mut opts = options("* * * * *");
        opts.timezone = Some("Not/AZone".to_string());
        assert!(scheduler
            .add_task(TaskDefinition::new("bad-tz", opts, noop()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn never_matching_expression_registers_with_coarse_horizon() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let mut rx = scheduler.subscribe();

        let before = Utc::now();
        let task = scheduler
            .add_task(TaskDefinition::new("feb-31", options("0 0 31 2 *"), noop()))
            .await
            .unwrap();

        let next = task.metadata.next_run.unwrap();
        let horizon = next - before;
        assert!(horizon > chrono::Duration::hours(23));
        assert!(horizon <= chrono::Duration::hours(25));

        match rx.recv().await.unwrap() {
            SchedulerEvent::Error { context } => assert!(context.contains("no occurrence")),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tick_admits_up_to_remaining_budget() {
        let config = SchedulerConfig {
            max_concurrent: 2,
            ..Default::default()
        };
        let scheduler = Scheduler::new(config);
        let mut rx = scheduler.subscribe();

        let mut ids = Vec::new();
        for i in 0..5 {
            let task = scheduler
                .add_task(TaskDefinition::new(
                    format!("due-{i}"),
                    options("* * * * *"),
                    slow(400),
                ))
                .await
                .unwrap();
            ids.push(task.id);
        }
        // Make all five due now.
        let past = Utc::now() - chrono::Duration::seconds(1);
        for id in &ids {
            scheduler
                .inner
                .queue
                .with_task(id, |t| t.metadata.next_run = Some(past));
        }

        scheduler.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut started = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SchedulerEvent::TaskStarted { .. }) {
                started += 1;
            }
        }
        assert_eq!(started, 2);
        assert_eq!(scheduler.inner.queue.running_count(), 2);

        // A second scan while both slots are taken admits nothing.
        scheduler.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, SchedulerEvent::TaskStarted { .. }));
        }
    }

    #[tokio::test]
    async fn finish_cycle_returns_task_to_pending_with_new_next_run() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let task = scheduler
            .add_task(TaskDefinition::new("cyclic", options("* * * * *"), noop()))
            .await
            .unwrap();

        let past = Utc::now() - chrono::Duration::seconds(1);
        scheduler
            .inner
            .queue
            .with_task(&task.id, |t| t.metadata.next_run = Some(past));

        scheduler.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let after = scheduler.get_task(&task.id).unwrap();
        assert_eq!(after.status, TaskStatus::Pending);
        assert_eq!(after.metadata.run_count, 1);
        assert!(after.metadata.next_run.unwrap() > Utc::now());

        // The recomputed record reached storage too.
        let persisted = scheduler.inner.store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(persisted.metadata.run_count, 1);
    }

    #[tokio::test]
    async fn paused_tasks_are_invisible_to_the_due_scan() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let mut rx = scheduler.subscribe();
        let task = scheduler
            .add_task(TaskDefinition::new("paused", options("* * * * *"), noop()))
            .await
            .unwrap();

        scheduler.pause_task(&task.id).await.unwrap();
        let past = Utc::now() - chrono::Duration::seconds(1);
        scheduler
            .inner
            .queue
            .with_task(&task.id, |t| t.metadata.next_run = Some(past));

        scheduler.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, SchedulerEvent::TaskStarted { .. }));
        }
    }

    #[tokio::test]
    async fn resume_recomputes_next_run_after_pause_instant() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let task = scheduler
            .add_task(TaskDefinition::new("nap", options("* * * * *"), noop()))
            .await
            .unwrap();

        scheduler.pause_task(&task.id).await.unwrap();
        let pause_instant = Utc::now();
        let resumed = scheduler.resume_task(&task.id).await.unwrap();

        assert_eq!(resumed.status, TaskStatus::Pending);
        assert!(resumed.metadata.next_run.unwrap() > pause_instant);
    }

    #[tokio::test]
    async fn remove_task_clears_queue_and_store() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let task = scheduler
            .add_task(TaskDefinition::new("gone", options("* * * * *"), noop()))
            .await
            .unwrap();

        assert!(scheduler.remove_task(&task.id).await.unwrap());
        assert!(scheduler.get_task(&task.id).is_none());
        assert!(scheduler.inner.store.get(&task.id).await.unwrap().is_none());
        assert!(!scheduler.remove_task(&task.id).await.unwrap());
    }
}
