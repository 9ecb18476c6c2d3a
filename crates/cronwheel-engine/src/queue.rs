//! Execution queue: per-task execution protocol.
//!
//! Holds the live task table, tracks in-flight executions, and implements
//! the single-task protocol — exclusivity, attempt budget, timeout race,
//! retry scheduling and lifecycle events. It works on task records only;
//! persistence is the scheduler's concern.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::event::{EventBus, SchedulerEvent};
use crate::stats::StatsCounters;
use crate::task::{Task, TaskId, TaskStatus};

struct QueueInner {
    tasks: DashMap<TaskId, Task>,
    /// Ids with an attempt currently in flight.
    in_flight: DashSet<TaskId>,
    events: EventBus,
    counters: Arc<StatsCounters>,
}

/// Cheap to clone; all clones share one task table.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<QueueInner>,
}

impl ExecutionQueue {
    pub fn new(events: EventBus, counters: Arc<StatsCounters>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tasks: DashMap::new(),
                in_flight: DashSet::new(),
                events,
                counters,
            }),
        }
    }

    pub fn enqueue(&self, task: Task) {
        self.inner.tasks.insert(task.id.clone(), task);
    }

    pub fn dequeue(&self, id: &str) -> bool {
        self.inner.tasks.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.inner.tasks.get(id).map(|t| t.clone())
    }

    pub fn all(&self) -> Vec<Task> {
        self.inner.tasks.iter().map(|t| t.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.inner.in_flight.contains(id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Mutate a task in place, refreshing `updated_at`; returns the
    /// post-mutation snapshot.
    pub fn with_task<F: FnOnce(&mut Task)>(&self, id: &str, f: F) -> Option<Task> {
        self.inner.tasks.get_mut(id).map(|mut t| {
            f(&mut t);
            t.metadata.updated_at = Utc::now();
            t.clone()
        })
    }

    /// Run one execution attempt for `id`.
    ///
    /// Admission (exclusivity, attempt budget, the running marker and the
    /// `started` event) happens synchronously at call time, so callers
    /// admitting several tasks in one scan never double-admit. The
    /// returned future drives the attempt itself and resolves once its
    /// bookkeeping is done; retry re-invocations are deferred independent
    /// dispatches, not awaited by it.
    pub fn execute_task(&self, id: &str) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        let id = id.to_string();
        let Some(task) = self.get(&id) else {
            warn!(task_id = %id, "execution requested for unknown task");
            return Box::pin(async {});
        };

        // Exclusive tasks never overlap themselves.
        if task.options.exclusive && self.inner.in_flight.contains(&id) {
            debug!(task_id = %id, "exclusive task already running, skipping");
            return Box::pin(async {});
        }

        // max_retries = n allows n + 1 attempts against the lifetime
        // run_count; unset leaves attempts unbounded.
        if let Some(max) = task.options.max_retries {
            if task.metadata.run_count as u64 >= max as u64 + 1 {
                debug!(
                    task_id = %id,
                    run_count = task.metadata.run_count,
                    "attempt budget exhausted, skipping"
                );
                return Box::pin(async {});
            }
        }

        self.with_task(&id, |t| t.status = TaskStatus::Running);
        self.inner.in_flight.insert(id.clone());
        self.inner
            .events
            .emit(SchedulerEvent::TaskStarted { id: id.clone() });

        let queue = self.clone();
        Box::pin(async move { queue.run_attempt(id, task).await })
    }

    async fn run_attempt(&self, id: TaskId, task: Task) {
        let outcome = match task.execute.clone() {
            Some(op) => {
                // The operation runs as its own tokio task: a timeout
                // abandons it (bookkept as failed) without terminating
                // it, and a panic inside it surfaces as a join error.
                let handle = tokio::spawn(op());
                match task.options.timeout_ms {
                    Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), handle).await
                    {
                        Ok(Ok(result)) => result,
                        Ok(Err(join_err)) => {
                            Err(anyhow::anyhow!("task operation panicked: {join_err}"))
                        }
                        Err(_) => Err(anyhow::anyhow!("task timed out after {ms}ms")),
                    },
                    None => match handle.await {
                        Ok(result) => result,
                        Err(join_err) => {
                            Err(anyhow::anyhow!("task operation panicked: {join_err}"))
                        }
                    },
                }
            }
            None => Err(anyhow::anyhow!("no execute handler attached")),
        };

        let now = Utc::now();
        match outcome {
            Ok(result) => {
                self.with_task(&id, |t| {
                    t.status = TaskStatus::Completed;
                    t.metadata.last_run = Some(now);
                    t.metadata.run_count += 1;
                });
                self.inner.counters.record_run();
                self.inner.events.emit(SchedulerEvent::TaskCompleted {
                    id: id.clone(),
                    result,
                });
            }
            Err(err) => {
                let message = format!("{err:#}");
                let updated = self.with_task(&id, |t| {
                    t.status = TaskStatus::Failed;
                    t.metadata.last_error = Some(message.clone());
                    t.metadata.run_count += 1;
                });
                let run_count = updated.map(|t| t.metadata.run_count).unwrap_or(0);

                let budget_left = match task.options.max_retries {
                    Some(max) => (run_count as u64) < max as u64 + 1,
                    None => true,
                };
                if budget_left {
                    self.inner.counters.record_retry();
                    self.inner.events.emit(SchedulerEvent::TaskRetry {
                        id: id.clone(),
                        attempt: run_count,
                    });
                    let queue = self.clone();
                    let retry_id = id.clone();
                    let delay = Duration::from_millis(task.options.retry_delay_ms());
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        queue.execute_task(&retry_id).await;
                    });
                } else {
                    self.inner.counters.record_failure();
                    self.inner.events.emit(SchedulerEvent::TaskFailed {
                        id: id.clone(),
                        error: message,
                    });
                }
            }
        }

        // Release runs on every outcome path above.
        self.inner.in_flight.remove(&id);
    }

    /// Exclude a task from the due scan. Not allowed while an attempt is
    /// in flight — completion bookkeeping would clobber the paused state.
    pub fn pause(&self, id: &str) -> Result<Task> {
        let current = self
            .get(id)
            .ok_or_else(|| EngineError::TaskNotFound { id: id.to_string() })?;
        if self.is_running(id) || current.status == TaskStatus::Running {
            return Err(EngineError::InvalidTransition {
                id: id.to_string(),
                status: TaskStatus::Running,
                expected: TaskStatus::Pending,
            });
        }

        let task = self
            .with_task(id, |t| t.status = TaskStatus::Paused)
            .ok_or_else(|| EngineError::TaskNotFound { id: id.to_string() })?;
        self.inner
            .events
            .emit(SchedulerEvent::TaskPaused { id: id.to_string() });
        Ok(task)
    }

    /// Return a paused task to `Pending`. The caller is responsible for
    /// recomputing its next run.
    pub fn resume(&self, id: &str) -> Result<Task> {
        let current = self
            .get(id)
            .ok_or_else(|| EngineError::TaskNotFound { id: id.to_string() })?;
        if current.status != TaskStatus::Paused {
            return Err(EngineError::InvalidTransition {
                id: id.to_string(),
                status: current.status,
                expected: TaskStatus::Paused,
            });
        }

        let task = self
            .with_task(id, |t| t.status = TaskStatus::Pending)
            .ok_or_else(|| EngineError::TaskNotFound { id: id.to_string() })?;
        self.inner
            .events
            .emit(SchedulerEvent::TaskResumed { id: id.to_string() });
        Ok(task)
    }
}
