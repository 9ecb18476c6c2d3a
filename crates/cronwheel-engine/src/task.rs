//! Task data model: the unit of scheduling.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Opaque unique task identifier (UUID v4 string), assigned at creation.
pub type TaskId = String;

/// Outcome of one task operation: an arbitrary JSON result payload, or an
/// error the host chose to surface.
pub type TaskOutcome = anyhow::Result<serde_json::Value>;

/// The future a task operation produces.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;

/// A zero-argument asynchronous operation owned exclusively by its task.
/// The engine never introspects its body.
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Floors for task option values.
pub const MIN_RETRY_DELAY_MS: u64 = 100;
pub const MIN_TIMEOUT_MS: u64 = 1_000;
/// Retry delay used when the option is unset.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const MAX_NAME_LEN: usize = 100;

/// Per-task scheduling and execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    /// 5-field cron expression.
    pub expression: String,
    /// IANA timezone override; resolution against the scheduler default
    /// follows the strict/flexible policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// `Some(n)` allows n retries (n + 1 total attempts) against the
    /// task's lifetime `run_count`; `None` leaves attempts unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Delay before a retry re-invocation, ≥ 100 ms. Default 1000 ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    /// Upper bound on one attempt, ≥ 1000 ms. Unset means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Forbid two concurrent in-flight executions of this task.
    #[serde(default)]
    pub exclusive: bool,
    /// Run immediately at startup if the scheduled instant passed while
    /// the scheduler was down.
    #[serde(default)]
    pub catch_up: bool,
}

impl TaskOptions {
    /// Effective retry delay, applying the default.
    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its next scheduled run.
    Pending,
    /// An attempt is currently in flight.
    Running,
    /// Last attempt succeeded.
    Completed,
    /// Last attempt failed (possibly terminally for this occurrence).
    Failed,
    /// Excluded from the due-task scan until resumed.
    Paused,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "paused" => Ok(TaskStatus::Paused),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Bookkeeping updated by the queue and scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Total attempts made across the task's lifetime.
    pub run_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TaskMetadata {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            run_count: 0,
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: None,
            last_error: None,
        }
    }
}

/// A registered task. Cheap to clone: the operation is behind an `Arc`.
///
/// `execute` is `None` only for records restored from a durable backend
/// that refused to persist the closure; such records cannot run until a
/// handler is re-attached.
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub options: TaskOptions,
    pub status: TaskStatus,
    pub metadata: TaskMetadata,
    pub execute: Option<TaskFn>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("options", &self.options)
            .field("status", &self.status)
            .field("metadata", &self.metadata)
            .field("execute", &self.execute.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// The persisted projection of a [`Task`]: same fields, serializable, the
/// operation treated as out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub options: TaskOptions,
    pub status: TaskStatus,
    pub metadata: TaskMetadata,
}

impl Task {
    /// The serializable projection of this task.
    pub fn record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            options: self.options.clone(),
            status: self.status,
            metadata: self.metadata.clone(),
        }
    }

    /// Rehydrate a task from its persisted projection, optionally
    /// re-attaching the operation.
    pub fn from_record(record: TaskRecord, execute: Option<TaskFn>) -> Self {
        Self {
            id: record.id,
            name: record.name,
            options: record.options,
            status: record.status,
            metadata: record.metadata,
            execute,
        }
    }
}

/// Validate a human task label: 1–100 chars, letters/digits/spaces/hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::InvalidTask(format!(
            "name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
    {
        return Err(EngineError::InvalidTask(
            "name may only contain letters, digits, spaces and hyphens".to_string(),
        ));
    }
    Ok(())
}

/// Validate option floors.
pub fn validate_options(options: &TaskOptions) -> Result<()> {
    if let Some(delay) = options.retry_delay_ms {
        if delay < MIN_RETRY_DELAY_MS {
            return Err(EngineError::InvalidTask(format!(
                "retry_delay_ms must be at least {MIN_RETRY_DELAY_MS}"
            )));
        }
    }
    if let Some(timeout) = options.timeout_ms {
        if timeout < MIN_TIMEOUT_MS {
            return Err(EngineError::InvalidTask(format!(
                "timeout_ms must be at least {MIN_TIMEOUT_MS}"
            )));
        }
    }
    Ok(())
}
