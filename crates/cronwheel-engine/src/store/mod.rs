//! Storage contract for task records.
//!
//! Any backend implementing [`TaskStore`] is substitutable without engine
//! changes. The in-memory reference backend has no I/O latency but is
//! still exposed through the async contract so durable backends slot in
//! at the same call sites. Backends must tolerate concurrent calls for
//! different task ids.

pub mod memory;
pub mod record;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::task::{Task, TaskRecord, TaskStatus};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A partial update to a task record. Unset fields are left untouched;
/// every applied patch refreshes `updated_at`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TaskPatch {
    /// Capture the mutable fields of a record, for a full write-back.
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            status: Some(record.status),
            run_count: Some(record.metadata.run_count),
            last_run: record.metadata.last_run,
            next_run: record.metadata.next_run,
            last_error: record.metadata.last_error.clone(),
        }
    }
}

/// CRUD contract every storage backend satisfies.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Prepare the backend (create schema, open resources). Idempotent.
    async fn init(&self) -> Result<()>;

    /// Persist a new task. Fails if the id is already present.
    async fn add(&self, task: Task) -> Result<Task>;

    /// Fetch one task by id.
    async fn get(&self, id: &str) -> Result<Option<Task>>;

    /// Fetch every stored task. Order is not guaranteed.
    async fn get_all(&self) -> Result<Vec<Task>>;

    /// Merge a partial update into an existing record. Fails if absent.
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task>;

    /// Delete a task. Returns whether anything was removed.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Delete everything.
    async fn clear(&self) -> Result<()>;
}
