//! In-memory reference backend: a process-local keyed table.
//!
//! Retains the execute closure, so restored tasks remain runnable within
//! the process. All operations are synchronous-equivalent but exposed
//! through the async contract.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::{EngineError, Result};
use crate::store::record::apply_patch;
use crate::store::{TaskPatch, TaskStore};
use crate::task::{Task, TaskId};

#[derive(Default)]
pub struct MemoryStore {
    tasks: DashMap<TaskId, Task>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn add(&self, task: Task) -> Result<Task> {
        if self.tasks.contains_key(&task.id) {
            return Err(EngineError::DuplicateTask {
                id: task.id.clone(),
            });
        }
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|t| t.clone()))
    }

    async fn get_all(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.iter().map(|t| t.clone()).collect())
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut entry = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::TaskNotFound { id: id.to_string() })?;
        apply_patch(&mut entry, &patch, Utc::now());
        Ok(entry.clone())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.tasks.remove(id).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.tasks.clear();
        Ok(())
    }
}
