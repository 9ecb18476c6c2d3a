//! SQLite backend: durable implementation of the same CRUD contract.
//!
//! Persists the serializable projection of a task; the execute closure is
//! refused (out of band), so tasks restored from here come back without a
//! handler attached. Exists primarily to demonstrate that backends are
//! substitutable at every engine call site.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;

use crate::error::{EngineError, Result};
use crate::store::record::{apply_patch, parse_date_field};
use crate::store::{TaskPatch, TaskStore};
use crate::task::{Task, TaskMetadata, TaskStatus};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Create the schema (idempotent), with an index on `next_run` so the
    /// due scan stays efficient with thousands of tasks.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id          TEXT    NOT NULL PRIMARY KEY,
                name        TEXT    NOT NULL,
                options     TEXT    NOT NULL,   -- JSON-encoded TaskOptions
                status      TEXT    NOT NULL DEFAULT 'pending',
                run_count   INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT    NOT NULL,
                updated_at  TEXT    NOT NULL,
                last_run    TEXT,               -- ISO-8601 or NULL
                next_run    TEXT,               -- ISO-8601 or NULL
                last_error  TEXT
            ) STRICT;

            CREATE INDEX IF NOT EXISTS idx_tasks_next_run ON tasks (next_run);
            ",
        )?;
        Ok(())
    }

    fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let options_json: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let run_count: u32 = row.get(4)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;
        let last_run: Option<String> = row.get(7)?;
        let next_run: Option<String> = row.get(8)?;
        let last_error: Option<String> = row.get(9)?;

        let options = serde_json::from_str(&options_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

        let now = Utc::now();
        Ok(Task {
            id,
            name,
            options,
            status: status_str.parse().unwrap_or(TaskStatus::Pending),
            metadata: TaskMetadata {
                run_count,
                // Unparseable stored dates are dropped, not propagated.
                created_at: parse_date_field(&created_at).unwrap_or(now),
                updated_at: parse_date_field(&updated_at).unwrap_or(now),
                last_run: last_run.as_deref().and_then(parse_date_field),
                next_run: next_run.as_deref().and_then(parse_date_field),
                last_error,
            },
            execute: None,
        })
    }

    fn write_row(conn: &Connection, task: &Task, replace: bool) -> Result<()> {
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        let options_json = serde_json::to_string(&task.options)?;
        conn.execute(
            &format!(
                "{verb} INTO tasks
                 (id, name, options, status, run_count, created_at, updated_at,
                  last_run, next_run, last_error)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)"
            ),
            rusqlite::params![
                task.id,
                task.name,
                options_json,
                task.status.to_string(),
                task.metadata.run_count,
                task.metadata.created_at.to_rfc3339(),
                task.metadata.updated_at.to_rfc3339(),
                task.metadata.last_run.map(|d| d.to_rfc3339()),
                task.metadata.next_run.map(|d| d.to_rfc3339()),
                task.metadata.last_error,
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::init_schema(&conn)
    }

    async fn add(&self, task: Task) -> Result<Task> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn
            .query_row("SELECT 1 FROM tasks WHERE id = ?1", [&task.id], |_| Ok(()))
            .map(|_| true)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(other),
            })?;
        if exists {
            return Err(EngineError::DuplicateTask {
                id: task.id.clone(),
            });
        }
        Self::write_row(&conn, &task, false)?;
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, options, status, run_count, created_at, updated_at,
                    last_run, next_run, last_error
             FROM tasks WHERE id = ?1",
        )?;
        let task = stmt
            .query_row([id], Self::row_to_task)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(task)
    }

    async fn get_all(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, options, status, run_count, created_at, updated_at,
                    last_run, next_run, last_error
             FROM tasks",
        )?;
        let tasks = stmt
            .query_map([], Self::row_to_task)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, options, status, run_count, created_at, updated_at,
                    last_run, next_run, last_error
             FROM tasks WHERE id = ?1",
        )?;
        let mut task = stmt
            .query_row([id], Self::row_to_task)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Err(EngineError::TaskNotFound { id: id.to_string() })
                }
                other => Err(EngineError::Database(other)),
            })?;
        drop(stmt);

        apply_patch(&mut task, &patch, Utc::now());
        Self::write_row(&conn, &task, true)?;
        Ok(task)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM tasks", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record::new_task;
    use crate::task::TaskOptions;
    use std::sync::Arc;

    fn store() -> SqliteStore {
        SqliteStore::new(Connection::open_in_memory().unwrap())
    }

    fn task(name: &str) -> Task {
        new_task(
            name,
            TaskOptions {
                expression: "0 9 * * 1-5".to_string(),
                timezone: Some("Europe/Berlin".to_string()),
                max_retries: Some(2),
                retry_delay_ms: Some(500),
                timeout_ms: Some(5_000),
                exclusive: true,
                catch_up: true,
            },
            Arc::new(|| Box::pin(async { Ok(serde_json::Value::Null) })),
        )
    }

    #[tokio::test]
    async fn round_trips_the_projection_without_the_handler() {
        let store = store();
        store.init().await.unwrap();

        let stored = store.add(task("durable")).await.unwrap();
        let fetched = store.get(&stored.id).await.unwrap().unwrap();

        assert_eq!(fetched.name, "durable");
        assert_eq!(fetched.options.expression, "0 9 * * 1-5");
        assert_eq!(fetched.options.max_retries, Some(2));
        assert!(fetched.options.exclusive);
        // The closure is refused by durable backends.
        assert!(fetched.execute.is_none());
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = store();
        store.init().await.unwrap();
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_add_fails() {
        let store = store();
        store.init().await.unwrap();
        let stored = store.add(task("one")).await.unwrap();
        assert!(matches!(
            store.add(stored).await.unwrap_err(),
            EngineError::DuplicateTask { .. }
        ));
    }

    #[tokio::test]
    async fn update_merges_into_stored_row() {
        let store = store();
        store.init().await.unwrap();
        let stored = store.add(task("one")).await.unwrap();

        let next = Utc::now() + chrono::Duration::minutes(5);
        let updated = store
            .update(
                &stored.id,
                TaskPatch {
                    status: Some(TaskStatus::Failed),
                    run_count: Some(1),
                    next_run: Some(next),
                    last_error: Some("boom".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Failed);
        assert_eq!(updated.metadata.last_error.as_deref(), Some("boom"));

        // Second read sees the merged row, to second precision.
        let fetched = store.get(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.metadata.run_count, 1);
        assert_eq!(
            fetched.metadata.next_run.map(|d| d.timestamp()),
            Some(next.timestamp())
        );
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let store = store();
        store.init().await.unwrap();
        let stored = store.add(task("one")).await.unwrap();
        assert!(store.remove(&stored.id).await.unwrap());
        assert!(!store.remove(&stored.id).await.unwrap());

        store.add(task("two")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }
}
