//! Shared record-construction and patch helpers.
//!
//! Free functions composed into each backend by ownership — both the
//! in-memory and SQLite stores call through here so merge and
//! date-validation behaviour cannot drift between them.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::TaskPatch;
use crate::task::{Task, TaskFn, TaskMetadata, TaskOptions, TaskStatus};

/// Build a fresh task record: new id, `Pending`, zeroed metadata.
pub fn new_task(name: &str, options: TaskOptions, execute: TaskFn) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        options,
        status: TaskStatus::Pending,
        metadata: TaskMetadata::new(now),
        execute: Some(execute),
    }
}

/// Merge `patch` into `task`, refreshing `updated_at` unconditionally.
pub fn apply_patch(task: &mut Task, patch: &TaskPatch, now: DateTime<Utc>) {
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(run_count) = patch.run_count {
        task.metadata.run_count = run_count;
    }
    if let Some(last_run) = patch.last_run {
        task.metadata.last_run = Some(last_run);
    }
    if let Some(next_run) = patch.next_run {
        task.metadata.next_run = Some(next_run);
    }
    if let Some(ref last_error) = patch.last_error {
        task.metadata.last_error = Some(last_error.clone());
    }
    task.metadata.updated_at = now;
}

/// Parse a stored or wire-supplied date field. Invalid text yields `None`
/// so a bad value is dropped rather than stored, preserving whatever the
/// record already holds.
pub fn parse_date_field(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build a patch from a loosely-typed JSON partial (host/wire input).
/// Unknown keys are ignored; date fields that fail to parse are dropped.
pub fn patch_from_json(value: &serde_json::Value) -> TaskPatch {
    let mut patch = TaskPatch::default();
    if let Some(status) = value
        .get("status")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<TaskStatus>().ok())
    {
        patch.status = Some(status);
    }
    if let Some(run_count) = value.get("run_count").and_then(|v| v.as_u64()) {
        patch.run_count = Some(run_count.min(u32::MAX as u64) as u32);
    }
    patch.last_run = value
        .get("last_run")
        .and_then(|v| v.as_str())
        .and_then(parse_date_field);
    patch.next_run = value
        .get("next_run")
        .and_then(|v| v.as_str())
        .and_then(parse_date_field);
    patch.last_error = value
        .get("last_error")
        .and_then(|v| v.as_str())
        .map(String::from);
    patch
}
