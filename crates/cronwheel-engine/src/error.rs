use thiserror::Error;

use crate::task::TaskStatus;

/// Errors surfaced by the scheduling engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed cron text, bad timezone, or an exhausted occurrence
    /// search — fails registration, never retried.
    #[error("expression error: {0}")]
    Expression(#[from] cronwheel_expr::ExprError),

    /// Strict timezone policy forbids per-task overrides that differ from
    /// the scheduler-wide default.
    #[error(
        "timezone.strict: per-task timezone `{requested}` conflicts with configured `{configured}`"
    )]
    TimezonePolicy {
        requested: String,
        configured: String,
    },

    /// The task definition itself is invalid (name, option floors).
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// A task with this id is already stored.
    #[error("task already exists: {id}")]
    DuplicateTask { id: String },

    /// No task with this id.
    #[error("task not found: {id}")]
    TaskNotFound { id: String },

    /// A lifecycle transition the state machine does not allow
    /// (e.g. resuming a task that is not paused).
    #[error("task {id} is {status}, not {expected}")]
    InvalidTransition {
        id: String,
        status: TaskStatus,
        expected: TaskStatus,
    },

    /// A storage backend operation failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// SQLite backend failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure loading or extracting configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
