//! Recurring-task scheduling engine.
//!
//! Embeds in a host process and drives cron-scheduled tasks end to end:
//!
//! - [`Scheduler`] — the orchestrator: tick loop, due-task scan, global
//!   concurrency cap, missed-task catch-up and graceful shutdown.
//! - [`ExecutionQueue`] — per-task execution protocol: exclusivity,
//!   attempt budget, timeout race and delayed retries.
//! - [`TaskStore`] — the storage contract, with an in-memory reference
//!   backend and a SQLite backend behind the same trait.
//! - [`EventBus`] — typed lifecycle events fanned out to any number of
//!   subscribers.
//!
//! Expression parsing and timezone-aware occurrence search live in the
//! `cronwheel-expr` crate, re-exported here for convenience.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cronwheel_engine::{Scheduler, SchedulerConfig, TaskDefinition, TaskOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! scheduler.start().await?;
//!
//! scheduler
//!     .add_task(TaskDefinition::new(
//!         "nightly-report",
//!         TaskOptions {
//!             expression: "0 2 * * *".to_string(),
//!             timezone: Some("Europe/Berlin".to_string()),
//!             max_retries: Some(3),
//!             retry_delay_ms: None,
//!             timeout_ms: Some(60_000),
//!             exclusive: true,
//!             catch_up: true,
//!         },
//!         Arc::new(|| Box::pin(async { Ok(serde_json::json!({"rows": 42})) })),
//!     ))
//!     .await?;
//!
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod task;

pub use config::{SchedulerConfig, TimezonePolicy};
pub use error::{EngineError, Result};
pub use event::{EventBus, SchedulerEvent};
pub use queue::ExecutionQueue;
pub use scheduler::{Scheduler, TaskDefinition};
pub use stats::SchedulerStats;
pub use store::{MemoryStore, SqliteStore, TaskPatch, TaskStore};
pub use task::{
    Task, TaskFn, TaskFuture, TaskId, TaskMetadata, TaskOptions, TaskOutcome, TaskRecord,
    TaskStatus,
};

pub use cronwheel_expr as expr;
