//! Typed engine events, fanned out over a broadcast channel.
//!
//! Consumers call [`EventBus::subscribe`] for an independent receiver;
//! emission is fire-and-forget and never blocks the emitting path. A send
//! with no live subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::task::TaskId;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything the engine reports to its host.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SchedulerEvent {
    /// An execution attempt began.
    TaskStarted { id: TaskId },
    /// An attempt succeeded; `result` is the operation's payload.
    TaskCompleted {
        id: TaskId,
        result: serde_json::Value,
    },
    /// An attempt failed terminally for this occurrence.
    TaskFailed { id: TaskId, error: String },
    /// An attempt failed and a delayed re-invocation was scheduled.
    TaskRetry { id: TaskId, attempt: u32 },
    TaskPaused { id: TaskId },
    TaskResumed { id: TaskId },
    /// An engine-level failure that was caught and absorbed (tick errors,
    /// persistence failures, exhausted occurrence searches).
    Error { context: String },
}

/// Fan-out of [`SchedulerEvent`]s to any number of independent listeners.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// New listener; receives only events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget emission.
    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
