//! Aggregate runtime counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters shared by the queue and scheduler.
#[derive(Debug, Default)]
pub struct StatsCounters {
    total_run: AtomicU64,
    total_failed: AtomicU64,
    total_retried: AtomicU64,
}

impl StatsCounters {
    /// A successful attempt completed.
    pub fn record_run(&self) {
        self.total_run.fetch_add(1, Ordering::Relaxed);
    }

    /// An occurrence failed terminally (attempt budget exhausted).
    pub fn record_failure(&self) {
        self.total_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A delayed retry re-invocation was scheduled.
    pub fn record_retry(&self) {
        self.total_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_run(&self) -> u64 {
        self.total_run.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    pub fn total_retried(&self) -> u64 {
        self.total_retried.load(Ordering::Relaxed)
    }
}

/// Point-in-time snapshot returned by the scheduler's stats query.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_run: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    /// Tasks currently in flight.
    pub active_count: usize,
    /// Tasks held in the execution queue.
    pub queued_count: usize,
    /// Milliseconds since `start()`; 0 when not started.
    pub uptime_ms: u64,
}
