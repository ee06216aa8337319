//! Sync status snapshots and cumulative statistics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_ms;

/// Read-only snapshot of the engine, recomputed after every task transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// A sync cycle is in progress.
    pub is_running: bool,
    pub is_online: bool,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub executing_tasks: usize,
    pub awaiting_user_choice: usize,
    /// Terminal tasks kept for inspection.
    pub failed_tasks: usize,
    /// Tasks completed since the engine started.
    pub completed_tasks: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Cumulative counters, growing until reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Task outcomes recorded: successes plus terminal failures.
    pub total_syncs: u64,
    pub successful_syncs: u64,
    /// Terminal failures only.
    pub failed_syncs: u64,
    /// Rolling mean of successful task execution times.
    #[serde(with = "duration_ms")]
    pub average_sync_time: Duration,
    /// Wall time of the most recent cycle.
    #[serde(with = "duration_ms")]
    pub last_sync_duration: Duration,
    /// Failed attempts that were re-queued.
    pub retried_attempts: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub total_cycles: u64,
}

/// Thread-safe accumulator behind [`SyncStats`].
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: Mutex<SyncStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncStats {
        self.stats.lock().clone()
    }

    pub fn reset(&self) {
        *self.stats.lock() = SyncStats::default();
    }

    pub fn record_success(&self, elapsed: Duration) {
        let mut stats = self.stats.lock();
        stats.total_syncs += 1;
        stats.successful_syncs += 1;

        let n = stats.successful_syncs as f64;
        let average = stats.average_sync_time.as_nanos() as f64;
        let updated = average + (elapsed.as_nanos() as f64 - average) / n;
        stats.average_sync_time = Duration::from_nanos(updated.max(0.0).round() as u64);
    }

    pub fn record_failure(&self) {
        let mut stats = self.stats.lock();
        stats.total_syncs += 1;
        stats.failed_syncs += 1;
    }

    pub fn record_retry(&self) {
        self.stats.lock().retried_attempts += 1;
    }

    pub fn record_conflict(&self) {
        self.stats.lock().conflicts_detected += 1;
    }

    pub fn record_conflict_resolved(&self) {
        self.stats.lock().conflicts_resolved += 1;
    }

    pub fn record_cycle(&self, duration: Duration) {
        let mut stats = self.stats.lock();
        stats.total_cycles += 1;
        stats.last_sync_duration = duration;
    }
}
