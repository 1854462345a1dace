//! Scheduler counters.
//!
//! Updated by the status tracker as runs move through their lifecycle and
//! read as a point-in-time [`MetricsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use taskclock_core::RunStatus;

#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    runs_created: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,
    missed_fires: AtomicU64,
    leases_reclaimed: AtomicU64,
}

impl SchedulerMetrics {
    pub fn run_created(&self) {
        self.runs_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a run reaching `status`. Non-terminal statuses are ignored.
    pub fn run_finished(&self, status: RunStatus) {
        let counter = match status {
            RunStatus::Succeeded => &self.runs_succeeded,
            RunStatus::Failed => &self.runs_failed,
            RunStatus::Cancelled => &self.runs_cancelled,
            RunStatus::Pending | RunStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn missed_fire(&self) {
        self.missed_fires.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lease_reclaimed(&self) {
        self.leases_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters. Gauges are filled in by the caller.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_created: self.runs_created.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            missed_fires: self.missed_fires.load(Ordering::Relaxed),
            leases_reclaimed: self.leases_reclaimed.load(Ordering::Relaxed),
            active_leases: 0,
            free_slots: 0,
        }
    }
}

/// Counters since process start plus current gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub runs_created: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_cancelled: u64,
    pub missed_fires: u64,
    pub leases_reclaimed: u64,

    /// Tasks with a pending or running run.
    pub active_leases: u64,

    /// Worker slots not executing a run.
    pub free_slots: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_are_counted_separately() {
        let metrics = SchedulerMetrics::default();
        metrics.run_created();
        metrics.run_created();
        metrics.run_finished(RunStatus::Running);
        metrics.run_finished(RunStatus::Succeeded);
        metrics.run_finished(RunStatus::Failed);
        metrics.lease_reclaimed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_created, 2);
        assert_eq!(snapshot.runs_succeeded, 1);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.runs_cancelled, 0);
        assert_eq!(snapshot.leases_reclaimed, 1);
    }
}
