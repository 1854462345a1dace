//! Lease watchdog.
//!
//! A worker that crashes or hangs past its budget never releases its lease.
//! The watchdog fails the run holding an expired lease; the lease goes away
//! with the terminal transition, never before it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::lease::LeaseManager;
use crate::tracker::StatusTracker;

pub struct Watchdog {
    leases: Arc<LeaseManager>,
    tracker: Arc<StatusTracker>,
    interval: Duration,
}

impl Watchdog {
    pub fn new(leases: Arc<LeaseManager>, tracker: Arc<StatusTracker>, interval: Duration) -> Self {
        Self {
            leases,
            tracker,
            interval,
        }
    }

    /// Reclaim every lease expired at `now`. Returns how many runs were failed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut failed = 0;
        for lease in self.leases.expired(now).await {
            if self.tracker.reclaim(&lease).await.is_some() {
                failed += 1;
            } else {
                // Run already terminal; only the lease was left behind.
                self.leases.release(&lease.task_id, &lease.run_id).await;
                debug!(task_id = %lease.task_id, run_id = %lease.run_id, "Expired lease belonged to a finished run");
            }
        }
        failed
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "Lease watchdog started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep(Utc::now()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use taskclock_core::{
        FailureKind, RunId, RunStatus, RunTransition, TaskDraft, TaskId, TaskSpec, TaskType,
        TaskUpdate, TriggerKind,
    };

    use crate::backend::NoopSink;
    use crate::events::EventPublisher;
    use crate::store::TaskStore;

    const TTL: Duration = Duration::from_secs(60);

    struct Fixture {
        watchdog: Arc<Watchdog>,
        tracker: Arc<StatusTracker>,
        leases: Arc<LeaseManager>,
        store: Arc<TaskStore>,
        events: EventPublisher,
        task: TaskSpec,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(TaskStore::in_memory());
        let leases = Arc::new(LeaseManager::new(TTL));
        let events = EventPublisher::new(64);
        let tracker = Arc::new(StatusTracker::new(
            store.clone(),
            leases.clone(),
            events.clone(),
            Arc::new(NoopSink),
        ));
        let task = TaskDraft::new("job", TaskType::Adhoc, "work")
            .into_spec(TaskId::generate(), Utc::now())
            .unwrap();
        store.insert_task(task.clone()).await.unwrap();
        let watchdog = Arc::new(Watchdog::new(
            leases.clone(),
            tracker.clone(),
            Duration::from_secs(1),
        ));
        Fixture {
            watchdog,
            tracker,
            leases,
            store,
            events,
            task,
        }
    }

    fn past_ttl() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(TTL).unwrap() + chrono::Duration::seconds(1)
    }

    #[tokio::test]
    async fn test_sweep_fails_running_run_and_frees_task() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();
        f.tracker.begin(&run.id).await.unwrap();

        assert_eq!(f.watchdog.sweep(Utc::now()).await, 0);
        assert_eq!(f.watchdog.sweep(past_ttl()).await, 1);

        let failed = f.store.get_run(&run.id).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error.map(|e| e.kind), Some(FailureKind::LeaseExpired));
        assert!(f.leases.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_leaves_queued_runs_alone() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();

        assert_eq!(f.watchdog.sweep(past_ttl()).await, 0);
        assert_eq!(f.store.get_run(&run.id).await.unwrap().status, RunStatus::Pending);
        assert!(f.leases.holder(&f.task.id).await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_drops_lease_of_finished_run() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();
        f.tracker.begin(&run.id).await.unwrap();
        // Terminal in the store while the lease is still held.
        f.store
            .transition_run(&run.id, RunTransition::Succeed("ok".into()), Utc::now())
            .await
            .unwrap();

        assert_eq!(f.watchdog.sweep(past_ttl()).await, 0);
        assert!(f.leases.is_empty().await);
    }

    #[tokio::test]
    async fn test_no_second_run_opens_before_reclaimed_run_is_terminal() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();
        let stranded = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();
        f.tracker.begin(&stranded.id).await.unwrap();

        let contender = {
            let tracker = f.tracker.clone();
            let task = f.task.clone();
            tokio::spawn(async move {
                loop {
                    match tracker
                        .open_run(&task, TriggerKind::Manual, None, Utc::now())
                        .await
                    {
                        Ok(run) => break run,
                        Err(_) => tokio::task::yield_now().await,
                    }
                }
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(f.watchdog.sweep(past_ttl()).await, 1);
        let next = contender.await.unwrap();

        let order: Vec<(RunId, RunStatus)> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| match event {
                TaskUpdate::RunStatus { run_id, status, .. } => Some((run_id, status)),
                TaskUpdate::MissedFire { .. } => None,
            })
            .collect();
        let failed_at = order
            .iter()
            .position(|(id, status)| *id == stranded.id && *status == RunStatus::Failed)
            .unwrap();
        let opened_at = order
            .iter()
            .position(|(id, status)| *id == next.id && *status == RunStatus::Pending)
            .unwrap();
        assert!(failed_at < opened_at);
    }
}
