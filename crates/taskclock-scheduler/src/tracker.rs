//! Status tracker: the single writer of run status.
//!
//! Every status change goes store-first, then publishes, then releases the
//! lease on entry to a terminal state. Successful results are forwarded to the
//! solution sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use taskclock_core::{
    CoreError, MissedFire, RunFailure, RunId, RunStatus, RunTransition, TaskRun, TaskSpec,
    TaskUpdate, TriggerKind,
};

use crate::backend::{Solution, SolutionSink};
use crate::error::{SchedulerError, StoreError};
use crate::events::EventPublisher;
use crate::lease::{Lease, LeaseManager};
use crate::metrics::SchedulerMetrics;
use crate::store::TaskStore;

/// Owns the run lifecycle.
pub struct StatusTracker {
    store: Arc<TaskStore>,
    leases: Arc<LeaseManager>,
    events: EventPublisher,
    sink: Arc<dyn SolutionSink>,
    metrics: SchedulerMetrics,
}

impl StatusTracker {
    pub fn new(
        store: Arc<TaskStore>,
        leases: Arc<LeaseManager>,
        events: EventPublisher,
        sink: Arc<dyn SolutionSink>,
    ) -> Self {
        Self {
            store,
            leases,
            events,
            sink,
            metrics: SchedulerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Acquire the task's lease and record a pending run.
    ///
    /// Fails with `AlreadyRunning` if another run holds the lease; no run is
    /// recorded in that case.
    pub async fn open_run(
        &self,
        task: &TaskSpec,
        trigger_kind: TriggerKind,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<TaskRun, SchedulerError> {
        let run_id = RunId::generate();
        if let Err(held) = self.leases.try_acquire(&task.id, &run_id, now).await {
            return Err(SchedulerError::AlreadyRunning {
                task_id: task.id.clone(),
                run_id: held.run_id,
            });
        }

        let run = match self
            .store
            .create_run(&task.id, run_id.clone(), trigger_kind, scheduled_for, now)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                self.leases.release(&task.id, &run_id).await;
                return Err(e.into());
            }
        };

        info!(
            task_id = %task.id,
            run_id = %run.id,
            trigger = %trigger_kind,
            sequence = run.sequence_number,
            "Run created"
        );
        self.metrics.run_created();
        self.events.publish(TaskUpdate::run_status(&run, now));
        Ok(run)
    }

    /// Move a pending run to `Running`.
    ///
    /// Returns `None` if the run already left `Pending` (cancelled or
    /// reclaimed while queued); the caller must not execute it.
    pub async fn begin(&self, run_id: &RunId) -> Option<TaskRun> {
        let now = Utc::now();
        let run = self
            .apply(run_id, RunTransition::Start, now)
            .await
            .ok()
            .flatten()?;
        self.leases.renew(&run.task_id, &run.id, now).await;
        info!(task_id = %run.task_id, run_id = %run.id, "Run started");
        Some(run)
    }

    /// Record the outcome of an execution.
    ///
    /// Returns `None` if the run was already terminal; the outcome is then
    /// discarded.
    pub async fn finish(&self, run_id: &RunId, outcome: RunTransition) -> Option<TaskRun> {
        let run = self
            .apply(run_id, outcome, Utc::now())
            .await
            .ok()
            .flatten();
        let Some(run) = run else {
            debug!(run_id = %run_id, "Discarding outcome of already finished run");
            return None;
        };

        match run.status {
            RunStatus::Succeeded => {
                info!(task_id = %run.task_id, run_id = %run.id, "Run succeeded");
                self.archive(&run).await;
            }
            RunStatus::Failed => {
                let reason = run.error.as_ref().map(ToString::to_string);
                warn!(task_id = %run.task_id, run_id = %run.id, error = ?reason, "Run failed");
            }
            status => {
                info!(task_id = %run.task_id, run_id = %run.id, status = %status, "Run finished");
            }
        }
        Some(run)
    }

    /// Cancel a manual run that is pending or running.
    pub async fn cancel(&self, run_id: &RunId) -> Result<TaskRun, SchedulerError> {
        let run = self
            .store
            .get_run(run_id)
            .await
            .ok_or_else(|| SchedulerError::RunNotFound(run_id.clone()))?;

        if run.is_terminal() {
            return Err(SchedulerError::not_cancellable(run_id, run.status));
        }
        if run.trigger_kind != TriggerKind::Manual {
            return Err(SchedulerError::NotCancellable {
                run_id: run_id.clone(),
                reason: format!("{} runs cannot be cancelled once dispatched", run.trigger_kind),
            });
        }

        match self.apply(run_id, RunTransition::Cancel, Utc::now()).await? {
            Some(run) => {
                info!(task_id = %run.task_id, run_id = %run.id, "Run cancelled");
                Ok(run)
            }
            None => {
                // Lost a race with completion.
                let status = self
                    .store
                    .get_run(run_id)
                    .await
                    .map_or(RunStatus::Failed, |r| r.status);
                Err(SchedulerError::not_cancellable(run_id, status))
            }
        }
    }

    /// Fail the run holding an expired lease. The lease is released only
    /// once the run is terminal, so no second run of the task can start
    /// while this one is still active.
    pub async fn reclaim(&self, lease: &Lease) -> Option<TaskRun> {
        let expired_at = lease
            .expires_at
            .map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339());
        let failure = RunFailure::lease_expired(format!(
            "lease expired at {expired_at} without the run finishing"
        ));
        let run = self
            .apply(&lease.run_id, RunTransition::Fail(failure), Utc::now())
            .await
            .ok()
            .flatten();
        if let Some(run) = &run {
            self.metrics.lease_reclaimed();
            error!(
                task_id = %run.task_id,
                run_id = %run.id,
                "Reclaimed lease of stranded run"
            );
        }
        run
    }

    /// Fail a run left non-terminal by a previous process.
    pub async fn fail_stranded(&self, run: &TaskRun, failure: RunFailure) -> Option<TaskRun> {
        self.apply(&run.id, RunTransition::Fail(failure), Utc::now())
            .await
            .ok()
            .flatten()
    }

    /// Record and publish a skipped occurrence.
    pub async fn record_missed_fire(
        &self,
        task: &TaskSpec,
        trigger_kind: TriggerKind,
        due_at: DateTime<Utc>,
        blocking_run_id: Option<RunId>,
    ) -> Result<(), SchedulerError> {
        let marker = MissedFire {
            task_id: task.id.clone(),
            trigger_kind,
            due_at,
            blocking_run_id,
            recorded_at: Utc::now(),
        };
        warn!(
            task_id = %task.id,
            due_at = %due_at,
            blocking_run = ?marker.blocking_run_id,
            "Missed fire: previous run still active"
        );
        self.store.record_missed_fire(marker.clone()).await?;
        self.metrics.missed_fire();
        self.events.publish(TaskUpdate::missed_fire(&marker));
        Ok(())
    }

    /// Apply a transition, publish it and release the lease on terminal entry.
    ///
    /// `Ok(None)` means the state machine rejected the transition.
    async fn apply(
        &self,
        run_id: &RunId,
        transition: RunTransition,
        at: DateTime<Utc>,
    ) -> Result<Option<TaskRun>, SchedulerError> {
        let run = match self.store.transition_run(run_id, transition, at).await {
            Ok(run) => run,
            Err(StoreError::Transition(CoreError::InvalidStateTransition { from, to })) => {
                debug!(run_id = %run_id, from = %from, to = %to, "Transition rejected");
                return Ok(None);
            }
            Err(StoreError::RunNotFound(id)) => {
                // Record gone with its task; the lease must not outlive it.
                if self.leases.release_run(&id).await {
                    warn!(run_id = %id, "Released lease of a run whose record was removed");
                }
                return Err(SchedulerError::RunNotFound(id));
            }
            Err(e) => return Err(e.into()),
        };

        // Publish before releasing so subscribers see the terminal event
        // ahead of the next run of the same task.
        self.events.publish(TaskUpdate::run_status(&run, at));
        if run.is_terminal() {
            self.metrics.run_finished(run.status);
            self.leases.release(&run.task_id, &run.id).await;
        }
        Ok(Some(run))
    }

    async fn archive(&self, run: &TaskRun) {
        let Some(result) = run.result.clone() else {
            return;
        };
        let Some(task) = self.store.get_task(&run.task_id).await else {
            return;
        };
        let solution = Solution {
            task_id: run.task_id.clone(),
            run_id: run.id.clone(),
            task_name: task.name,
            prompt: task.prompt,
            result,
            finished_at: run.finished_at.unwrap_or_else(Utc::now),
        };
        if let Err(e) = self.sink.archive(solution).await {
            warn!(run_id = %run.id, error = %e, "Failed to archive solution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use taskclock_core::{TaskDraft, TaskId, TaskType};

    use crate::backend::BackendError;

    #[derive(Default)]
    struct RecordingSink {
        solutions: Mutex<Vec<Solution>>,
    }

    #[async_trait]
    impl SolutionSink for RecordingSink {
        async fn archive(&self, solution: Solution) -> Result<(), BackendError> {
            self.solutions.lock().await.push(solution);
            Ok(())
        }
    }

    struct Fixture {
        tracker: StatusTracker,
        leases: Arc<LeaseManager>,
        sink: Arc<RecordingSink>,
        events: EventPublisher,
        task: TaskSpec,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(TaskStore::in_memory());
        let leases = Arc::new(LeaseManager::new(Duration::from_secs(60)));
        let events = EventPublisher::new(16);
        let sink = Arc::new(RecordingSink::default());
        let task = TaskDraft::new("adhoc", TaskType::Adhoc, "say hi")
            .into_spec(TaskId::generate(), Utc::now())
            .unwrap();
        store.insert_task(task.clone()).await.unwrap();

        let tracker = StatusTracker::new(store, leases.clone(), events.clone(), sink.clone());
        Fixture {
            tracker,
            leases,
            sink,
            events,
            task,
        }
    }

    #[tokio::test]
    async fn test_open_run_holds_lease_until_terminal() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();

        let err = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning { ref run_id, .. } if *run_id == run.id));

        f.tracker.begin(&run.id).await.unwrap();
        let done = f
            .tracker
            .finish(&run.id, RunTransition::Succeed("hi".into()))
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert!(f.leases.holder(&f.task.id).await.is_none());

        let archived = f.sink.solutions.lock().await;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].result, "hi");
    }

    #[tokio::test]
    async fn test_cancelled_pending_run_is_not_started() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();

        let cancelled = f.tracker.cancel(&run.id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(f.tracker.begin(&run.id).await.is_none());
        assert!(f.leases.is_empty().await);

        let err = f.tracker.cancel(&run.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotCancellable { .. }));
    }

    #[tokio::test]
    async fn test_late_outcome_after_cancel_is_discarded() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();
        f.tracker.begin(&run.id).await.unwrap();
        f.tracker.cancel(&run.id).await.unwrap();

        assert!(f
            .tracker
            .finish(&run.id, RunTransition::Succeed("late".into()))
            .await
            .is_none());
        assert!(f.sink.solutions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_runs_are_not_cancellable() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Cron, Some(Utc::now()), Utc::now())
            .await
            .unwrap();
        let err = f.tracker.cancel(&run.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotCancellable { .. }));
    }

    #[tokio::test]
    async fn test_finish_of_removed_run_frees_lease() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();
        f.tracker.begin(&run.id).await.unwrap();
        f.tracker.store.drop_run_record(&run.id).await;

        assert!(f
            .tracker
            .finish(&run.id, RunTransition::Succeed("orphan".into()))
            .await
            .is_none());
        assert!(f.leases.is_empty().await);
    }

    #[tokio::test]
    async fn test_queued_run_lease_starts_expiring_on_begin() {
        let f = fixture().await;
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(f.leases.holder(&f.task.id).await.unwrap().expires_at, None);

        f.tracker.begin(&run.id).await.unwrap();
        assert!(f.leases.holder(&f.task.id).await.unwrap().expires_at.is_some());
    }

    #[tokio::test]
    async fn test_transitions_are_published_in_order() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();
        let run = f
            .tracker
            .open_run(&f.task, TriggerKind::Manual, None, Utc::now())
            .await
            .unwrap();
        f.tracker.begin(&run.id).await.unwrap();
        f.tracker
            .finish(&run.id, RunTransition::Fail(RunFailure::backend("boom")))
            .await
            .unwrap();

        let mut statuses = Vec::new();
        while let Ok(TaskUpdate::RunStatus { status, .. }) = rx.try_recv() {
            statuses.push(status);
        }
        assert_eq!(
            statuses,
            vec![RunStatus::Pending, RunStatus::Running, RunStatus::Failed]
        );
    }
}
