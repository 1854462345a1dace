//! Scheduler loop - turns due cron minutes and plan entries into runs.
//!
//! Each tick evaluates every scheduled and planned task against the current
//! instant and launches due occurrences through the worker pool. The loop
//! only enqueues; it never waits on execution.
//!
//! Contention policy:
//! - a due cron minute whose task still has an active run is skipped and
//!   recorded as a missed fire;
//! - a due plan entry whose task still has an active run stays unconsumed
//!   and is retried on the next tick, so every entry yields exactly one run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskclock_core::trigger::{cron_is_due, plan_due, truncate_to_minute};
use taskclock_core::{RunId, TaskId, TaskSpec, TaskType, TriggerKind};

use crate::error::SchedulerError;
use crate::pool::WorkerPool;
use crate::store::TaskStore;
use crate::tracker::StatusTracker;

/// What a single tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Runs launched this tick.
    pub launched: Vec<RunId>,
    /// Cron occurrences skipped because the task was busy.
    pub missed: usize,
    /// Plan entries left for a later tick because the task was busy.
    pub deferred: usize,
}

/// Tick-driven trigger loop.
pub struct SchedulerLoop {
    store: Arc<TaskStore>,
    tracker: Arc<StatusTracker>,
    pool: Arc<WorkerPool>,
    tick_interval: Duration,

    /// Last cron minute acted on per task. The loop is its only writer.
    last_cron_minute: Mutex<HashMap<TaskId, DateTime<Utc>>>,
}

impl SchedulerLoop {
    pub fn new(
        store: Arc<TaskStore>,
        tracker: Arc<StatusTracker>,
        pool: Arc<WorkerPool>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            pool,
            tick_interval,
            last_cron_minute: Mutex::new(HashMap::new()),
        }
    }

    /// Tick on the configured interval until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_ms = self.tick_interval.as_millis() as u64, "Scheduler loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if !report.launched.is_empty() || report.missed > 0 {
                        debug!(
                            launched = report.launched.len(),
                            missed = report.missed,
                            deferred = report.deferred,
                            "Scheduler tick"
                        );
                    }
                }
            }
        }
        info!("Scheduler loop stopped");
    }

    /// Evaluate every time-driven task at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        for task in self.store.time_driven_tasks().await {
            match task.task_type {
                TaskType::Scheduled => self.tick_cron(&task, now, &mut report).await,
                TaskType::Planned => self.tick_plan(&task, now, &mut report).await,
                TaskType::Adhoc => {}
            }
        }
        report
    }

    async fn tick_cron(&self, task: &TaskSpec, now: DateTime<Utc>, report: &mut TickReport) {
        let Some(schedule) = &task.schedule else {
            return;
        };
        if !cron_is_due(schedule, now) {
            return;
        }
        let minute = truncate_to_minute(now);

        {
            let mut last = self.last_cron_minute.lock().await;
            let previous = match last.get(&task.id) {
                Some(at) => Some(*at),
                None => self.store.last_fire(&task.id, TriggerKind::Cron).await,
            };
            if previous.is_some_and(|at| at >= minute) {
                return;
            }
            last.insert(task.id.clone(), minute);
        }

        match self
            .pool
            .launch(task, TriggerKind::Cron, Some(minute), now)
            .await
        {
            Ok(run) => report.launched.push(run.id),
            Err(SchedulerError::AlreadyRunning { run_id, .. }) => {
                report.missed += 1;
                if let Err(e) = self
                    .tracker
                    .record_missed_fire(task, TriggerKind::Cron, minute, Some(run_id))
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "Failed to record missed fire");
                }
            }
            Err(SchedulerError::TaskNotFound(_)) => {
                debug!(task_id = %task.id, "Task removed during tick");
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to launch cron run");
            }
        }
    }

    async fn tick_plan(&self, task: &TaskSpec, now: DateTime<Utc>, report: &mut TickReport) {
        let consumed = self.store.consumed_plan_entries(&task.id).await;
        let due = plan_due(&task.plan, &consumed, now);

        for (index, at) in due.iter().enumerate() {
            match self.pool.launch(task, TriggerKind::Plan, Some(*at), now).await {
                Ok(run) => {
                    info!(task_id = %task.id, run_id = %run.id, planned_for = %at, "Plan entry fired");
                    report.launched.push(run.id);
                }
                Err(SchedulerError::AlreadyRunning { run_id, .. }) => {
                    let waiting = due.len() - index;
                    debug!(
                        task_id = %task.id,
                        blocking_run = %run_id,
                        waiting,
                        "Plan entries deferred until the active run finishes"
                    );
                    report.deferred += waiting;
                    break;
                }
                Err(SchedulerError::TaskNotFound(_)) => break,
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Failed to launch planned run");
                    break;
                }
            }
        }
    }

    /// Forget cron bookkeeping for a task (after edit or delete).
    pub async fn forget(&self, task_id: &TaskId) {
        self.last_cron_minute.lock().await.remove(task_id);
    }
}
