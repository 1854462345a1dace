//! Control-plane facade.
//!
//! `TaskScheduler` builds the store, lease table, tracker, worker pool,
//! scheduler loop and watchdog from one config and exposes the operations
//! transports call into.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use taskclock_core::trigger::{next_cron_fires, plan_upcoming};
use taskclock_core::{
    MissedFire, RunFailure, RunId, TaskDraft, TaskId, TaskRun, TaskSpec, TaskSummary, TaskType,
    TaskUpdate, TriggerKind,
};

use crate::backend::{ExecutionBackend, SolutionSink};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::events::EventPublisher;
use crate::lease::LeaseManager;
use crate::metrics::MetricsSnapshot;
use crate::pool::{DispatchQueue, WorkerPool};
use crate::scheduler::{SchedulerLoop, TickReport};
use crate::store::TaskStore;
use crate::tracker::StatusTracker;
use crate::watchdog::Watchdog;

/// A task with its history, as returned by `get_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task: TaskSpec,

    /// Newest first.
    pub runs: Vec<TaskRun>,

    /// Newest first.
    pub missed_fires: Vec<MissedFire>,

    /// Plan entries already fired.
    pub consumed_plan: Vec<DateTime<Utc>>,
}

/// The task scheduler.
pub struct TaskScheduler {
    config: SchedulerConfig,
    store: Arc<TaskStore>,
    leases: Arc<LeaseManager>,
    events: EventPublisher,
    tracker: Arc<StatusTracker>,
    pool: Arc<WorkerPool>,
    scheduler: Arc<SchedulerLoop>,
    watchdog: Arc<Watchdog>,
    queue: Mutex<Option<DispatchQueue>>,
    triggers_started: AtomicBool,
    shutdown: CancellationToken,
    background: TaskTracker,
}

impl TaskScheduler {
    /// Wire up all components. Nothing runs until [`TaskScheduler::start`].
    pub fn new(
        config: SchedulerConfig,
        store: Arc<TaskStore>,
        backend: Arc<dyn ExecutionBackend>,
        sink: Arc<dyn SolutionSink>,
    ) -> Self {
        let leases = Arc::new(LeaseManager::new(config.lease_ttl()));
        let events = EventPublisher::new(config.event_capacity);
        let tracker = Arc::new(StatusTracker::new(
            store.clone(),
            leases.clone(),
            events.clone(),
            sink,
        ));
        let (pool, queue) = WorkerPool::new(
            tracker.clone(),
            backend,
            config.max_concurrent_runs,
            config.run_timeout,
        );
        let pool = Arc::new(pool);
        let scheduler = Arc::new(SchedulerLoop::new(
            store.clone(),
            tracker.clone(),
            pool.clone(),
            config.tick_interval,
        ));
        let watchdog = Arc::new(Watchdog::new(
            leases.clone(),
            tracker.clone(),
            config.watchdog_interval,
        ));

        Self {
            config,
            store,
            leases,
            events,
            tracker,
            pool,
            scheduler,
            watchdog,
            queue: Mutex::new(Some(queue)),
            triggers_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            background: TaskTracker::new(),
        }
    }

    /// Fail runs a previous process left pending or running.
    ///
    /// Leases do not survive a restart, so such runs can never finish.
    /// Call before [`TaskScheduler::start`].
    pub async fn recover(&self) -> usize {
        let mut recovered = 0;
        for run in self.store.active_runs().await {
            let failure = RunFailure::lease_expired("reclaimed on restart");
            if self.tracker.fail_stranded(&run, failure).await.is_some() {
                warn!(task_id = %run.task_id, run_id = %run.id, "Reclaimed run stranded by restart");
                recovered += 1;
            }
        }
        recovered
    }

    /// Spawn the worker pool, the scheduler loop and the watchdog.
    ///
    /// Calling it again is a no-op.
    pub async fn start(&self) {
        self.start_workers().await;
        if self.triggers_started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.background
            .spawn(self.scheduler.clone().run(self.shutdown.clone()));
        self.background
            .spawn(self.watchdog.clone().run(self.shutdown.clone()));

        info!(
            max_concurrent_runs = self.config.max_concurrent_runs,
            run_timeout_secs = self.config.run_timeout.as_secs(),
            "Task scheduler started"
        );
    }

    /// Spawn only the worker pool dispatcher.
    ///
    /// Triggers are then driven by the caller through [`TaskScheduler::tick`]
    /// and [`TaskScheduler::sweep_leases`].
    pub async fn start_workers(&self) {
        let Some(queue) = self.queue.lock().await.take() else {
            return;
        };
        self.background
            .spawn(self.pool.clone().run(queue, self.shutdown.clone()));
    }

    /// Stop triggering, fail queued runs, give executing runs a grace period.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.background.close();
        self.background.wait().await;
        self.pool.drain(self.config.shutdown_grace).await;
        info!("Task scheduler stopped");
    }

    // ---- task definitions ------------------------------------------------

    /// Validate and store a new task.
    pub async fn create_task(&self, draft: TaskDraft) -> Result<TaskId, SchedulerError> {
        let spec = draft
            .into_spec(TaskId::generate(), Utc::now())
            .map_err(SchedulerError::InvalidSpec)?;
        let task_id = spec.id.clone();

        info!(
            task_id = %task_id,
            name = %spec.name,
            task_type = %spec.task_type,
            "Creating task"
        );
        self.store.insert_task(spec).await?;
        Ok(task_id)
    }

    /// Replace a task's definition, keeping its id and history.
    pub async fn update_task(
        &self,
        task_id: &TaskId,
        draft: TaskDraft,
    ) -> Result<TaskSpec, SchedulerError> {
        let existing = self
            .store
            .get_task(task_id)
            .await
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))?;
        let spec = draft
            .into_spec(existing.id, existing.created_at)
            .map_err(SchedulerError::InvalidSpec)?;

        self.store.replace_task(spec.clone()).await?;
        self.scheduler.forget(task_id).await;
        info!(task_id = %task_id, "Task updated");
        Ok(spec)
    }

    /// Delete a task and its history. Refused while a run is active.
    pub async fn delete_task(&self, task_id: &TaskId) -> Result<(), SchedulerError> {
        self.store.remove_task(task_id).await?;
        self.scheduler.forget(task_id).await;
        info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    pub async fn list_tasks(&self) -> Vec<TaskSummary> {
        self.store.summaries().await
    }

    /// Task definition plus its run history, newest first.
    pub async fn get_task(&self, task_id: &TaskId) -> Result<TaskDetail, SchedulerError> {
        let task = self
            .store
            .get_task(task_id)
            .await
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))?;

        let mut runs = self.store.runs_for_task(task_id).await;
        if let Some(limit) = self.config.history_limit {
            runs.truncate(limit);
        }

        Ok(TaskDetail {
            task,
            runs,
            missed_fires: self.store.missed_fires(task_id).await,
            consumed_plan: self
                .store
                .consumed_plan_entries(task_id)
                .await
                .into_iter()
                .collect(),
        })
    }

    pub async fn get_run(&self, run_id: &RunId) -> Result<TaskRun, SchedulerError> {
        self.store
            .get_run(run_id)
            .await
            .ok_or_else(|| SchedulerError::RunNotFound(run_id.clone()))
    }

    /// Upcoming fire times of a task after `from`.
    ///
    /// Adhoc tasks have none.
    pub async fn next_fire_times(
        &self,
        task_id: &TaskId,
        from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
        let task = self
            .store
            .get_task(task_id)
            .await
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))?;

        Ok(match (&task.task_type, &task.schedule) {
            (TaskType::Scheduled, Some(schedule)) => next_cron_fires(schedule, from, count),
            (TaskType::Planned, _) => {
                let consumed = self.store.consumed_plan_entries(task_id).await;
                plan_upcoming(&task.plan, &consumed, from, count)
            }
            _ => Vec::new(),
        })
    }

    // ---- runs ------------------------------------------------------------

    /// Run a task immediately, whatever its type.
    pub async fn run_now(&self, task_id: &TaskId) -> Result<RunId, SchedulerError> {
        let task = self
            .store
            .get_task(task_id)
            .await
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))?;

        let run = self
            .pool
            .launch(&task, TriggerKind::Manual, None, Utc::now())
            .await?;
        info!(task_id = %task_id, run_id = %run.id, "Manual run requested");
        Ok(run.id)
    }

    /// Cancel a pending or running manual run.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<TaskRun, SchedulerError> {
        let run = self.tracker.cancel(run_id).await?;
        self.pool.signal_cancel(run_id).await;
        Ok(run)
    }

    /// Subscribe to the `task.update` topic.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskUpdate> {
        self.events.subscribe()
    }

    /// Run one scheduler evaluation at `now`, outside the background loop.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        self.scheduler.tick(now).await
    }

    /// Counters since start plus current lease and slot gauges.
    pub async fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_leases: self.leases.len().await as u64,
            free_slots: self.pool.available_slots() as u64,
            ..self.tracker.metrics().snapshot()
        }
    }

    /// Reclaim leases expired at `now`, outside the background watchdog.
    pub async fn sweep_leases(&self, now: DateTime<Utc>) -> usize {
        self.watchdog.sweep(now).await
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}
