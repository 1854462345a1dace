//! Worker pool: bounded concurrent execution of dispatched runs.
//!
//! Runs enter through [`WorkerPool::launch`], which takes the task's lease,
//! records the pending run and queues it. A dispatcher pulls from the queue
//! and starts each run once a slot under the pool-wide ceiling is free.
//! Leases stop same-task overlap; the ceiling stops global exhaustion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use taskclock_core::{FailureKind, RunFailure, RunId, RunTransition, TaskRun, TaskSpec, TriggerKind};

use crate::backend::{BackendError, ExecutionBackend, ExecutionRequest};
use crate::error::SchedulerError;
use crate::tracker::StatusTracker;

/// A run waiting for a worker slot.
#[derive(Debug)]
pub struct DispatchRequest {
    pub request: ExecutionRequest,
    pub trigger_kind: TriggerKind,
    pub cancel: CancellationToken,
}

/// Receiving half of the dispatch queue, consumed by [`WorkerPool::run`].
pub struct DispatchQueue(mpsc::UnboundedReceiver<DispatchRequest>);

/// Bounded executor pool.
pub struct WorkerPool {
    tracker: Arc<StatusTracker>,
    backend: Arc<dyn ExecutionBackend>,
    queue_tx: mpsc::UnboundedSender<DispatchRequest>,
    slots: Arc<Semaphore>,
    run_timeout: Duration,

    /// Cancellation handles for runs that are queued or executing.
    inflight: Arc<Mutex<HashMap<RunId, CancellationToken>>>,

    /// Set once shutdown starts aborting executing runs.
    draining: AtomicBool,

    workers: TaskTracker,
}

impl WorkerPool {
    /// Create a pool and the queue its dispatcher will drain.
    pub fn new(
        tracker: Arc<StatusTracker>,
        backend: Arc<dyn ExecutionBackend>,
        max_concurrent_runs: usize,
        run_timeout: Duration,
    ) -> (Self, DispatchQueue) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let pool = Self {
            tracker,
            backend,
            queue_tx,
            slots: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            run_timeout,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            draining: AtomicBool::new(false),
            workers: TaskTracker::new(),
        };
        (pool, DispatchQueue(queue_rx))
    }

    /// Lease, record and enqueue a run of `task`.
    ///
    /// This is the only way runs are created, for manual and time-driven
    /// triggers alike.
    pub async fn launch(
        &self,
        task: &TaskSpec,
        trigger_kind: TriggerKind,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<TaskRun, SchedulerError> {
        let run = self
            .tracker
            .open_run(task, trigger_kind, scheduled_for, now)
            .await?;

        let cancel = CancellationToken::new();
        self.inflight
            .lock()
            .await
            .insert(run.id.clone(), cancel.clone());

        let dispatch = DispatchRequest {
            request: ExecutionRequest::for_run(task, &run.id),
            trigger_kind,
            cancel,
        };
        if self.queue_tx.send(dispatch).is_err() {
            warn!(task_id = %task.id, run_id = %run.id, "Dispatch queue closed");
            self.inflight.lock().await.remove(&run.id);
            let failure = RunFailure::new(FailureKind::Shutdown, "worker pool is shut down");
            self.tracker
                .finish(&run.id, RunTransition::Fail(failure))
                .await;
        } else {
            debug!(task_id = %task.id, run_id = %run.id, "Run queued");
        }
        Ok(run)
    }

    /// Signal a queued or executing run to stop. Returns false if the pool
    /// does not know the run.
    pub async fn signal_cancel(&self, run_id: &RunId) -> bool {
        match self.inflight.lock().await.get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of free execution slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Dispatcher loop. Runs until `shutdown` fires or the queue closes.
    ///
    /// Requests still queued at shutdown are failed with `Shutdown`.
    pub async fn run(self: Arc<Self>, queue: DispatchQueue, shutdown: CancellationToken) {
        let mut rx = queue.0;
        info!(slots = self.slots.available_permits(), "Worker pool started");

        loop {
            let dispatch = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(dispatch) => dispatch,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = shutdown.cancelled() => {
                    self.abandon(dispatch).await;
                    break;
                }
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.abandon(dispatch).await;
                        break;
                    }
                },
            };

            let pool = self.clone();
            self.workers.spawn(async move {
                pool.execute(dispatch, permit).await;
            });
        }

        rx.close();
        while let Some(dispatch) = rx.recv().await {
            self.abandon(dispatch).await;
        }
        info!("Worker pool dispatcher stopped");
    }

    /// Wait up to `grace` for executing runs, then abort the rest.
    pub async fn drain(&self, grace: Duration) {
        self.workers.close();
        if tokio::time::timeout(grace, self.workers.wait()).await.is_err() {
            warn!(
                remaining = self.workers.len(),
                "Runs still executing after shutdown grace, signalling abort"
            );
            self.draining.store(true, Ordering::SeqCst);
            for token in self.inflight.lock().await.values() {
                token.cancel();
            }
            self.workers.wait().await;
        }
    }

    async fn execute(&self, dispatch: DispatchRequest, _permit: OwnedSemaphorePermit) {
        let DispatchRequest {
            request,
            trigger_kind,
            cancel,
        } = dispatch;
        let run_id = request.run_id.clone();

        if self.tracker.begin(&run_id).await.is_none() {
            debug!(run_id = %run_id, "Run no longer pending, skipping execution");
            self.inflight.lock().await.remove(&run_id);
            return;
        }

        let outcome = self.invoke(request, trigger_kind, cancel).await;
        self.inflight.lock().await.remove(&run_id);
        self.tracker.finish(&run_id, outcome).await;
    }

    /// Call the backend in its own task so a panic or a stalled call can be
    /// contained, and map the result onto a terminal transition.
    async fn invoke(
        &self,
        request: ExecutionRequest,
        trigger_kind: TriggerKind,
        cancel: CancellationToken,
    ) -> RunTransition {
        let backend = self.backend.clone();
        let token = cancel.clone();
        let mut call = tokio::spawn(async move { backend.execute(request, token).await });

        match tokio::time::timeout(self.run_timeout, &mut call).await {
            Ok(Ok(Ok(result))) => RunTransition::Succeed(result),
            Ok(Ok(Err(BackendError::Aborted))) if cancel.is_cancelled() => {
                aborted_outcome(trigger_kind, self.draining.load(Ordering::SeqCst))
            }
            Ok(Ok(Err(e))) => RunTransition::Fail(RunFailure::backend(e.to_string())),
            Ok(Err(join_error)) => RunTransition::Fail(RunFailure::backend(format!(
                "execution task crashed: {join_error}"
            ))),
            Err(_) => {
                cancel.cancel();
                call.abort();
                RunTransition::Fail(RunFailure::timeout(format!(
                    "run exceeded {}s execution budget",
                    self.run_timeout.as_secs_f64()
                )))
            }
        }
    }

    async fn abandon(&self, dispatch: DispatchRequest) {
        let run_id = dispatch.request.run_id;
        self.inflight.lock().await.remove(&run_id);
        let failure = RunFailure::new(FailureKind::Shutdown, "scheduler shut down before the run started");
        self.tracker
            .finish(&run_id, RunTransition::Fail(failure))
            .await;
    }
}

/// Terminal transition for a backend call that stopped on its cancel token.
///
/// Only a manual run outside shutdown was cancelled by a caller; anything
/// else was aborted by shutdown.
fn aborted_outcome(trigger_kind: TriggerKind, draining: bool) -> RunTransition {
    if trigger_kind == TriggerKind::Manual && !draining {
        RunTransition::Cancel
    } else {
        RunTransition::Fail(RunFailure::new(
            FailureKind::Shutdown,
            "aborted by scheduler shutdown",
        ))
    }
}
