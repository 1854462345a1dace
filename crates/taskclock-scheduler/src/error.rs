//! Scheduler and store errors.

use thiserror::Error;

use taskclock_core::{CoreError, RunId, RunStatus, TaskId};

/// Errors returned synchronously by control-plane operations.
///
/// Execution-time failures never appear here; they end up on the run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    InvalidSpec(CoreError),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Task {task_id} already has an active run: {run_id}")]
    AlreadyRunning { task_id: TaskId, run_id: RunId },

    #[error("Run {run_id} cannot be cancelled ({reason})")]
    NotCancellable { run_id: RunId, reason: String },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl SchedulerError {
    pub(crate) fn not_cancellable(run_id: &RunId, status: RunStatus) -> Self {
        Self::NotCancellable {
            run_id: run_id.clone(),
            reason: format!("status is {status}"),
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TaskNotFound(id) => Self::TaskNotFound(id),
            StoreError::RunNotFound(id) => Self::RunNotFound(id),
            StoreError::TaskBusy { task_id, run_id } => Self::AlreadyRunning { task_id, run_id },
            other => Self::Store(other),
        }
    }
}

/// Task store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("Task {task_id} has an active run: {run_id}")]
    TaskBusy { task_id: TaskId, run_id: RunId },

    #[error("Rejected run transition: {0}")]
    Transition(#[from] CoreError),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
