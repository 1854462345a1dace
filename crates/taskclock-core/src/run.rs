//! Task runs and their state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, RunId, RunStatus, TaskId, TriggerKind};

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The execution backend raised or returned a failure.
    Backend,
    /// The run exceeded its execution budget.
    Timeout,
    /// The watchdog reclaimed the lease of a presumed-crashed worker.
    LeaseExpired,
    /// The scheduler shut down before the run could start.
    Shutdown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Backend => "backend_error",
            Self::Timeout => "timeout",
            Self::LeaseExpired => "lease_expired",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Error recorded on a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Backend, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn lease_expired(message: impl Into<String>) -> Self {
        Self::new(FailureKind::LeaseExpired, message)
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTransition {
    Start,
    Succeed(String),
    Fail(RunFailure),
    Cancel,
}

impl RunTransition {
    /// Status the run ends up in after this transition.
    pub fn target(&self) -> RunStatus {
        match self {
            Self::Start => RunStatus::Running,
            Self::Succeed(_) => RunStatus::Succeeded,
            Self::Fail(_) => RunStatus::Failed,
            Self::Cancel => RunStatus::Cancelled,
        }
    }
}

/// One execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: RunId,
    pub task_id: TaskId,
    pub trigger_kind: TriggerKind,

    /// Monotonically increasing per task, assigned at creation.
    pub sequence_number: u64,

    /// The cron minute or plan timestamp this run was created for.
    pub scheduled_for: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// Set when a worker begins invoking the backend.
    pub started_at: Option<DateTime<Utc>>,

    /// Set on entry to a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    pub status: RunStatus,

    /// Present iff `status == Succeeded`.
    pub result: Option<String>,

    /// Present iff `status == Failed`.
    pub error: Option<RunFailure>,
}

impl TaskRun {
    /// Create a pending run.
    pub fn new(
        id: RunId,
        task_id: TaskId,
        trigger_kind: TriggerKind,
        sequence_number: u64,
        scheduled_for: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            trigger_kind,
            sequence_number,
            scheduled_for,
            created_at,
            started_at: None,
            finished_at: None,
            status: RunStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Apply a transition at `at`. Terminal runs never change again.
    pub fn apply(&mut self, transition: RunTransition, at: DateTime<Utc>) -> Result<(), CoreError> {
        let target = transition.target();
        if !self.status.can_transition_to(target) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }

        match transition {
            RunTransition::Start => {
                self.started_at = Some(at);
            }
            RunTransition::Succeed(result) => {
                self.result = Some(result);
                self.finish(at);
            }
            RunTransition::Fail(failure) => {
                self.error = Some(failure);
                self.finish(at);
            }
            RunTransition::Cancel => {
                self.finish(at);
            }
        }
        self.status = target;
        Ok(())
    }

    fn finish(&mut self, at: DateTime<Utc>) {
        // started_at <= finished_at even if the clock stepped backwards
        let finished = self.started_at.map_or(at, |started| started.max(at));
        self.finished_at = Some(finished);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
