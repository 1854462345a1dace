//! Task lifecycle events published on the `task.update` topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, RunStatus, TaskId, TaskRun, TriggerKind};

/// Topic name for task lifecycle events.
pub const TASK_UPDATE_TOPIC: &str = "task.update";

/// Marker recorded when a due cron occurrence is skipped because the task's
/// previous run is still active. Not a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedFire {
    pub task_id: TaskId,
    pub trigger_kind: TriggerKind,

    /// The occurrence that was skipped.
    pub due_at: DateTime<Utc>,

    /// Run that held the lease at the time.
    pub blocking_run_id: Option<RunId>,

    pub recorded_at: DateTime<Utc>,
}

/// Event pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskUpdate {
    /// A run entered a new status.
    RunStatus {
        task_id: TaskId,
        run_id: RunId,
        status: RunStatus,
        trigger: TriggerKind,
        timestamp: DateTime<Utc>,
    },
    /// A due occurrence was skipped.
    MissedFire {
        task_id: TaskId,
        due_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

impl TaskUpdate {
    /// Event for a run's current status.
    pub fn run_status(run: &TaskRun, timestamp: DateTime<Utc>) -> Self {
        Self::RunStatus {
            task_id: run.task_id.clone(),
            run_id: run.id.clone(),
            status: run.status,
            trigger: run.trigger_kind,
            timestamp,
        }
    }

    pub fn missed_fire(marker: &MissedFire) -> Self {
        Self::MissedFire {
            task_id: marker.task_id.clone(),
            due_at: marker.due_at,
            timestamp: marker.recorded_at,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::RunStatus { task_id, .. } | Self::MissedFire { task_id, .. } => task_id,
        }
    }
}
