//! Status and classification enums for tasks and runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a task decides when to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Runs only when explicitly requested.
    Adhoc,
    /// Runs once at each timestamp of an explicit plan.
    Planned,
    /// Runs on every minute matching a cron schedule.
    Scheduled,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Adhoc => "adhoc",
            Self::Planned => "planned",
            Self::Scheduled => "scheduled",
        })
    }
}

/// What caused a run to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Explicit `run_now` request.
    Manual,
    /// A plan timestamp became due.
    Plan,
    /// A cron minute matched.
    Cron,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Plan => "plan",
            Self::Cron => "cron",
        })
    }
}

/// Status of a single run.
///
/// `Pending -> Running -> {Succeeded | Failed | Cancelled}`; `Pending` may
/// also go straight to `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Lease granted and run recorded, waiting for a worker slot.
    #[default]
    Pending,
    /// A worker is invoking the execution backend.
    Running,
    /// Backend returned a result.
    Succeeded,
    /// Backend error, timeout or reclaimed lease.
    Failed,
    /// Cancelled on request.
    Cancelled,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the run is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending | Self::Running, Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Succeeded) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
