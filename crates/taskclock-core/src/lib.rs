//! TaskClock Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Async runtimes
//! - Storage
//! - Transports
//!
//! Trigger evaluation lives here too: both evaluators are pure functions of
//! a task definition and an instant.

pub mod error;
pub mod event;
pub mod ids;
pub mod run;
pub mod schedule;
pub mod status;
pub mod task;
pub mod trigger;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{MissedFire, TaskUpdate, TASK_UPDATE_TOPIC};
pub use ids::{RunId, TaskId};
pub use run::{FailureKind, RunFailure, RunTransition, TaskRun};
pub use schedule::{CronField, CronSchedule, ScheduleFields};
pub use status::{RunStatus, TaskType, TriggerKind};
pub use task::{parse_timestamp, TaskDraft, TaskSpec, TaskSummary};
