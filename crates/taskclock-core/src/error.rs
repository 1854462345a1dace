//! Core domain errors.

use thiserror::Error;

/// Core domain errors for TaskClock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Task definition violates its type invariants.
    #[error("Invalid task spec: {0}")]
    InvalidSpec(String),

    /// A cron field could not be parsed or is out of its domain.
    #[error("Invalid cron field {field} = '{value}': {reason}")]
    InvalidCronField {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Run status change not permitted by the run state machine.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}
