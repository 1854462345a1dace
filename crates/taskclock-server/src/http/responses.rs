//! HTTP request and response types.
//!
//! Task drafts, specs, runs and events are served in their domain
//! serialization; only envelopes live here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskclock_core::{RunId, TaskId};

/// Upper bound on previewed fire times per request.
pub const MAX_PREVIEW_COUNT: usize = taskclock_core::trigger::MAX_PREVIEW;

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Task types
// ============================================================================

/// Response body for task creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
}

/// Response body for a manual run request.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunNowResponse {
    pub task_id: TaskId,
    pub run_id: RunId,
}

/// Query for `GET /v1/tasks/:id/next`.
#[derive(Debug, Default, Deserialize)]
pub struct NextFireQuery {
    /// Preview start (exclusive). Defaults to now.
    pub from: Option<DateTime<Utc>>,

    /// Number of fire times. Defaults to 5.
    pub count: Option<usize>,
}

/// Response for the fire-time preview.
#[derive(Debug, Serialize, Deserialize)]
pub struct NextFireResponse {
    pub task_id: TaskId,
    pub from: DateTime<Utc>,
    pub fire_times: Vec<DateTime<Utc>>,
}

// ============================================================================
// Event types
// ============================================================================

/// Query for `GET /v1/events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this task.
    pub task_id: Option<TaskId>,
}
