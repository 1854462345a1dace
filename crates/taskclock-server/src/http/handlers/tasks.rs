//! Task definition and manual-run handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::info;

use taskclock_core::{TaskDraft, TaskId, TaskSpec, TaskSummary};
use taskclock_scheduler::TaskDetail;

use crate::http::error::ApiError;
use crate::http::responses::{
    CreateTaskResponse, NextFireQuery, NextFireResponse, RunNowResponse, MAX_PREVIEW_COUNT,
};
use crate::state::AppState;

fn parse_draft(payload: Result<Json<TaskDraft>, JsonRejection>) -> Result<TaskDraft, ApiError> {
    payload
        .map(|Json(draft)| draft)
        .map_err(|rejection| ApiError::InvalidJson {
            message: rejection.body_text(),
        })
}

/// `POST /v1/tasks`
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TaskDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let draft = parse_draft(payload)?;
    let task_id = state.scheduler.create_task(draft).await?;
    Ok((StatusCode::CREATED, Json(CreateTaskResponse { task_id })))
}

/// `GET /v1/tasks`
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskSummary>> {
    Json(state.scheduler.list_tasks().await)
}

/// `GET /v1/tasks/:id`
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<TaskDetail>, ApiError> {
    Ok(Json(state.scheduler.get_task(&task_id).await?))
}

/// `PUT /v1/tasks/:id`
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
    payload: Result<Json<TaskDraft>, JsonRejection>,
) -> Result<Json<TaskSpec>, ApiError> {
    let draft = parse_draft(payload)?;
    Ok(Json(state.scheduler.update_task(&task_id, draft).await?))
}

/// `DELETE /v1/tasks/:id`
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.delete_task(&task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/tasks/:id/run`
pub async fn run_now(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> Result<(StatusCode, Json<RunNowResponse>), ApiError> {
    let run_id = state.scheduler.run_now(&task_id).await?;
    info!(task_id = %task_id, run_id = %run_id, "Manual run accepted over HTTP");
    Ok((StatusCode::ACCEPTED, Json(RunNowResponse { task_id, run_id })))
}

/// `GET /v1/tasks/:id/next?from=<rfc3339>&count=<n>`
pub async fn next_fire_times(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
    Query(query): Query<NextFireQuery>,
) -> Result<Json<NextFireResponse>, ApiError> {
    let count = query.count.unwrap_or(5);
    if count == 0 || count > MAX_PREVIEW_COUNT {
        return Err(ApiError::InvalidQuery {
            message: format!("count must be between 1 and {MAX_PREVIEW_COUNT}"),
        });
    }
    let from = query.from.unwrap_or_else(Utc::now);

    let fire_times = state
        .scheduler
        .next_fire_times(&task_id, from, count)
        .await?;
    Ok(Json(NextFireResponse {
        task_id,
        from,
        fire_times,
    }))
}
