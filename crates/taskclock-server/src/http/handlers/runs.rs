//! Run handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use taskclock_core::{RunId, TaskRun};

use crate::http::error::ApiError;
use crate::state::AppState;

/// `GET /v1/runs/:id`
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
) -> Result<Json<TaskRun>, ApiError> {
    Ok(Json(state.scheduler.get_run(&run_id).await?))
}

/// `POST /v1/runs/:id/cancel`
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
) -> Result<Json<TaskRun>, ApiError> {
    Ok(Json(state.scheduler.cancel_run(&run_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use taskclock_core::{RunStatus, TaskDraft, TaskType};

    use crate::http::handlers::test_support::app_state;

    #[tokio::test]
    async fn test_cancel_finished_run_conflicts() {
        let state = app_state().await;
        let task_id = state
            .scheduler
            .create_task(TaskDraft::new("quick", TaskType::Adhoc, "hi"))
            .await
            .unwrap();
        let run_id = state.scheduler.run_now(&task_id).await.unwrap();

        let mut finished = None;
        for _ in 0..200 {
            let Json(run) = get_run(State(state.clone()), Path(run_id.clone()))
                .await
                .unwrap();
            if run.is_terminal() {
                finished = Some(run);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let finished = finished.expect("run did not finish");
        assert_eq!(finished.status, RunStatus::Succeeded);
        assert_eq!(finished.result.as_deref(), Some("hi"));

        let err = cancel_run(State(state), Path(run_id)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let state = app_state().await;
        let err = get_run(State(state), Path(RunId::new("nope")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
