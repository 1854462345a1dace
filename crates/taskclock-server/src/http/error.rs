//! Mapping of scheduler errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use taskclock_scheduler::SchedulerError;

use crate::http::responses::ErrorResponse;

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// Request body was not valid JSON for the endpoint.
    InvalidJson { message: String },
    /// Query parameter out of range.
    InvalidQuery { message: String },
    /// Error from the scheduler.
    Scheduler(SchedulerError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson { .. } | ApiError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(e) => match e {
                SchedulerError::InvalidSpec(_) => StatusCode::BAD_REQUEST,
                SchedulerError::TaskNotFound(_) | SchedulerError::RunNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                SchedulerError::AlreadyRunning { .. } | SchedulerError::NotCancellable { .. } => {
                    StatusCode::CONFLICT
                }
                SchedulerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::InvalidJson { message } => format!("invalid request body: {message}"),
            ApiError::InvalidQuery { message } => message.clone(),
            ApiError::Scheduler(e) => e.to_string(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        ApiError::Scheduler(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!(status = %status, error = %message, "Request failed");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
