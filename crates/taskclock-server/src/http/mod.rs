//! HTTP server for the control plane.
//!
//! Provides endpoints for:
//! - Task definitions (`/v1/tasks`, `/v1/tasks/:id`)
//! - Manual runs and fire-time previews (`/v1/tasks/:id/run`, `/v1/tasks/:id/next`)
//! - Run lookup and cancellation (`/v1/runs/:id`, `/v1/runs/:id/cancel`)
//! - The `task.update` event stream (`/v1/events`, Server-Sent Events)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod error;
pub(crate) mod handlers;
pub mod responses;

pub use error::ApiError;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Task definitions
        .route(
            "/v1/tasks",
            post(handlers::create_task).get(handlers::list_tasks),
        )
        .route(
            "/v1/tasks/:id",
            get(handlers::get_task)
                .put(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route("/v1/tasks/:id/run", post(handlers::run_now))
        .route("/v1/tasks/:id/next", get(handlers::next_fire_times))
        // Runs
        .route("/v1/runs/:id", get(handlers::get_run))
        .route("/v1/runs/:id/cancel", post(handlers::cancel_run))
        // Events
        .route("/v1/events", get(handlers::stream_events))
        // Observability
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
