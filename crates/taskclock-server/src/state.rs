//! Shared state for HTTP handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use taskclock_scheduler::TaskScheduler;

pub struct AppState {
    pub scheduler: Arc<TaskScheduler>,

    /// Fired when the server begins shutting down; closes event streams so
    /// graceful shutdown is not held open by subscribers.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(scheduler: Arc<TaskScheduler>, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            shutdown,
        })
    }
}
