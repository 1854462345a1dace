//! TaskClock Scheduling Engine
//!
//! Owns everything between a stored task definition and a finished run:
//!
//! - [`store::TaskStore`] - task definitions and run history
//! - [`lease::LeaseManager`] - at most one in-flight run per task
//! - [`tracker::StatusTracker`] - the only writer of run status
//! - [`events::EventPublisher`] - `task.update` fan-out
//! - [`pool::WorkerPool`] - bounded execution against an [`ExecutionBackend`]
//! - [`scheduler::SchedulerLoop`] - tick-driven cron and plan triggering
//! - [`watchdog::Watchdog`] - reclaims expired leases
//! - [`metrics::SchedulerMetrics`] - run, missed-fire and reclaim counters
//!
//! [`TaskScheduler`] wires these together and exposes the control-plane
//! operations.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod lease;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tracker;
pub mod watchdog;

pub use backend::{
    BackendError, ContextHandle, ExecutionBackend, ExecutionRequest, NoopSink, Solution,
    SolutionSink,
};
pub use config::SchedulerConfig;
pub use error::{SchedulerError, StoreError};
pub use events::EventPublisher;
pub use metrics::MetricsSnapshot;
pub use scheduler::{SchedulerLoop, TickReport};
pub use service::{TaskDetail, TaskScheduler};
pub use store::{Retention, TaskStore};
