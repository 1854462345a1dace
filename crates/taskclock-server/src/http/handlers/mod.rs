//! HTTP request handlers.

mod events;
mod health;
mod runs;
mod tasks;

pub use events::stream_events;
pub use health::{health_check, metrics_handler};
pub use runs::{cancel_run, get_run};
pub use tasks::{
    create_task, delete_task, get_task, list_tasks, next_fire_times, run_now, update_task,
};
