//! TaskClock Server
//!
//! HTTP/JSON transport for the task scheduler plus the collaborator
//! adapters the binary wires in.

pub mod backend;
pub mod http;
pub mod metrics;
pub mod sink;
pub mod state;

pub use backend::{EchoBackend, HttpBackend};
pub use sink::JsonlSink;
pub use state::AppState;
