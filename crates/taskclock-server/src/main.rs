//! TaskClock Server.
//!
//! Runs the task scheduler and exposes it over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use taskclock_scheduler::{
    ExecutionBackend, NoopSink, Retention, SchedulerConfig, SolutionSink, TaskScheduler,
    TaskStore,
};
use taskclock_server::{http, AppState, EchoBackend, HttpBackend, JsonlSink};

/// TaskClock scheduler with an HTTP control plane.
#[derive(Parser, Debug)]
#[command(name = "taskclock-server", about = "TaskClock scheduler with HTTP control plane")]
struct Args {
    /// HTTP server address
    #[arg(long, default_value = "127.0.0.1:7070")]
    http_addr: String,

    /// JSON snapshot file for tasks and run history (in-memory if omitted)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// URL of the execution backend (echo backend if omitted)
    #[arg(long)]
    backend_url: Option<String>,

    /// Append successful results to this JSON-lines file
    #[arg(long)]
    solutions_file: Option<PathBuf>,

    /// Scheduler tick interval in milliseconds
    #[arg(long, default_value = "1000")]
    tick_interval_ms: u64,

    /// Maximum runs executing at once
    #[arg(long, default_value = "4")]
    max_concurrent_runs: usize,

    /// Execution budget per run in seconds
    #[arg(long, default_value = "600")]
    run_timeout_secs: u64,

    /// Extra lease lifetime beyond the run timeout, in seconds
    #[arg(long, default_value = "30")]
    lease_grace_secs: u64,

    /// Lease watchdog interval in milliseconds
    #[arg(long, default_value = "5000")]
    watchdog_interval_ms: u64,

    /// Buffered events per subscriber
    #[arg(long, default_value = "256")]
    event_capacity: usize,

    /// Maximum runs returned per task by get-task
    #[arg(long)]
    history_limit: Option<usize>,

    /// Finished runs kept per task before the oldest are pruned
    #[arg(long, default_value = "1000")]
    run_retention: usize,

    /// Missed-fire markers kept per task
    #[arg(long, default_value = "200")]
    missed_fire_retention: usize,

    /// Seconds executing runs get to finish on shutdown
    #[arg(long, default_value = "10")]
    shutdown_grace_secs: u64,

    /// Artificial delay of the echo backend in milliseconds
    #[arg(long, default_value = "0")]
    echo_delay_ms: u64,
}

impl Args {
    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            max_concurrent_runs: self.max_concurrent_runs,
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            lease_grace: Duration::from_secs(self.lease_grace_secs),
            watchdog_interval: Duration::from_millis(self.watchdog_interval_ms.max(1)),
            event_capacity: self.event_capacity,
            history_limit: self.history_limit,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    fn retention(&self) -> Retention {
        Retention {
            runs_per_task: self.run_retention,
            missed_fires_per_task: self.missed_fire_retention,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("taskclock=info".parse()?))
        .init();

    let http_addr: SocketAddr = args.http_addr.parse()?;
    let config = args.scheduler_config();

    let store = match &args.state_file {
        Some(path) => TaskStore::open(path).await?,
        None => {
            warn!("No --state-file given, task history will not survive a restart");
            TaskStore::in_memory()
        }
    }
    .with_retention(args.retention());

    let backend: Arc<dyn ExecutionBackend> = match &args.backend_url {
        Some(url) => {
            info!(url = %url, "Using HTTP execution backend");
            Arc::new(HttpBackend::new(url.clone(), config.run_timeout)?)
        }
        None => {
            info!("No --backend-url given, using echo backend");
            Arc::new(EchoBackend::with_delay(Duration::from_millis(args.echo_delay_ms)))
        }
    };

    let sink: Arc<dyn SolutionSink> = match &args.solutions_file {
        Some(path) => Arc::new(JsonlSink::new(path.clone())),
        None => Arc::new(NoopSink),
    };

    let scheduler = Arc::new(TaskScheduler::new(config, Arc::new(store), backend, sink));
    let recovered = scheduler.recover().await;
    if recovered > 0 {
        warn!(recovered, "Failed runs left in flight by the previous process");
    }
    scheduler.start().await;

    let shutdown = CancellationToken::new();
    let router = http::create_router(AppState::new(scheduler.clone(), shutdown.clone()));

    let listener = TcpListener::bind(http_addr).await?;
    info!(http_addr = %http_addr, "TaskClock server listening");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await;
    if let Err(e) = &result {
        error!(error = %e, "HTTP server error");
    }

    scheduler.shutdown().await;
    info!("TaskClock server stopped");
    result.map_err(Into::into)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
