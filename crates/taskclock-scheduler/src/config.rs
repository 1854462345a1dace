//! Scheduler configuration.

use std::time::Duration;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler loop wakes up. Cron evaluation is per minute
    /// regardless; a shorter tick only reduces firing latency.
    pub tick_interval: Duration,

    /// Pool-wide ceiling on concurrently executing runs.
    pub max_concurrent_runs: usize,

    /// Execution budget for a single run.
    pub run_timeout: Duration,

    /// Extra time past `run_timeout` before the watchdog reclaims a lease.
    pub lease_grace: Duration,

    /// How often the watchdog looks for expired leases.
    pub watchdog_interval: Duration,

    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,

    /// Maximum number of runs returned by `get_task`, newest first.
    pub history_limit: Option<usize>,

    /// How long shutdown waits for in-flight runs before aborting them.
    pub shutdown_grace: Duration,
}

impl SchedulerConfig {
    /// Lifetime of a lease from grant or (re)start of execution.
    pub fn lease_ttl(&self) -> Duration {
        self.run_timeout + self.lease_grace
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent_runs: 4,
            run_timeout: Duration::from_secs(600),
            lease_grace: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(5),
            event_capacity: 256,
            history_limit: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}
