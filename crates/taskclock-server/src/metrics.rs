//! Prometheus text exposition of the scheduler counters.

use std::fmt::Write;
use std::sync::Arc;

use taskclock_scheduler::MetricsSnapshot;

use crate::state::AppState;

/// Collect the scheduler metrics and format them as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let snapshot = state.scheduler.metrics().await;
    let mut output = String::new();

    write_run_metrics(&snapshot, &mut output);
    write_lease_metrics(&snapshot, &mut output);

    output
}

fn write_run_metrics(snapshot: &MetricsSnapshot, output: &mut String) {
    writeln!(
        output,
        "# HELP taskclock_runs_created_total Runs created since start"
    )
    .ok();
    writeln!(output, "# TYPE taskclock_runs_created_total counter").ok();
    writeln!(
        output,
        "taskclock_runs_created_total {}",
        snapshot.runs_created
    )
    .ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskclock_runs_finished_total Runs that reached a terminal status"
    )
    .ok();
    writeln!(output, "# TYPE taskclock_runs_finished_total counter").ok();
    writeln!(
        output,
        "taskclock_runs_finished_total{{status=\"succeeded\"}} {}",
        snapshot.runs_succeeded
    )
    .ok();
    writeln!(
        output,
        "taskclock_runs_finished_total{{status=\"failed\"}} {}",
        snapshot.runs_failed
    )
    .ok();
    writeln!(
        output,
        "taskclock_runs_finished_total{{status=\"cancelled\"}} {}",
        snapshot.runs_cancelled
    )
    .ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskclock_missed_fires_total Cron occurrences skipped because the task was busy"
    )
    .ok();
    writeln!(output, "# TYPE taskclock_missed_fires_total counter").ok();
    writeln!(
        output,
        "taskclock_missed_fires_total {}",
        snapshot.missed_fires
    )
    .ok();
}

fn write_lease_metrics(snapshot: &MetricsSnapshot, output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskclock_leases_reclaimed_total Runs failed by the lease watchdog"
    )
    .ok();
    writeln!(output, "# TYPE taskclock_leases_reclaimed_total counter").ok();
    writeln!(
        output,
        "taskclock_leases_reclaimed_total {}",
        snapshot.leases_reclaimed
    )
    .ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskclock_active_leases Tasks with a pending or running run"
    )
    .ok();
    writeln!(output, "# TYPE taskclock_active_leases gauge").ok();
    writeln!(output, "taskclock_active_leases {}", snapshot.active_leases).ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskclock_free_slots Worker slots not executing a run"
    )
    .ok();
    writeln!(output, "# TYPE taskclock_free_slots gauge").ok();
    writeln!(output, "taskclock_free_slots {}", snapshot.free_slots).ok();
}
