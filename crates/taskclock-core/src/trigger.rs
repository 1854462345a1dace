//! Trigger evaluators.
//!
//! Both evaluators are pure: they look at a task definition, an instant and
//! (for plans) the set of entries already acted on.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};

use crate::CronSchedule;

/// Upper bound on entries a single preview returns.
pub const MAX_PREVIEW: usize = 100;

/// How far ahead `next_cron_fires` searches before giving up.
const PREVIEW_HORIZON_DAYS: i64 = 5 * 366;

/// Truncate an instant to the start of its minute.
pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(Duration::minutes(1))
        .unwrap_or_else(|_| {
            instant
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(instant)
        })
}

/// Cron evaluator: is the minute containing `instant` due?
pub fn cron_is_due(schedule: &CronSchedule, instant: DateTime<Utc>) -> bool {
    schedule.matches(truncate_to_minute(instant))
}

/// Plan evaluator: every unconsumed plan entry at or before `now`, oldest first.
pub fn plan_due(
    plan: &[DateTime<Utc>],
    consumed: &BTreeSet<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let due: BTreeSet<DateTime<Utc>> = plan
        .iter()
        .copied()
        .filter(|at| *at <= now && !consumed.contains(at))
        .collect();
    due.into_iter().collect()
}

/// Unconsumed plan entries strictly after `now`, oldest first.
pub fn plan_upcoming(
    plan: &[DateTime<Utc>],
    consumed: &BTreeSet<DateTime<Utc>>,
    now: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let upcoming: BTreeSet<DateTime<Utc>> = plan
        .iter()
        .copied()
        .filter(|at| *at > now && !consumed.contains(at))
        .collect();
    upcoming.into_iter().take(count.min(MAX_PREVIEW)).collect()
}

/// The next `count` due minutes strictly after `from`, at most [`MAX_PREVIEW`].
///
/// The search stops at a fixed horizon, so schedules that never match
/// (e.g. 31 February) yield fewer than `count` entries.
pub fn next_cron_fires(
    schedule: &CronSchedule,
    from: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    // Nothing representable follows the last minute of the calendar.
    if from.checked_add_signed(Duration::minutes(1)).is_none() {
        return Vec::new();
    }
    let horizon = from
        .checked_add_signed(Duration::days(PREVIEW_HORIZON_DAYS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    schedule
        .upcoming(from)
        .take_while(|at| *at <= horizon)
        .take(count.min(MAX_PREVIEW))
        .collect()
}
