//! Five-field cron schedules.
//!
//! Each field is either `*` or a comma-separated set of integers inside the
//! field's domain. Ranges and steps are not part of the syntax.
//!
//! A minute is due only when all five fields match, including day-of-month
//! *and* weekday together. Weekday `0` is Sunday.
//!
//! Fields are validated here against the restricted grammar, then compiled
//! into a [`cron::Schedule`] which does the calendar arithmetic.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::trigger::truncate_to_minute;
use crate::CoreError;

const MINUTE: RangeInclusive<u32> = 0..=59;
const HOUR: RangeInclusive<u32> = 0..=23;
const DAY: RangeInclusive<u32> = 1..=31;
const MONTH: RangeInclusive<u32> = 1..=12;
const WEEKDAY: RangeInclusive<u32> = 0..=6;

/// `cron` numbers weekdays 1-7; names avoid the off-by-one.
const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// One parsed cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    /// `*` - matches every value.
    Any,
    /// Explicit set of accepted values.
    Values(BTreeSet<u32>),
}

impl CronField {
    /// Parse a field and check every value lies in `domain`.
    pub fn parse(
        field: &'static str,
        raw: &str,
        domain: RangeInclusive<u32>,
    ) -> Result<Self, CoreError> {
        let invalid = |reason: String| CoreError::InvalidCronField {
            field,
            value: raw.to_string(),
            reason,
        };

        let trimmed = raw.trim();
        if trimmed == "*" {
            return Ok(Self::Any);
        }
        if trimmed.is_empty() {
            return Err(invalid("empty field".to_string()));
        }

        let mut values = BTreeSet::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            let value: u32 = part
                .parse()
                .map_err(|_| invalid(format!("'{part}' is not a non-negative integer")))?;
            if !domain.contains(&value) {
                return Err(invalid(format!(
                    "{value} outside {}-{}",
                    domain.start(),
                    domain.end()
                )));
            }
            values.insert(value);
        }
        Ok(Self::Values(values))
    }

    /// Returns true if `value` is accepted by this field.
    pub fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Values(values) => values.contains(&value),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Render the field in `cron` crate syntax, mapping each value through `label`.
    fn to_cron(&self, label: impl Fn(u32) -> String) -> String {
        match self {
            Self::Any => "*".to_string(),
            Self::Values(values) => values
                .iter()
                .map(|v| label(*v))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Values(values) => {
                let joined: Vec<String> = values.iter().map(u32::to_string).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

/// Unvalidated schedule fields as they arrive from callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleFields {
    #[serde(default = "wildcard")]
    pub minute: String,
    #[serde(default = "wildcard")]
    pub hour: String,
    #[serde(default = "wildcard")]
    pub day: String,
    #[serde(default = "wildcard")]
    pub month: String,
    #[serde(default = "wildcard")]
    pub weekday: String,
}

fn wildcard() -> String {
    "*".to_string()
}

/// A validated cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ScheduleFields", into = "ScheduleFields")]
pub struct CronSchedule {
    pub minute: CronField,
    pub hour: CronField,
    pub day: CronField,
    pub month: CronField,
    pub weekday: CronField,
    compiled: Schedule,
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.minute == other.minute
            && self.hour == other.hour
            && self.day == other.day
            && self.month == other.month
            && self.weekday == other.weekday
    }
}

impl Eq for CronSchedule {}

impl CronSchedule {
    /// Parse the five fields, in crontab order.
    pub fn parse(
        minute: &str,
        hour: &str,
        day: &str,
        month: &str,
        weekday: &str,
    ) -> Result<Self, CoreError> {
        let minute = CronField::parse("minute", minute, MINUTE)?;
        let hour = CronField::parse("hour", hour, HOUR)?;
        let day = CronField::parse("day", day, DAY)?;
        let month = CronField::parse("month", month, MONTH)?;
        let weekday = CronField::parse("weekday", weekday, WEEKDAY)?;

        // Seconds pinned to zero: one fire per matching minute.
        let expression = format!(
            "0 {} {} {} {} {}",
            minute.to_cron(|v| v.to_string()),
            hour.to_cron(|v| v.to_string()),
            day.to_cron(|v| v.to_string()),
            month.to_cron(|v| v.to_string()),
            weekday.to_cron(|v| WEEKDAY_NAMES[v as usize].to_string()),
        );
        let compiled = Schedule::from_str(&expression)
            .map_err(|e| CoreError::InvalidSpec(format!("cron '{expression}': {e}")))?;

        Ok(Self {
            minute,
            hour,
            day,
            month,
            weekday,
            compiled,
        })
    }

    /// Returns true if the minute containing `instant` is due.
    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        self.compiled.includes(truncate_to_minute(instant))
    }

    /// Due minutes strictly after `from`, in order.
    pub fn upcoming(&self, from: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.compiled.after(&from)
    }
}

impl TryFrom<ScheduleFields> for CronSchedule {
    type Error = CoreError;

    fn try_from(fields: ScheduleFields) -> Result<Self, Self::Error> {
        Self::parse(
            &fields.minute,
            &fields.hour,
            &fields.day,
            &fields.month,
            &fields.weekday,
        )
    }
}

impl From<CronSchedule> for ScheduleFields {
    fn from(schedule: CronSchedule) -> Self {
        Self {
            minute: schedule.minute.to_string(),
            hour: schedule.hour.to_string(),
            day: schedule.day.to_string(),
            month: schedule.month.to_string(),
            weekday: schedule.weekday.to_string(),
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CoreError;

    /// Parse a crontab-style line: `minute hour day month weekday`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        match parts.as_slice() {
            [minute, hour, day, month, weekday] => {
                Self::parse(minute, hour, day, month, weekday)
            }
            _ => Err(CoreError::InvalidSpec(format!(
                "cron expression '{s}' must have 5 fields, got {}",
                parts.len()
            ))),
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, self.weekday
        )
    }
}
