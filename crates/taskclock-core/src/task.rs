//! Task definitions.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::schedule::ScheduleFields;
use crate::{CoreError, CronSchedule, RunStatus, TaskId, TaskType};

/// Caller-supplied task definition, not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub name: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Absolute timestamps; only used for planned tasks.
    #[serde(default, deserialize_with = "deserialize_plan")]
    pub plan: Vec<DateTime<Utc>>,

    /// Cron fields; only used for scheduled tasks.
    #[serde(default)]
    pub schedule: Option<ScheduleFields>,

    #[serde(default)]
    pub system_prompt: String,

    pub prompt: String,

    #[serde(default)]
    pub attachments: Vec<String>,

    #[serde(default)]
    pub dedicated_context: bool,
}

impl TaskDraft {
    /// Start a draft of the given type.
    pub fn new(name: impl Into<String>, task_type: TaskType, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type,
            plan: Vec::new(),
            schedule: None,
            system_prompt: String::new(),
            prompt: prompt.into(),
            attachments: Vec::new(),
            dedicated_context: false,
        }
    }

    /// Builder method to set the plan.
    pub fn with_plan(mut self, plan: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        self.plan = plan.into_iter().collect();
        self
    }

    /// Builder method to set the cron schedule from its five fields.
    pub fn with_schedule(
        mut self,
        minute: &str,
        hour: &str,
        day: &str,
        month: &str,
        weekday: &str,
    ) -> Self {
        self.schedule = Some(ScheduleFields {
            minute: minute.to_string(),
            hour: hour.to_string(),
            day: day.to_string(),
            month: month.to_string(),
            weekday: weekday.to_string(),
        });
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_attachment(mut self, reference: impl Into<String>) -> Self {
        self.attachments.push(reference.into());
        self
    }

    pub fn with_dedicated_context(mut self, dedicated: bool) -> Self {
        self.dedicated_context = dedicated;
        self
    }

    /// Validate the draft and turn it into a stored definition.
    ///
    /// Timing metadata that does not belong to the task type is dropped.
    /// Plans are sorted and de-duplicated.
    pub fn into_spec(self, id: TaskId, created_at: DateTime<Utc>) -> Result<TaskSpec, CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidSpec("name is required".to_string()));
        }

        let (plan, schedule) = match self.task_type {
            TaskType::Adhoc => (Vec::new(), None),
            TaskType::Planned => {
                if self.plan.is_empty() {
                    return Err(CoreError::InvalidSpec(
                        "planned task requires a non-empty plan".to_string(),
                    ));
                }
                let mut plan = self.plan;
                plan.sort();
                plan.dedup();
                (plan, None)
            }
            TaskType::Scheduled => {
                let fields = self.schedule.ok_or_else(|| {
                    CoreError::InvalidSpec("scheduled task requires a schedule".to_string())
                })?;
                (Vec::new(), Some(CronSchedule::try_from(fields)?))
            }
        };

        Ok(TaskSpec {
            id,
            name: self.name,
            task_type: self.task_type,
            plan,
            schedule,
            system_prompt: self.system_prompt,
            prompt: self.prompt,
            attachments: self.attachments,
            dedicated_context: self.dedicated_context,
            created_at,
        })
    }
}

/// Parse a plan timestamp: RFC 3339, or a bare local date-time read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| CoreError::InvalidSpec(format!("invalid timestamp '{raw}'")))
}

fn deserialize_plan<'de, D>(deserializer: D) -> Result<Vec<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    raw.iter()
        .map(|entry| parse_timestamp(entry).map_err(serde::de::Error::custom))
        .collect()
}

/// A stored task definition. Immutable until edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub name: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    pub plan: Vec<DateTime<Utc>>,
    pub schedule: Option<CronSchedule>,
    pub system_prompt: String,
    pub prompt: String,
    pub attachments: Vec<String>,
    pub dedicated_context: bool,
    pub created_at: DateTime<Utc>,
}

impl TaskSpec {
    /// Returns true if the scheduler loop should evaluate this task.
    pub fn is_time_driven(&self) -> bool {
        matches!(self.task_type, TaskType::Planned | TaskType::Scheduled)
    }
}

/// Listing view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    pub dedicated_context: bool,
    pub created_at: DateTime<Utc>,

    /// Status of the most recent run, if any.
    pub last_status: Option<RunStatus>,

    pub run_count: u64,
}
