//! TaskClock CLI - Command line interface for the TaskClock control plane.

mod client;
mod error;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use taskclock_core::{parse_timestamp, RunId, TaskDraft, TaskId, TaskRun, TaskType, TaskUpdate};

use client::ApiClient;
use error::ClientError;

/// TaskClock CLI - Task scheduler management tool
#[derive(Parser)]
#[command(name = "taskclock")]
#[command(about = "CLI for the TaskClock control plane", long_about = None)]
struct Cli {
    /// Server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:7070")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new task
    #[command(name = "create-task")]
    CreateTask(TaskArgs),

    /// Replace a task's definition
    #[command(name = "update-task")]
    UpdateTask {
        /// Task ID
        id: String,

        #[command(flatten)]
        task: TaskArgs,
    },

    /// Delete a task and its history
    #[command(name = "delete-task")]
    DeleteTask {
        /// Task ID
        id: String,
    },

    /// List all tasks
    #[command(name = "list-tasks")]
    ListTasks,

    /// Show a task with its run history
    #[command(name = "get-task")]
    GetTask {
        /// Task ID
        id: String,
    },

    /// Run a task now
    #[command(name = "run-now")]
    RunNow {
        /// Task ID
        id: String,
    },

    /// Show upcoming fire times of a task
    #[command(name = "next")]
    Next {
        /// Task ID
        id: String,

        /// Number of fire times
        #[arg(short, long, default_value = "5")]
        count: usize,

        /// Start of the preview (RFC 3339), defaults to now
        #[arg(long)]
        from: Option<DateTime<Utc>>,
    },

    /// Show a single run
    #[command(name = "get-run")]
    GetRun {
        /// Run ID
        id: String,
    },

    /// Cancel a pending or running manual run
    #[command(name = "cancel-run")]
    CancelRun {
        /// Run ID
        id: String,
    },

    /// Follow task.update events
    #[command(name = "watch")]
    Watch {
        /// Only show events of this task
        #[arg(long)]
        task_id: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Adhoc,
    Planned,
    Scheduled,
}

impl From<Kind> for TaskType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Adhoc => TaskType::Adhoc,
            Kind::Planned => TaskType::Planned,
            Kind::Scheduled => TaskType::Scheduled,
        }
    }
}

/// Task definition flags shared by create and update.
#[derive(Args)]
struct TaskArgs {
    /// Task name
    #[arg(short, long)]
    name: String,

    /// Task type
    #[arg(short = 't', long = "type", value_enum)]
    kind: Kind,

    /// Instructions for the agent
    #[arg(short, long)]
    prompt: String,

    /// System prompt
    #[arg(long, default_value = "")]
    system_prompt: String,

    /// Planned fire time (RFC 3339, or UTC without offset), repeatable
    #[arg(long = "at", value_parser = parse_at)]
    plan: Vec<DateTime<Utc>>,

    /// Cron schedule: "minute hour day month weekday"
    #[arg(long)]
    cron: Option<String>,

    /// Attachment reference, repeatable
    #[arg(long = "attachment")]
    attachments: Vec<String>,

    /// Give every run its own execution context
    #[arg(long)]
    dedicated_context: bool,
}

fn parse_at(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(raw).map_err(|e| e.to_string())
}

impl TaskArgs {
    fn into_draft(self) -> Result<TaskDraft, ClientError> {
        let mut draft = TaskDraft::new(self.name, self.kind.into(), self.prompt)
            .with_system_prompt(self.system_prompt)
            .with_plan(self.plan)
            .with_dedicated_context(self.dedicated_context);
        for attachment in self.attachments {
            draft = draft.with_attachment(attachment);
        }

        if let Some(cron) = self.cron {
            let fields: Vec<&str> = cron.split_whitespace().collect();
            let [minute, hour, day, month, weekday] = fields.as_slice() else {
                return Err(ClientError::InvalidArgument(format!(
                    "cron needs 5 fields, got {}: '{cron}'",
                    fields.len()
                )));
            };
            draft = draft.with_schedule(minute, hour, day, month, weekday);
        }
        Ok(draft)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.addr);

    match cli.command {
        Commands::CreateTask(task) => {
            let task_id = client.create_task(&task.into_draft()?).await?;
            println!("Task created: {task_id}");
        }
        Commands::UpdateTask { id, task } => {
            let spec = client
                .update_task(&TaskId::new(id), &task.into_draft()?)
                .await?;
            println!("Task updated: {} ({})", spec.id, spec.task_type);
        }
        Commands::DeleteTask { id } => {
            client.delete_task(&TaskId::new(id.clone())).await?;
            println!("Task deleted: {id}");
        }
        Commands::ListTasks => {
            list_tasks(&client).await?;
        }
        Commands::GetTask { id } => {
            get_task(&client, TaskId::new(id)).await?;
        }
        Commands::RunNow { id } => {
            let run_id = client.run_now(&TaskId::new(id)).await?;
            println!("Run started: {run_id}");
        }
        Commands::Next { id, count, from } => {
            let times = client
                .next_fire_times(&TaskId::new(id), from, count)
                .await?;
            if times.is_empty() {
                println!("No upcoming fire times");
            }
            for at in times {
                println!("{}", at.to_rfc3339());
            }
        }
        Commands::GetRun { id } => {
            let run = client.get_run(&RunId::new(id)).await?;
            print_run(&run);
        }
        Commands::CancelRun { id } => {
            let run = client.cancel_run(&RunId::new(id)).await?;
            println!("Run cancelled:");
            print_run(&run);
        }
        Commands::Watch { task_id } => {
            let task_id = task_id.map(TaskId::new);
            client.watch(task_id.as_ref(), print_update).await?;
        }
    }

    Ok(())
}

async fn list_tasks(client: &ApiClient) -> Result<(), ClientError> {
    let tasks = client.list_tasks().await?;

    println!("Tasks ({}):", tasks.len());
    println!(
        "{:<36}  {:<10}  {:<10}  {:>5}  {}",
        "ID", "TYPE", "LAST", "RUNS", "NAME"
    );
    println!("{}", "-".repeat(80));

    for task in tasks {
        let last = task
            .last_status
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        println!(
            "{:<36}  {:<10}  {:<10}  {:>5}  {}",
            task.id, task.task_type, last, task.run_count, task.name
        );
    }
    Ok(())
}

async fn get_task(client: &ApiClient, id: TaskId) -> Result<(), ClientError> {
    let detail = client.get_task(&id).await?;
    let task = &detail.task;

    println!("  ID:         {}", task.id);
    println!("  Name:       {}", task.name);
    println!("  Type:       {}", task.task_type);
    if let Some(schedule) = &task.schedule {
        println!("  Schedule:   {schedule}");
    }
    for at in &task.plan {
        let mark = if detail.consumed_plan.contains(at) { "x" } else { " " };
        println!("  Plan:       [{mark}] {}", at.to_rfc3339());
    }
    println!("  Dedicated:  {}", task.dedicated_context);
    println!("  Created:    {}", task.created_at.to_rfc3339());

    if !detail.runs.is_empty() {
        println!("  Runs:");
        for run in &detail.runs {
            println!(
                "    #{:<4} {}  {:<10} {:<7} {}",
                run.sequence_number,
                run.id,
                run.status,
                run.trigger_kind,
                run.created_at.to_rfc3339()
            );
        }
    }
    if !detail.missed_fires.is_empty() {
        println!("  Missed:");
        for marker in &detail.missed_fires {
            println!("    {}  {}", marker.due_at.to_rfc3339(), marker.trigger_kind);
        }
    }
    Ok(())
}

fn print_run(run: &TaskRun) {
    println!("  ID:         {}", run.id);
    println!("  Task:       {}", run.task_id);
    println!("  Sequence:   {}", run.sequence_number);
    println!("  Trigger:    {}", run.trigger_kind);
    println!("  Status:     {}", run.status);
    if let Some(at) = run.scheduled_for {
        println!("  Due:        {}", at.to_rfc3339());
    }
    if let Some(at) = run.started_at {
        println!("  Started:    {}", at.to_rfc3339());
    }
    if let Some(at) = run.finished_at {
        println!("  Finished:   {}", at.to_rfc3339());
    }
    if let Some(result) = &run.result {
        println!("  Result:     {result}");
    }
    if let Some(error) = &run.error {
        println!("  Error:      {error}");
    }
}

fn print_update(update: TaskUpdate) {
    match update {
        TaskUpdate::RunStatus {
            task_id,
            run_id,
            status,
            trigger,
            timestamp,
        } => {
            println!(
                "{}  {task_id}  {run_id}  {trigger:<7} {status}",
                timestamp.to_rfc3339()
            );
        }
        TaskUpdate::MissedFire {
            task_id,
            due_at,
            timestamp,
        } => {
            println!(
                "{}  {task_id}  missed fire due {}",
                timestamp.to_rfc3339(),
                due_at.to_rfc3339()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("taskclock").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_create_scheduled_task_args() {
        let cli = parse(&[
            "create-task",
            "--name",
            "digest",
            "--type",
            "scheduled",
            "--prompt",
            "summarize",
            "--cron",
            "0 18 * * 1",
        ]);
        let Commands::CreateTask(task) = cli.command else {
            panic!("expected create-task");
        };
        let draft = task.into_draft().unwrap();
        assert_eq!(draft.task_type, TaskType::Scheduled);
        let schedule = draft.schedule.unwrap();
        assert_eq!((schedule.hour.as_str(), schedule.weekday.as_str()), ("18", "1"));
    }

    #[test]
    fn test_planned_task_collects_timestamps() {
        let cli = parse(&[
            "create-task",
            "-n",
            "reminder",
            "-t",
            "planned",
            "-p",
            "remind me",
            "--at",
            "2025-08-10T18:00:00Z",
            "--at",
            "2025-09-01T08:00:00",
        ]);
        let Commands::CreateTask(task) = cli.command else {
            panic!("expected create-task");
        };
        assert_eq!(task.into_draft().unwrap().plan.len(), 2);
    }

    #[test]
    fn test_short_cron_is_rejected() {
        let cli = parse(&[
            "create-task", "-n", "x", "-t", "scheduled", "-p", "y", "--cron", "0 18 *",
        ]);
        let Commands::CreateTask(task) = cli.command else {
            panic!("expected create-task");
        };
        assert!(matches!(
            task.into_draft(),
            Err(ClientError::InvalidArgument(_))
        ));
    }
}
