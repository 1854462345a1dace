//! Collaborator interfaces: the execution backend that performs a run and
//! the memory sink that archives successful results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use taskclock_core::{RunId, TaskId, TaskSpec};

/// Errors raised by collaborators.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("execution failed: {0}")]
    Failed(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("execution aborted")]
    Aborted,
}

/// Which conversation state a run executes in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum ContextHandle {
    /// One cumulative context shared by every run of the task.
    Shared(TaskId),
    /// A fresh context owned by a single run.
    Dedicated(RunId),
}

impl ContextHandle {
    /// Pick the context for a run of `task`.
    pub fn for_run(task: &TaskSpec, run_id: &RunId) -> Self {
        if task.dedicated_context {
            Self::Dedicated(run_id.clone())
        } else {
            Self::Shared(task.id.clone())
        }
    }

    /// Stable key a backend can use to look up the context.
    pub fn key(&self) -> String {
        match self {
            Self::Shared(task_id) => format!("task:{task_id}"),
            Self::Dedicated(run_id) => format!("run:{run_id}"),
        }
    }
}

/// Everything the backend needs to perform one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub task_name: String,
    pub system_prompt: String,
    pub prompt: String,
    pub attachments: Vec<String>,
    pub context: ContextHandle,
}

impl ExecutionRequest {
    pub fn for_run(task: &TaskSpec, run_id: &RunId) -> Self {
        Self {
            task_id: task.id.clone(),
            run_id: run_id.clone(),
            task_name: task.name.clone(),
            system_prompt: task.system_prompt.clone(),
            prompt: task.prompt.clone(),
            attachments: task.attachments.clone(),
            context: ContextHandle::for_run(task, run_id),
        }
    }
}

/// Performs a task's instructions.
///
/// Implementations should watch `cancel` and return early when it fires;
/// a result returned after cancellation is discarded.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<String, BackendError>;
}

/// A successful result offered to long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub task_name: String,
    pub prompt: String,
    pub result: String,
    pub finished_at: DateTime<Utc>,
}

/// Write-only archive for solutions.
#[async_trait]
pub trait SolutionSink: Send + Sync {
    async fn archive(&self, solution: Solution) -> Result<(), BackendError>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl SolutionSink for NoopSink {
    async fn archive(&self, _solution: Solution) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskclock_core::{TaskDraft, TaskType};

    #[test]
    fn test_context_follows_dedicated_flag() {
        let shared = TaskDraft::new("s", TaskType::Adhoc, "p")
            .into_spec(TaskId::new("t1"), Utc::now())
            .unwrap();
        let dedicated = TaskDraft::new("d", TaskType::Adhoc, "p")
            .with_dedicated_context(true)
            .into_spec(TaskId::new("t2"), Utc::now())
            .unwrap();
        let run = RunId::new("r9");

        assert_eq!(ContextHandle::for_run(&shared, &run).key(), "task:t1");
        assert_eq!(ContextHandle::for_run(&dedicated, &run).key(), "run:r9");
    }
}
