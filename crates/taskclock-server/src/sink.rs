//! Solution archive that appends JSON lines to a file.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use taskclock_scheduler::{BackendError, Solution, SolutionSink};

pub struct JsonlSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SolutionSink for JsonlSink {
    async fn archive(&self, solution: Solution) -> Result<(), BackendError> {
        let mut line = serde_json::to_vec(&solution)
            .map_err(|e| BackendError::Failed(format!("encode solution: {e}")))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        debug!(run_id = %solution.run_id, path = %self.path.display(), "Solution archived");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskclock_core::{RunId, TaskId};

    fn solution(run: &str) -> Solution {
        Solution {
            task_id: TaskId::new("t1"),
            run_id: RunId::new(run),
            task_name: "digest".to_string(),
            prompt: "summarize".to_string(),
            result: "all quiet".to_string(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_appends_one_line_per_solution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solutions.jsonl");
        let sink = JsonlSink::new(&path);

        sink.archive(solution("r1")).await.unwrap();
        sink.archive(solution("r2")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let runs: Vec<String> = contents
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["run_id"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(runs, vec!["r1", "r2"]);
    }
}
