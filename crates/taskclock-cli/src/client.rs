//! HTTP client for the control-plane REST API.

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use taskclock_core::{RunId, TaskDraft, TaskId, TaskRun, TaskSpec, TaskSummary, TaskUpdate};
use taskclock_scheduler::TaskDetail;

use crate::error::ClientError;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    task_id: TaskId,
}

#[derive(Debug, Deserialize)]
struct Accepted {
    run_id: RunId,
}

#[derive(Debug, Deserialize)]
struct Preview {
    fire_times: Vec<DateTime<Utc>>,
}

/// Client for the TaskClock HTTP API.
pub struct ApiClient {
    inner: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client for `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if the server is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let response = self.inner.get(self.url("/health")).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn create_task(&self, draft: &TaskDraft) -> Result<TaskId, ClientError> {
        let created: Created = self
            .send(self.inner.post(self.url("/v1/tasks")).json(draft))
            .await?;
        Ok(created.task_id)
    }

    pub async fn update_task(&self, id: &TaskId, draft: &TaskDraft) -> Result<TaskSpec, ClientError> {
        self.send(self.inner.put(self.url(&format!("/v1/tasks/{id}"))).json(draft))
            .await
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<(), ClientError> {
        let response = self
            .inner
            .delete(self.url(&format!("/v1/tasks/{id}")))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskSummary>, ClientError> {
        self.send(self.inner.get(self.url("/v1/tasks"))).await
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<TaskDetail, ClientError> {
        self.send(self.inner.get(self.url(&format!("/v1/tasks/{id}"))))
            .await
    }

    pub async fn run_now(&self, id: &TaskId) -> Result<RunId, ClientError> {
        let accepted: Accepted = self
            .send(self.inner.post(self.url(&format!("/v1/tasks/{id}/run"))))
            .await?;
        Ok(accepted.run_id)
    }

    pub async fn next_fire_times(
        &self,
        id: &TaskId,
        from: Option<DateTime<Utc>>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, ClientError> {
        let mut query = vec![("count", count.to_string())];
        if let Some(from) = from {
            query.push(("from", from.to_rfc3339()));
        }
        let preview: Preview = self
            .send(
                self.inner
                    .get(self.url(&format!("/v1/tasks/{id}/next")))
                    .query(&query),
            )
            .await?;
        Ok(preview.fire_times)
    }

    pub async fn get_run(&self, id: &RunId) -> Result<TaskRun, ClientError> {
        self.send(self.inner.get(self.url(&format!("/v1/runs/{id}"))))
            .await
    }

    pub async fn cancel_run(&self, id: &RunId) -> Result<TaskRun, ClientError> {
        self.send(self.inner.post(self.url(&format!("/v1/runs/{id}/cancel"))))
            .await
    }

    /// Follow the event stream, calling `on_update` for every event until
    /// the server closes the connection.
    pub async fn watch<F>(&self, task_id: Option<&TaskId>, mut on_update: F) -> Result<(), ClientError>
    where
        F: FnMut(TaskUpdate),
    {
        let mut request = self.inner.get(self.url("/v1/events"));
        if let Some(task_id) = task_id {
            request = request.query(&[("task_id", task_id.as_str())]);
        }
        let mut response = check(request.send().await?).await?;

        let mut decoder = SseDecoder::default();
        while let Some(chunk) = response.chunk().await? {
            for update in decoder.push(&chunk) {
                on_update(update);
            }
        }
        Ok(())
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = check(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

/// Turn non-success responses into errors carrying the server's message.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    debug!(status = %status, url = %url, message = %message, "Request failed");

    if status == StatusCode::NOT_FOUND {
        Err(ClientError::NotFound(message))
    } else {
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Incremental decoder for `task.update` Server-Sent Events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk of the response body; returns the events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<TaskUpdate> {
        self.buffer.extend_from_slice(chunk);

        let mut updates = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // Comments (keep-alives, lag notices) and event names are skipped.
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            match serde_json::from_str::<TaskUpdate>(data.trim_start()) {
                Ok(update) => updates.push(update),
                Err(e) => warn!(error = %e, "Ignoring malformed event"),
            }
        }
        updates
    }
}
