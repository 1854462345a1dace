//! Execution backend adapters.
//!
//! [`HttpBackend`] forwards each run to an external agent service;
//! [`EchoBackend`] answers locally and is used when no service is configured.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use taskclock_scheduler::{BackendError, ExecutionBackend, ExecutionRequest};

/// Body expected back from the agent service.
#[derive(Debug, Deserialize)]
struct ExecutionResponse {
    result: String,
}

/// Posts the execution request as JSON and reads `{ "result": "..." }` back.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpBackend {
    /// Create a backend posting to `url`. Requests are abandoned after
    /// `request_timeout`.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn call(&self, request: &ExecutionRequest) -> Result<String, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Failed(format!("HTTP {status}: {body}")));
        }

        let body: ExecutionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Failed(format!("invalid backend response: {e}")))?;
        Ok(body.result)
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<String, BackendError> {
        debug!(
            run_id = %request.run_id,
            context = %request.context.key(),
            url = %self.url,
            "Posting run to execution backend"
        );
        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Aborted),
            result = self.call(&request) => result,
        }
    }
}

/// Returns the prompt as the result, optionally after a delay.
#[derive(Debug, Default, Clone)]
pub struct EchoBackend {
    delay: Duration,
}

impl EchoBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ExecutionBackend for EchoBackend {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<String, BackendError> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::Aborted),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        Ok(request.prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use chrono::Utc;
    use taskclock_core::{RunId, TaskDraft, TaskId, TaskType};
    use tokio::net::TcpListener;

    fn request(prompt: &str) -> ExecutionRequest {
        let task = TaskDraft::new("t", TaskType::Adhoc, prompt)
            .into_spec(TaskId::new("t1"), Utc::now())
            .unwrap();
        ExecutionRequest::for_run(&task, &RunId::new("r1"))
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/execute")
    }

    #[tokio::test]
    async fn test_http_backend_returns_result() {
        let router = Router::new().route(
            "/execute",
            post(|Json(req): Json<serde_json::Value>| async move {
                let prompt = req["prompt"].as_str().unwrap_or_default().to_uppercase();
                let context = req["context"]["scope"].as_str().unwrap_or_default().to_string();
                Json(serde_json::json!({ "result": format!("{prompt} ({context})") }))
            }),
        );
        let url = serve(router).await;

        let backend = HttpBackend::new(url, Duration::from_secs(5)).unwrap();
        let result = backend
            .execute(request("hello"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "HELLO (shared)");
    }

    #[tokio::test]
    async fn test_http_backend_maps_error_status() {
        let router = Router::new().route(
            "/execute",
            post(|| async { (StatusCode::BAD_GATEWAY, "model offline") }),
        );
        let url = serve(router).await;

        let backend = HttpBackend::new(url, Duration::from_secs(5)).unwrap();
        let err = backend
            .execute(request("hello"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Failed(ref msg) if msg.contains("model offline")));
    }

    #[tokio::test]
    async fn test_echo_backend_honours_cancel() {
        let backend = EchoBackend::with_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = backend.execute(request("x"), cancel).await.unwrap_err();
        assert!(matches!(err, BackendError::Aborted));

        let result = EchoBackend::default()
            .execute(request("ping"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "ping");
    }
}
