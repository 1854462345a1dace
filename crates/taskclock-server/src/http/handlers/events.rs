//! `task.update` event stream over Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use taskclock_core::{TaskId, TaskUpdate, TASK_UPDATE_TOPIC};

use crate::http::responses::EventsQuery;
use crate::state::AppState;

/// `GET /v1/events?task_id=<id>`
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before returning so nothing published after the request is lost.
    let receiver = state.scheduler.subscribe();
    debug!(task_filter = ?query.task_id, "Event subscriber connected");
    Sse::new(update_stream(receiver, query.task_id, state.shutdown.clone()))
        .keep_alive(KeepAlive::default())
}

/// Turn a broadcast receiver into an SSE stream.
///
/// Ends when the publisher goes away or `shutdown` fires. A lagging
/// subscriber gets a comment with the number of dropped events.
fn update_stream(
    receiver: broadcast::Receiver<TaskUpdate>,
    task_filter: Option<TaskId>,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    stream::unfold(
        (receiver, task_filter, shutdown),
        |(mut receiver, task_filter, shutdown)| async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    next = receiver.recv() => next,
                };
                match next {
                    Ok(update) => {
                        if task_filter
                            .as_ref()
                            .is_some_and(|id| update.task_id() != id)
                        {
                            continue;
                        }
                        let event = to_sse(&update);
                        return Some((Ok(event), (receiver, task_filter, shutdown)));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event subscriber lagged, skipping events");
                        let event = Event::default().comment(format!("skipped {n} events"));
                        return Some((Ok(event), (receiver, task_filter, shutdown)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    )
}

fn to_sse(update: &TaskUpdate) -> Event {
    Event::default()
        .event(TASK_UPDATE_TOPIC)
        .json_data(update)
        .unwrap_or_else(|e| Event::default().comment(format!("unserializable event: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures_util::StreamExt;

    fn missed(task: &str) -> TaskUpdate {
        TaskUpdate::MissedFire {
            task_id: TaskId::new(task),
            due_at: Utc::now(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_stream_filters_by_task_and_ends_on_close() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(missed("a")).unwrap();
        tx.send(missed("b")).unwrap();
        tx.send(missed("a")).unwrap();
        drop(tx);

        let events: Vec<_> = update_stream(rx, Some(TaskId::new("a")), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_lag_is_reported_not_fatal() {
        let (tx, rx) = broadcast::channel(2);
        for _ in 0..5 {
            tx.send(missed("a")).unwrap();
        }
        drop(tx);

        // One lag notice plus the two retained events.
        let events: Vec<_> = update_stream(rx, None, CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let (tx, rx) = broadcast::channel::<TaskUpdate>(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let events: Vec<_> = update_stream(rx, None, shutdown).collect().await;
        assert!(events.is_empty());
        drop(tx);
    }
}
