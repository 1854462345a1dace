//! Event publisher for the `task.update` topic.
//!
//! Fan-out goes through a broadcast channel so publishers never wait on
//! subscribers. A subscriber that falls behind loses the oldest events and
//! should re-read state from the store.

use tokio::sync::broadcast;
use tracing::trace;

use taskclock_core::{TaskUpdate, TASK_UPDATE_TOPIC};

/// Best-effort publisher of task lifecycle events.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<TaskUpdate>,
}

impl EventPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every currently connected subscriber.
    pub fn publish(&self, update: TaskUpdate) {
        match self.tx.send(update) {
            Ok(receivers) => {
                trace!(topic = TASK_UPDATE_TOPIC, receivers, "Event published");
            }
            Err(_) => {
                trace!(topic = TASK_UPDATE_TOPIC, "Event dropped, no subscribers");
            }
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskUpdate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
