//! Per-task run leases.
//!
//! A task may have at most one lease. Once its run starts executing, a
//! lease carries an expiry so that a run whose worker disappeared can be
//! reclaimed by the watchdog instead of blocking its task forever. Time spent
//! queued behind a busy pool does not count against it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use taskclock_core::{RunId, TaskId};

/// Exclusive right of one run to execute its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub granted_at: DateTime<Utc>,

    /// Unset while the run is queued.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Lease table keyed by task.
pub struct LeaseManager {
    leases: Mutex<HashMap<TaskId, Lease>>,
    ttl: chrono::Duration,
}

impl LeaseManager {
    /// Create a lease manager whose leases live for `ttl` after each renewal.
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Grant a lease for `task_id` to `run_id` if none is held.
    ///
    /// On contention returns the lease currently held.
    pub async fn try_acquire(
        &self,
        task_id: &TaskId,
        run_id: &RunId,
        now: DateTime<Utc>,
    ) -> Result<Lease, Lease> {
        let mut leases = self.leases.lock().await;
        if let Some(held) = leases.get(task_id) {
            return Err(held.clone());
        }

        let lease = Lease {
            task_id: task_id.clone(),
            run_id: run_id.clone(),
            granted_at: now,
            expires_at: None,
        };
        leases.insert(task_id.clone(), lease.clone());
        debug!(task_id = %task_id, run_id = %run_id, "Lease granted");
        Ok(lease)
    }

    /// Start (or push out) the expiry of a held lease to `now + ttl`.
    ///
    /// Returns false if `run_id` does not hold the task's lease.
    pub async fn renew(&self, task_id: &TaskId, run_id: &RunId, now: DateTime<Utc>) -> bool {
        let mut leases = self.leases.lock().await;
        match leases.get_mut(task_id) {
            Some(lease) if &lease.run_id == run_id => {
                lease.expires_at = Some(self.expiry_from(now));
                true
            }
            _ => false,
        }
    }

    /// Release the task's lease if it is held by `run_id`.
    ///
    /// Returns true if a lease was removed.
    pub async fn release(&self, task_id: &TaskId, run_id: &RunId) -> bool {
        let mut leases = self.leases.lock().await;
        match leases.get(task_id) {
            Some(lease) if &lease.run_id == run_id => {
                leases.remove(task_id);
                debug!(task_id = %task_id, run_id = %run_id, "Lease released");
                true
            }
            _ => false,
        }
    }

    /// Release whichever task's lease `run_id` holds.
    pub async fn release_run(&self, run_id: &RunId) -> bool {
        let mut leases = self.leases.lock().await;
        let Some(task_id) = leases
            .values()
            .find(|lease| &lease.run_id == run_id)
            .map(|lease| lease.task_id.clone())
        else {
            return false;
        };
        leases.remove(&task_id);
        debug!(task_id = %task_id, run_id = %run_id, "Lease released");
        true
    }

    /// Current lease for a task.
    pub async fn holder(&self, task_id: &TaskId) -> Option<Lease> {
        self.leases.lock().await.get(task_id).cloned()
    }

    /// Every lease that has expired at `now`. Leases stay in place until
    /// their holder releases them.
    pub async fn expired(&self, now: DateTime<Utc>) -> Vec<Lease> {
        self.leases
            .lock()
            .await
            .values()
            .filter(|lease| lease.is_expired(now))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.leases.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.leases.lock().await.is_empty()
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
