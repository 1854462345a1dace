//! Task store: definitions, run history, consumed plan entries and
//! missed-fire markers.
//!
//! State lives in memory behind a single `RwLock`, so every read-modify-write
//! on a run is atomic. When opened with a snapshot path, each mutation also
//! rewrites a JSON snapshot (temp file + rename) so history and consumed plan
//! entries survive restarts.
//!
//! Finished runs and missed-fire markers are pruned per task on write,
//! oldest first, according to [`Retention`].

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use taskclock_core::{
    MissedFire, RunId, RunTransition, TaskId, TaskRun, TaskSpec, TaskSummary, TriggerKind,
};

use crate::error::StoreError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    tasks: HashMap<TaskId, TaskSpec>,
    runs: HashMap<RunId, TaskRun>,

    /// Run ids per task in creation order.
    history: HashMap<TaskId, Vec<RunId>>,

    /// Last sequence number handed out per task.
    sequences: HashMap<TaskId, u64>,

    consumed_plan: HashMap<TaskId, BTreeSet<DateTime<Utc>>>,
    missed_fires: HashMap<TaskId, Vec<MissedFire>>,
}

impl StoreState {
    fn runs_for(&self, task_id: &TaskId) -> impl Iterator<Item = &TaskRun> {
        self.history
            .get(task_id)
            .into_iter()
            .flatten()
            .filter_map(|run_id| self.runs.get(run_id))
    }

    fn active_run_of(&self, task_id: &TaskId) -> Option<&TaskRun> {
        self.runs_for(task_id).find(|run| run.status.is_active())
    }

    /// Drop the oldest finished runs of a task beyond `keep`.
    fn prune_runs(&mut self, task_id: &TaskId, keep: usize) {
        let Some(history) = self.history.get_mut(task_id) else {
            return;
        };
        let mut excess = history.len().saturating_sub(keep);
        if excess == 0 {
            return;
        }

        let runs = &mut self.runs;
        history.retain(|run_id| {
            let finished = runs.get(run_id).map_or(true, TaskRun::is_terminal);
            if excess > 0 && finished {
                excess -= 1;
                runs.remove(run_id);
                false
            } else {
                true
            }
        });
    }
}

/// How much finished history the store keeps per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    /// Runs kept per task; active runs are never pruned.
    pub runs_per_task: usize,

    /// Missed-fire markers kept per task.
    pub missed_fires_per_task: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            runs_per_task: 1000,
            missed_fires_per_task: 200,
        }
    }
}

/// Durable store for task definitions and their run history.
pub struct TaskStore {
    state: RwLock<StoreState>,
    snapshot_path: Option<PathBuf>,
    retention: Retention,
}

impl TaskStore {
    /// Create a store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            snapshot_path: None,
            retention: Retention::default(),
        }
    }

    /// Builder method to set how much history is kept.
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = Retention {
            runs_per_task: retention.runs_per_task.max(1),
            missed_fires_per_task: retention.missed_fires_per_task,
        };
        self
    }

    /// Open a store backed by a JSON snapshot, loading it if it exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state: StoreState = serde_json::from_slice(&bytes)?;
                info!(
                    path = %path.display(),
                    tasks = state.tasks.len(),
                    runs = state.runs.len(),
                    "Loaded task store snapshot"
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting empty");
                StoreState::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
            retention: Retention::default(),
        })
    }

    // ---- task definitions ------------------------------------------------

    /// Insert a new task definition.
    pub async fn insert_task(&self, spec: TaskSpec) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&spec.id) {
            return Err(StoreError::DuplicateTask(spec.id));
        }
        state.history.entry(spec.id.clone()).or_default();
        state.tasks.insert(spec.id.clone(), spec);
        self.flush(&state).await;
        Ok(())
    }

    /// Replace an existing definition, returning the previous one.
    ///
    /// Consumed plan entries that no longer appear in the plan are dropped.
    pub async fn replace_task(&self, spec: TaskSpec) -> Result<TaskSpec, StoreError> {
        let mut state = self.state.write().await;
        let previous = state
            .tasks
            .insert(spec.id.clone(), spec.clone())
            .ok_or_else(|| StoreError::TaskNotFound(spec.id.clone()))?;

        if let Some(consumed) = state.consumed_plan.get_mut(&spec.id) {
            consumed.retain(|at| spec.plan.contains(at));
        }
        self.flush(&state).await;
        Ok(previous)
    }

    /// Remove a task together with its history.
    ///
    /// Refused while the task has a pending or running run; the check and
    /// the removal happen under one write lock.
    pub async fn remove_task(&self, task_id: &TaskId) -> Result<TaskSpec, StoreError> {
        let mut state = self.state.write().await;
        if let Some(run) = state.active_run_of(task_id) {
            return Err(StoreError::TaskBusy {
                task_id: task_id.clone(),
                run_id: run.id.clone(),
            });
        }
        let spec = state
            .tasks
            .remove(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.clone()))?;

        for run_id in state.history.remove(task_id).unwrap_or_default() {
            state.runs.remove(&run_id);
        }
        state.sequences.remove(task_id);
        state.consumed_plan.remove(task_id);
        state.missed_fires.remove(task_id);
        self.flush(&state).await;
        Ok(spec)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Option<TaskSpec> {
        self.state.read().await.tasks.get(task_id).cloned()
    }

    /// All task definitions, oldest first.
    pub async fn list_tasks(&self) -> Vec<TaskSpec> {
        let state = self.state.read().await;
        let mut tasks: Vec<TaskSpec> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Summaries of all tasks, oldest first.
    pub async fn summaries(&self) -> Vec<TaskSummary> {
        let state = self.state.read().await;
        let mut summaries: Vec<TaskSummary> = state
            .tasks
            .values()
            .map(|spec| {
                let last = state.runs_for(&spec.id).max_by_key(|run| run.sequence_number);
                TaskSummary {
                    id: spec.id.clone(),
                    name: spec.name.clone(),
                    task_type: spec.task_type,
                    dedicated_context: spec.dedicated_context,
                    created_at: spec.created_at,
                    last_status: last.map(|run| run.status),
                    run_count: state.sequences.get(&spec.id).copied().unwrap_or(0),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Definitions the scheduler loop has to evaluate.
    pub async fn time_driven_tasks(&self) -> Vec<TaskSpec> {
        self.list_tasks()
            .await
            .into_iter()
            .filter(TaskSpec::is_time_driven)
            .collect()
    }

    // ---- runs ------------------------------------------------------------

    /// Record a new pending run and assign its sequence number.
    ///
    /// For plan-triggered runs the plan entry is consumed in the same write,
    /// so a restart can never fire it twice.
    pub async fn create_run(
        &self,
        task_id: &TaskId,
        run_id: RunId,
        trigger_kind: TriggerKind,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<TaskRun, StoreError> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(task_id) {
            return Err(StoreError::TaskNotFound(task_id.clone()));
        }

        let sequence = state.sequences.entry(task_id.clone()).or_insert(0);
        *sequence += 1;
        let run = TaskRun::new(
            run_id.clone(),
            task_id.clone(),
            trigger_kind,
            *sequence,
            scheduled_for,
            now,
        );

        if let (TriggerKind::Plan, Some(at)) = (trigger_kind, scheduled_for) {
            state
                .consumed_plan
                .entry(task_id.clone())
                .or_default()
                .insert(at);
        }
        state
            .history
            .entry(task_id.clone())
            .or_default()
            .push(run_id.clone());
        state.runs.insert(run_id, run.clone());
        state.prune_runs(task_id, self.retention.runs_per_task);
        self.flush(&state).await;
        Ok(run)
    }

    /// Atomically apply a status transition to one run.
    pub async fn transition_run(
        &self,
        run_id: &RunId,
        transition: RunTransition,
        at: DateTime<Utc>,
    ) -> Result<TaskRun, StoreError> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.clone()))?;
        run.apply(transition, at)?;
        let updated = run.clone();
        self.flush(&state).await;
        Ok(updated)
    }

    pub async fn get_run(&self, run_id: &RunId) -> Option<TaskRun> {
        self.state.read().await.runs.get(run_id).cloned()
    }

    /// Run history of a task, newest first.
    pub async fn runs_for_task(&self, task_id: &TaskId) -> Vec<TaskRun> {
        let state = self.state.read().await;
        let mut runs: Vec<TaskRun> = state.runs_for(task_id).cloned().collect();
        runs.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
        runs
    }

    /// Every run that has not reached a terminal state.
    pub async fn active_runs(&self) -> Vec<TaskRun> {
        let state = self.state.read().await;
        let mut runs: Vec<TaskRun> = state
            .runs
            .values()
            .filter(|run| run.status.is_active())
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        runs
    }

    // ---- trigger bookkeeping --------------------------------------------

    pub async fn consumed_plan_entries(&self, task_id: &TaskId) -> BTreeSet<DateTime<Utc>> {
        self.state
            .read()
            .await
            .consumed_plan
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn record_missed_fire(&self, marker: MissedFire) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(&marker.task_id) {
            return Err(StoreError::TaskNotFound(marker.task_id));
        }
        let keep = self.retention.missed_fires_per_task;
        let markers = state.missed_fires.entry(marker.task_id.clone()).or_default();
        markers.push(marker);
        let excess = markers.len().saturating_sub(keep);
        markers.drain(..excess);
        self.flush(&state).await;
        Ok(())
    }

    /// Missed-fire markers of a task, newest first.
    pub async fn missed_fires(&self, task_id: &TaskId) -> Vec<MissedFire> {
        let state = self.state.read().await;
        let mut markers = state.missed_fires.get(task_id).cloned().unwrap_or_default();
        markers.reverse();
        markers
    }

    /// Latest occurrence of `trigger_kind` already acted on for a task,
    /// whether it produced a run or a missed-fire marker.
    pub async fn last_fire(
        &self,
        task_id: &TaskId,
        trigger_kind: TriggerKind,
    ) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        let from_runs = state
            .runs_for(task_id)
            .filter(|run| run.trigger_kind == trigger_kind)
            .filter_map(|run| run.scheduled_for);
        let from_markers = state
            .missed_fires
            .get(task_id)
            .into_iter()
            .flatten()
            .filter(|marker| marker.trigger_kind == trigger_kind)
            .map(|marker| marker.due_at);
        from_runs.chain(from_markers).max()
    }

    #[cfg(test)]
    pub(crate) async fn drop_run_record(&self, run_id: &RunId) {
        let mut state = self.state.write().await;
        state.runs.remove(run_id);
        for history in state.history.values_mut() {
            history.retain(|id| id != run_id);
        }
    }

    // ---- persistence -----------------------------------------------------

    async fn flush(&self, state: &StoreState) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        if let Err(e) = write_snapshot(path, state).await {
            error!(path = %path.display(), error = %e, "Failed to write task store snapshot");
        } else {
            debug!(path = %path.display(), "Task store snapshot written");
        }
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

async fn write_snapshot(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("tmp");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
