//! Durable, ordered task store.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use offsync_common::{ConflictStrategy, Error, Result, TaskId};

use crate::persistence::TaskPersistence;
use crate::task::{NewTask, SyncTask, TaskState};

/// Per-state task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub executing: usize,
    pub awaiting_user_choice: usize,
    pub failed: usize,
}

/// Ordered collection of pending sync tasks.
///
/// Writers are serialized by an async mutex held across the persistence
/// write, so the persisted order always matches the in-memory order. Readers
/// never wait on a writer: they clone the last published snapshot.
pub struct TaskStore {
    persistence: Arc<dyn TaskPersistence>,
    tasks: Mutex<Vec<SyncTask>>,
    snapshot: RwLock<Arc<Vec<SyncTask>>>,
    default_max_retries: AtomicU32,
}

impl TaskStore {
    /// Open the store, loading whatever the backend holds.
    ///
    /// Tasks left in `Executing` by a previous process are put back to
    /// `Pending`; their attempt never reported back.
    pub async fn open(persistence: Arc<dyn TaskPersistence>, default_max_retries: u32) -> Result<Self> {
        let mut tasks = persistence.load_tasks().await?;

        let mut recovered = 0;
        for task in tasks.iter_mut().filter(|t| t.state == TaskState::Executing) {
            task.state = TaskState::Pending;
            recovered += 1;
        }
        if recovered > 0 {
            warn!("Recovered {} tasks interrupted mid-execution", recovered);
            persistence.save_tasks(&tasks).await?;
        }

        info!("Task store opened with {} tasks", tasks.len());

        Ok(Self {
            persistence,
            snapshot: RwLock::new(Arc::new(tasks.clone())),
            tasks: Mutex::new(tasks),
            default_max_retries: AtomicU32::new(default_max_retries),
        })
    }

    /// Retry budget given to tasks that do not set their own.
    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries.load(Ordering::Relaxed)
    }

    pub fn set_default_max_retries(&self, max_retries: u32) {
        self.default_max_retries.store(max_retries, Ordering::Relaxed);
    }

    /// Apply `f` to a working copy and commit it if anything changed.
    ///
    /// The in-memory list is only replaced once the backend accepted the
    /// write, so a failed save leaves the store untouched.
    async fn mutate<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<SyncTask>) -> Result<R>,
    {
        let mut tasks = self.tasks.lock().await;
        let mut working = tasks.clone();
        let result = f(&mut working)?;

        if working != *tasks {
            self.persistence.save_tasks(&working).await?;
            *self.snapshot.write() = Arc::new(working.clone());
            *tasks = working;
        }

        Ok(result)
    }

    /// Validate and append a new task.
    pub async fn add(&self, spec: NewTask, now: DateTime<Utc>) -> Result<SyncTask> {
        let task = spec.build(self.default_max_retries(), now)?;
        let added = task.clone();

        self.mutate(move |tasks| {
            tasks.push(task);
            Ok(())
        })
        .await?;

        debug!("Queued {} task {} ({})", added.task_type, added.id, added.priority);
        Ok(added)
    }

    /// Remove a task. Unknown ids are a no-op.
    pub async fn remove(&self, id: &TaskId) -> Result<Option<SyncTask>> {
        self.mutate(|tasks| {
            Ok(tasks
                .iter()
                .position(|t| &t.id == id)
                .map(|index| tasks.remove(index)))
        })
        .await
    }

    /// Remove every task. Returns how many were dropped.
    pub async fn clear(&self) -> Result<usize> {
        self.mutate(|tasks| {
            let count = tasks.len();
            tasks.clear();
            Ok(count)
        })
        .await
    }

    /// Remove tasks older than `max_age`. A task exactly `max_age` old stays.
    pub async fn cleanup_expired(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        self.mutate(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| now - t.created_at <= max_age);
            Ok(before - tasks.len())
        })
        .await
    }

    /// Modify a task in place. Returns the updated copy, or `None` if the id is unknown.
    pub async fn update<F>(&self, id: &TaskId, f: F) -> Result<Option<SyncTask>>
    where
        F: FnOnce(&mut SyncTask),
    {
        self.mutate(|tasks| {
            Ok(tasks.iter_mut().find(|t| &t.id == id).map(|task| {
                f(task);
                task.clone()
            }))
        })
        .await
    }

    /// Set or clear the per-task strategy override.
    pub async fn set_strategy(&self, id: &TaskId, strategy: Option<ConflictStrategy>) -> Result<SyncTask> {
        self.update(id, |task| task.conflict_resolution_strategy = strategy)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Task {} not found", id)))
    }

    /// Atomically pick the next eligible task and mark it executing.
    ///
    /// The selection and the state change happen under the writer lock, so
    /// two callers can never claim the same task.
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SyncTask>> {
        self.mutate(|tasks| {
            let next = eligible_indices(tasks, now).into_iter().next();
            Ok(next.map(|index| {
                let task = &mut tasks[index];
                task.mark_executing(now);
                task.clone()
            }))
        })
        .await
    }

    /// Put a claimed task back to `Pending` without writing to the backend.
    ///
    /// For attempts whose outcome could not be saved. The backend still
    /// holds `Executing`, which `open` recovers the same way. Returns whether
    /// the task was executing.
    pub async fn release(&self, id: &TaskId) -> bool {
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks
            .iter_mut()
            .find(|t| &t.id == id && t.state == TaskState::Executing)
        else {
            return false;
        };
        task.state = TaskState::Pending;
        *self.snapshot.write() = Arc::new(tasks.clone());
        true
    }

    /// All tasks in insertion order.
    pub fn all(&self) -> Vec<SyncTask> {
        self.snapshot().as_ref().clone()
    }

    /// The last published snapshot.
    pub fn snapshot(&self) -> Arc<Vec<SyncTask>> {
        self.snapshot.read().clone()
    }

    pub fn get(&self, id: &TaskId) -> Option<SyncTask> {
        self.snapshot().iter().find(|t| &t.id == id).cloned()
    }

    /// Tasks the scheduler may run at `now`, in dispatch order.
    ///
    /// High before medium before low; within a class, oldest first, then
    /// insertion order.
    pub fn eligible(&self, now: DateTime<Utc>) -> Vec<SyncTask> {
        let snapshot = self.snapshot();
        eligible_indices(&snapshot, now)
            .into_iter()
            .map(|index| snapshot[index].clone())
            .collect()
    }

    pub fn counts(&self) -> TaskCounts {
        let snapshot = self.snapshot();
        let mut counts = TaskCounts {
            total: snapshot.len(),
            ..TaskCounts::default()
        };
        for task in snapshot.iter() {
            match task.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Executing => counts.executing += 1,
                TaskState::AwaitingUserChoice => counts.awaiting_user_choice += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

fn eligible_indices(tasks: &[SyncTask], now: DateTime<Utc>) -> Vec<usize> {
    let mut indices: Vec<usize> = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_eligible(now))
        .map(|(index, _)| index)
        .collect();
    // Stable sort keeps insertion order for identical keys.
    indices.sort_by_key(|&index| (tasks[index].priority.rank(), tasks[index].created_at));
    indices
}
