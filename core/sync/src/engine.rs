//! Sync engine that orchestrates the queue, executors and conflict resolution.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use offsync_common::{ConflictStrategy, Error, HttpMethod, Result, TaskId, TaskPriority, TaskType};
use offsync_queue::{
    FailureOutcome, MemoryPersistence, NewTask, SyncTask, TaskPersistence, TaskState, TaskStore,
};

use crate::config::{SyncConfig, SyncConfigUpdate};
use crate::conflict::{
    ConflictConfigUpdate, ConflictResolutionConfig, ConflictResolutionResult, ConflictResolver,
    CustomResolver,
};
use crate::events::{EventBus, SyncEvent};
use crate::executor::{ExecutorRegistry, TaskExecutor};
use crate::network::NetworkMonitor;
use crate::scheduler::{CycleReport, SyncScheduler, SyncTrigger};
use crate::state::{StatsTracker, SyncStats, SyncStatus};

/// How a single task attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Retrying,
    Failed,
    AwaitingUserChoice,
    /// The task was removed while it was executing.
    Dropped,
}

#[derive(Debug, Clone, Copy)]
struct Processed {
    outcome: TaskOutcome,
    conflict_detected: bool,
    conflict_resolved: bool,
}

impl Processed {
    fn plain(outcome: TaskOutcome) -> Self {
        Self {
            outcome,
            conflict_detected: false,
            conflict_resolved: false,
        }
    }

    fn conflict(outcome: TaskOutcome, resolved: bool) -> Self {
        Self {
            outcome,
            conflict_detected: true,
            conflict_resolved: resolved,
        }
    }
}

impl CycleReport {
    fn record(&mut self, processed: Processed) {
        match processed.outcome {
            TaskOutcome::Completed => self.tasks_completed += 1,
            TaskOutcome::Retrying => self.tasks_retried += 1,
            TaskOutcome::Failed => self.tasks_failed += 1,
            TaskOutcome::AwaitingUserChoice => self.awaiting_user_choice += 1,
            TaskOutcome::Dropped => {}
        }
        if processed.conflict_detected {
            self.conflicts_detected += 1;
        }
        if processed.conflict_resolved {
            self.conflicts_resolved += 1;
        }
    }
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    persistence: Option<Arc<dyn TaskPersistence>>,
    executors: ExecutorRegistry,
    network: Option<NetworkMonitor>,
    config: SyncConfig,
    conflict_config: ConflictResolutionConfig,
}

impl SyncEngineBuilder {
    fn new() -> Self {
        Self {
            persistence: None,
            executors: ExecutorRegistry::new(),
            network: None,
            config: SyncConfig::default(),
            conflict_config: ConflictResolutionConfig::default(),
        }
    }

    /// Storage backend. Defaults to [`MemoryPersistence`].
    pub fn persistence(mut self, persistence: Arc<dyn TaskPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn executor(mut self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executors.register(task_type, executor);
        self
    }

    /// Reachability signal. Defaults to always online.
    pub fn network(mut self, network: NetworkMonitor) -> Self {
        self.network = Some(network);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial conflict settings. Settings saved by a previous run take precedence.
    pub fn conflict_config(mut self, config: ConflictResolutionConfig) -> Self {
        let resolvers = std::mem::take(&mut self.conflict_config.custom_resolvers);
        self.conflict_config = config;
        for (key, resolver) in resolvers {
            self.conflict_config
                .custom_resolvers
                .entry(key)
                .or_insert(resolver);
        }
        self
    }

    pub fn custom_resolver(mut self, key: impl Into<String>, resolver: CustomResolver) -> Self {
        self.conflict_config
            .custom_resolvers
            .insert(key.into(), resolver);
        self
    }

    /// Open the store and assemble the engine.
    pub async fn build(self) -> Result<Arc<SyncEngine>> {
        self.config.validate()?;

        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(MemoryPersistence::new()) as Arc<dyn TaskPersistence>);
        let store = TaskStore::open(persistence.clone(), self.config.retry.max_retries).await?;

        let mut conflict_config = self.conflict_config;
        if let Some(saved) = persistence.load_conflict_config().await? {
            match serde_json::from_value::<ConflictResolutionConfig>(saved) {
                Ok(mut saved) => {
                    debug!("Loaded saved conflict resolution settings");
                    saved.custom_resolvers = std::mem::take(&mut conflict_config.custom_resolvers);
                    conflict_config = saved;
                }
                Err(e) => warn!("Ignoring unreadable conflict resolution settings: {}", e),
            }
        }

        let executors = self.executors.task_types();
        info!(
            "Sync engine ready with executors for {:?}, {} queued tasks",
            executors,
            store.len()
        );

        Ok(Arc::new(SyncEngine {
            store,
            persistence,
            resolver: ConflictResolver::new(conflict_config),
            executors: self.executors,
            network: self.network.unwrap_or_default(),
            config: RwLock::new(Arc::new(self.config)),
            stats: StatsTracker::new(),
            events: EventBus::new(),
            cycle_guard: tokio::sync::Mutex::new(()),
            settings_guard: tokio::sync::Mutex::new(()),
            is_running: AtomicBool::new(false),
            auto_sync: AtomicBool::new(true),
            completed_tasks: AtomicUsize::new(0),
            last_sync_time: Mutex::new(None),
            scheduler: Mutex::new(None),
            scheduler_task: tokio::sync::Mutex::new(None),
        }))
    }
}

/// Offline-aware background sync engine.
///
/// Built once per process by the composition root and shared as
/// `Arc<SyncEngine>`. Every operation takes `&self`; internal state is
/// guarded so hosts can call in from any task.
pub struct SyncEngine {
    store: TaskStore,
    persistence: Arc<dyn TaskPersistence>,
    resolver: ConflictResolver,
    executors: ExecutorRegistry,
    network: NetworkMonitor,
    config: RwLock<Arc<SyncConfig>>,
    stats: StatsTracker,
    events: EventBus,
    /// Held for the whole of a cycle.
    cycle_guard: tokio::sync::Mutex<()>,
    /// Serializes conflict settings writes so saves land in apply order.
    settings_guard: tokio::sync::Mutex<()>,
    is_running: AtomicBool,
    /// Cleared by `stop_auto_sync`, set again by `start_sync`.
    auto_sync: AtomicBool,
    completed_tasks: AtomicUsize,
    last_sync_time: Mutex<Option<chrono::DateTime<Utc>>>,
    scheduler: Mutex<Option<SyncScheduler>>,
    scheduler_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    /// Spawn the background scheduler loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut scheduler_task = self.scheduler_task.lock().await;
        if scheduler_task.is_some() {
            return Err(Error::InvalidState("Sync engine already started".to_string()));
        }

        let (scheduler, handle) = SyncScheduler::new(self.periodic_interval(), self.network.subscribe());

        let engine = Arc::downgrade(self);
        let task = tokio::spawn(handle.run(move |trigger| {
            let engine = engine.clone();
            async move {
                match engine.upgrade() {
                    Some(engine) => engine.run_cycle(trigger).await,
                    None => Err(Error::InvalidState("Sync engine dropped".to_string())),
                }
            }
        }));

        *self.scheduler.lock() = Some(scheduler);
        *scheduler_task = Some(task);
        info!("Sync engine started");
        Ok(())
    }

    /// Stop the scheduler loop and wait for it to exit.
    pub async fn shutdown(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        if let Some(task) = self.scheduler_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("Sync engine stopped");
    }

    fn scheduler(&self) -> Option<SyncScheduler> {
        self.scheduler.lock().clone()
    }

    fn periodic_interval(&self) -> Option<Duration> {
        let config = self.config();
        (config.enable_auto_sync && self.auto_sync.load(Ordering::SeqCst)).then_some(config.sync_interval)
    }

    async fn rearm_scheduler(&self) -> Result<()> {
        if let Some(scheduler) = self.scheduler() {
            scheduler.set_interval(self.periodic_interval()).await?;
        }
        Ok(())
    }

    // ---- Status ----

    pub fn status(&self) -> SyncStatus {
        let counts = self.store.counts();
        SyncStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            is_online: self.network.is_online(),
            total_tasks: counts.total,
            pending_tasks: counts.pending,
            executing_tasks: counts.executing,
            awaiting_user_choice: counts.awaiting_user_choice,
            failed_tasks: counts.failed,
            completed_tasks: self.completed_tasks.load(Ordering::SeqCst),
            last_sync_time: *self.last_sync_time.lock(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        self.publish_status();
    }

    /// All queued tasks in insertion order.
    pub fn tasks(&self) -> Vec<SyncTask> {
        self.store.all()
    }

    /// Tasks the next cycle would run, in dispatch order.
    pub fn eligible_tasks(&self) -> Vec<SyncTask> {
        self.store.eligible(Utc::now())
    }

    pub fn task(&self, id: &TaskId) -> Option<SyncTask> {
        self.store.get(id)
    }

    /// Tasks waiting for a user decision.
    pub fn conflicts(&self) -> Vec<SyncTask> {
        self.store
            .snapshot()
            .iter()
            .filter(|t| t.state == TaskState::AwaitingUserChoice)
            .cloned()
            .collect()
    }

    pub fn config(&self) -> Arc<SyncConfig> {
        self.config.read().clone()
    }

    pub fn conflict_config(&self) -> Arc<ConflictResolutionConfig> {
        self.resolver.config()
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Broadcast the current status and stats.
    pub fn publish_status(&self) {
        if self.events.subscriber_count() == 0 {
            return;
        }
        self.events.emit(SyncEvent::StatusChanged {
            status: self.status(),
            stats: self.stats(),
        });
    }

    /// Report a reachability change from the host.
    pub fn on_network_change(&self, online: bool) {
        if self.network.set_online(online) {
            self.events.emit(SyncEvent::NetworkChanged { online });
            self.publish_status();
        }
    }

    // ---- Queue ----

    /// Validate and enqueue a task.
    pub async fn add_task(&self, spec: NewTask) -> Result<TaskId> {
        let task = self.store.add(spec, Utc::now()).await?;
        if !self.executors.has_executor(task.task_type) {
            warn!("No executor registered for {} tasks; {} will fail when run", task.task_type, task.id);
        }
        self.events.emit(SyncEvent::TaskAdded { id: task.id.clone() });
        self.publish_status();
        Ok(task.id)
    }

    pub async fn add_api_task(
        &self,
        url: impl Into<String>,
        method: HttpMethod,
        payload: Value,
        priority: TaskPriority,
    ) -> Result<TaskId> {
        self.add_task(
            NewTask::api(url, method)
                .with_payload(payload)
                .with_priority(priority),
        )
        .await
    }

    pub async fn add_data_task(&self, payload: Value, priority: TaskPriority) -> Result<TaskId> {
        self.add_task(NewTask::data(payload).with_priority(priority))
            .await
    }

    /// Remove a task. Returns whether it existed.
    pub async fn remove_task(&self, id: &TaskId) -> Result<bool> {
        let removed = self.store.remove(id).await?.is_some();
        if removed {
            self.events.emit(SyncEvent::TaskRemoved { id: id.clone() });
            self.publish_status();
        }
        Ok(removed)
    }

    pub async fn clear_tasks(&self) -> Result<usize> {
        let count = self.store.clear().await?;
        info!("Cleared {} tasks", count);
        self.events.emit(SyncEvent::TasksCleared { count });
        self.publish_status();
        Ok(count)
    }

    /// Drop tasks older than `max_age`.
    pub async fn cleanup_expired_tasks(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::Validation(format!("Invalid max age: {}", e)))?;
        let count = self.store.cleanup_expired(max_age, Utc::now()).await?;
        if count > 0 {
            info!("Removed {} expired tasks", count);
            self.events.emit(SyncEvent::TasksExpired { count });
            self.publish_status();
        }
        Ok(count)
    }

    /// Give a terminal task a fresh retry budget.
    pub async fn retry_task(&self, id: &TaskId) -> Result<()> {
        let task = self
            .store
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Task {} not found", id)))?;
        if !task.is_terminal() {
            return Err(Error::InvalidState(format!("Task {} has not failed", id)));
        }
        self.store
            .update(id, |task| task.reset_for_retry())
            .await?
            .ok_or_else(|| Error::NotFound(format!("Task {} not found", id)))?;
        info!("Task {} queued for another round of retries", id);
        self.publish_status();
        Ok(())
    }

    // ---- Scheduling ----

    /// Re-arm the periodic trigger and run a cycle now.
    pub async fn start_sync(&self) -> Result<CycleReport> {
        self.auto_sync.store(true, Ordering::SeqCst);
        match self.scheduler() {
            Some(scheduler) if !scheduler.is_closed() => {
                scheduler.set_interval(self.periodic_interval()).await?;
                scheduler.request_sync(SyncTrigger::Manual).await
            }
            _ => self.run_cycle(SyncTrigger::Manual).await,
        }
    }

    /// Halt the periodic trigger. Tasks already running finish normally.
    pub async fn stop_auto_sync(&self) -> Result<()> {
        self.auto_sync.store(false, Ordering::SeqCst);
        self.rearm_scheduler().await?;
        info!("Automatic sync stopped");
        Ok(())
    }

    /// Merge a partial update into the live configuration.
    pub async fn update_config(&self, update: SyncConfigUpdate) -> Result<Arc<SyncConfig>> {
        let (previous, updated) = {
            let mut guard = self.config.write();
            let updated = Arc::new(update.apply(&guard)?);
            let previous = std::mem::replace(&mut *guard, updated.clone());
            (previous, updated)
        };

        if previous.retry.max_retries != updated.retry.max_retries {
            self.store.set_default_max_retries(updated.retry.max_retries);
        }
        if previous.sync_interval != updated.sync_interval
            || previous.enable_auto_sync != updated.enable_auto_sync
        {
            self.rearm_scheduler().await?;
        }

        debug!("Sync configuration updated: {:?}", updated);
        self.events.emit(SyncEvent::ConfigChanged);
        Ok(updated)
    }

    /// Run one sync cycle.
    ///
    /// Claims eligible tasks and keeps up to `max_concurrent_tasks` of them
    /// executing; a freed slot goes to the best eligible task at that moment.
    /// Returns once nothing is running and nothing else is eligible.
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> Result<CycleReport> {
        let _cycle = self.cycle_guard.lock().await;

        if !self.network.is_online() {
            debug!("Offline, skipping {:?} sync", trigger);
            return Ok(CycleReport {
                skipped_offline: true,
                ..CycleReport::default()
            });
        }

        let started = Instant::now();
        self.is_running.store(true, Ordering::SeqCst);
        self.events.emit(SyncEvent::CycleStarted { trigger });
        self.publish_status();
        debug!("Starting {:?} sync cycle", trigger);

        let config = self.config();
        let max_concurrent = config.max_concurrent_tasks.max(1);
        let mut report = CycleReport::default();
        let mut first_error = None;
        let mut pool = FuturesUnordered::new();

        loop {
            while first_error.is_none() && pool.len() < max_concurrent {
                match self.store.claim_next(Utc::now()).await {
                    Ok(Some(task)) => pool.push(self.process_task(task, &config)),
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to claim next task: {}", e);
                        first_error = Some(e);
                    }
                }
            }

            match pool.next().await {
                Some(Ok(processed)) => report.record(processed),
                Some(Err(e)) => {
                    error!("Failed to record task outcome: {}", e);
                    first_error.get_or_insert(e);
                }
                None => break,
            }
        }

        report.duration = started.elapsed();
        self.stats.record_cycle(report.duration);
        *self.last_sync_time.lock() = Some(Utc::now());
        self.is_running.store(false, Ordering::SeqCst);

        info!(
            "Sync cycle finished in {:?}: {} completed, {} retried, {} failed, {} awaiting a decision",
            report.duration,
            report.tasks_completed,
            report.tasks_retried,
            report.tasks_failed,
            report.awaiting_user_choice
        );
        self.events.emit(SyncEvent::CycleFinished {
            report: report.clone(),
        });
        self.publish_status();

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn process_task(&self, task: SyncTask, config: &SyncConfig) -> Result<Processed> {
        let id = task.id.clone();
        let processed = match self.executors.get(task.task_type) {
            Some(executor) => self.attempt_task(task, executor, config).await,
            None => {
                let message = format!("No executor registered for {} tasks", task.task_type);
                self.events.emit(SyncEvent::ConfigurationError {
                    id: Some(id.clone()),
                    message: message.clone(),
                });
                self.fail_task(&id, message).await.map(Processed::plain)
            }
        };

        if let Err(e) = &processed {
            // The outcome was not recorded; let a later cycle run it again.
            if self.store.release(&id).await {
                warn!("Task {} returned to pending, its outcome was not saved: {}", id, e);
            }
        }

        self.publish_status();
        processed
    }

    async fn attempt_task(
        &self,
        task: SyncTask,
        executor: Arc<dyn TaskExecutor>,
        config: &SyncConfig,
    ) -> Result<Processed> {
        debug!("Executing {} task {} (attempt {})", task.task_type, task.id, task.retry_count + 1);
        let started = Instant::now();
        let result = match tokio::time::timeout(config.task_timeout, executor.execute(&task)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(config.task_timeout)),
        };

        match result {
            Ok(_) => self
                .complete_task(&task.id, started.elapsed())
                .await
                .map(Processed::plain),
            Err(Error::Conflict { server_value, .. }) => {
                self.handle_conflict(task, server_value, started).await
            }
            Err(e) => {
                let backoff = config.retry.delay_for_attempt(task.retry_count);
                self.record_failure(&task.id, e.to_string(), backoff, None)
                    .await
                    .map(Processed::plain)
            }
        }
    }

    async fn complete_task(&self, id: &TaskId, elapsed: Duration) -> Result<TaskOutcome> {
        if self.store.remove(id).await?.is_none() {
            debug!("Task {} was removed while executing", id);
            return Ok(TaskOutcome::Dropped);
        }
        self.stats.record_success(elapsed);
        self.completed_tasks.fetch_add(1, Ordering::SeqCst);
        debug!("Task {} completed in {:?}", id, elapsed);
        self.events.emit(SyncEvent::TaskCompleted {
            id: id.clone(),
            duration: elapsed,
        });
        Ok(TaskOutcome::Completed)
    }

    /// Charge a failed attempt to the task's budget.
    ///
    /// `replacement` swaps in a new payload for the next attempt.
    async fn record_failure(
        &self,
        id: &TaskId,
        message: String,
        backoff: Duration,
        replacement: Option<Value>,
    ) -> Result<TaskOutcome> {
        let now = Utc::now();
        let backoff = chrono::Duration::from_std(backoff)
            .map_err(|e| Error::Configuration(format!("Backoff out of range: {}", e)))?;

        let mut outcome = None;
        let updated = self
            .store
            .update(id, |task| {
                let result = task.record_failure(message.clone(), now, backoff);
                if result == FailureOutcome::Retry {
                    if let Some(value) = replacement {
                        task.payload = value;
                    }
                }
                outcome = Some(result);
            })
            .await?;

        let Some(task) = updated else {
            debug!("Task {} was removed while executing", id);
            return Ok(TaskOutcome::Dropped);
        };

        match outcome {
            Some(FailureOutcome::Retry) => {
                self.stats.record_retry();
                warn!(
                    "Task {} failed (retry {}/{}): {}",
                    id, task.retry_count, task.max_retries, message
                );
                self.events.emit(SyncEvent::TaskRetrying {
                    id: id.clone(),
                    retry_count: task.retry_count,
                    error: message,
                });
                Ok(TaskOutcome::Retrying)
            }
            _ => {
                let err = Error::TerminalTask {
                    id: id.to_string(),
                    attempts: task.attempts(),
                    last_error: message,
                };
                Ok(self.report_terminal(id, err))
            }
        }
    }

    /// Fail a task outright, without spending its budget.
    async fn fail_task(&self, id: &TaskId, message: String) -> Result<TaskOutcome> {
        let now = Utc::now();
        let updated = self
            .store
            .update(id, |task| task.mark_failed(message.clone(), now))
            .await?;
        if updated.is_none() {
            return Ok(TaskOutcome::Dropped);
        }
        Ok(self.report_terminal(id, Error::Executor(message)))
    }

    fn report_terminal(&self, id: &TaskId, err: Error) -> TaskOutcome {
        self.stats.record_failure();
        error!("Task {} failed permanently: {}", id, err);
        self.events.emit(SyncEvent::TaskFailed {
            id: id.clone(),
            error: err.to_string(),
        });
        TaskOutcome::Failed
    }

    async fn handle_conflict(&self, task: SyncTask, server_value: Value, started: Instant) -> Result<Processed> {
        self.stats.record_conflict();
        info!("Conflict detected for task {}", task.id);
        self.events.emit(SyncEvent::ConflictDetected { id: task.id.clone() });

        let config = self.resolver.config();
        if !config.enable_auto_resolution {
            let outcome = self
                .defer_conflict(&task.id, server_value, &config, "Automatic conflict resolution is disabled")
                .await?;
            return Ok(Processed::conflict(outcome, false));
        }

        let requested = task
            .conflict_resolution_strategy
            .clone()
            .unwrap_or_else(|| config.default_strategy.clone());
        let (result, config_error) =
            self.resolver
                .resolve_with_fallback(&task.payload, &server_value, &requested);
        if let Some(err) = config_error {
            self.events.emit(SyncEvent::ConfigurationError {
                id: Some(task.id.clone()),
                message: err.to_string(),
            });
        }

        if !result.resolved {
            let outcome = self
                .defer_conflict(&task.id, server_value, &config, "Conflict needs a user decision")
                .await?;
            return Ok(Processed::conflict(outcome, false));
        }

        self.stats.record_conflict_resolved();
        debug!(
            "Conflict for task {} resolved with {} (confidence {:.2})",
            task.id, result.strategy, result.confidence
        );
        self.events.emit(SyncEvent::ConflictResolved {
            id: task.id.clone(),
            strategy: result.strategy.clone(),
            confidence: result.confidence,
        });

        let outcome = if result.final_value == server_value {
            // Server already holds the final state.
            self.complete_task(&task.id, started.elapsed()).await?
        } else {
            self.record_failure(
                &task.id,
                "Conflict resolved, retrying with reconciled payload".to_string(),
                Duration::ZERO,
                Some(result.final_value),
            )
            .await?
        };
        Ok(Processed::conflict(outcome, true))
    }

    /// Park a conflict for the user, or fail it when user choice is off.
    async fn defer_conflict(
        &self,
        id: &TaskId,
        server_value: Value,
        config: &ConflictResolutionConfig,
        reason: &str,
    ) -> Result<TaskOutcome> {
        let now = Utc::now();
        if config.enable_user_choice {
            let updated = self
                .store
                .update(id, |task| task.mark_awaiting_user_choice(server_value, now))
                .await?;
            if updated.is_none() {
                return Ok(TaskOutcome::Dropped);
            }
            info!("Task {} is waiting for a user decision: {}", id, reason);
            self.events.emit(SyncEvent::AwaitingUserChoice { id: id.clone() });
            return Ok(TaskOutcome::AwaitingUserChoice);
        }

        let updated = self
            .store
            .update(id, |task| task.mark_failed(reason, now))
            .await?;
        let Some(task) = updated else {
            return Ok(TaskOutcome::Dropped);
        };
        let err = Error::TerminalTask {
            id: id.to_string(),
            attempts: task.attempts(),
            last_error: reason.to_string(),
        };
        Ok(self.report_terminal(id, err))
    }

    /// Apply a user's decision to a parked conflict and make the task runnable.
    pub async fn resolve_user_choice(&self, id: &TaskId, value: Value) -> Result<()> {
        let task = self
            .store
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Task {} not found", id)))?;
        if task.state != TaskState::AwaitingUserChoice {
            return Err(Error::InvalidState(format!(
                "Task {} is not waiting for a user decision",
                id
            )));
        }

        self.store
            .update(id, |task| task.apply_resolution(value))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Task {} not found", id)))?;

        self.stats.record_conflict_resolved();
        self.events.emit(SyncEvent::ConflictResolved {
            id: id.clone(),
            strategy: ConflictStrategy::UserChoice,
            confidence: 1.0,
        });
        self.publish_status();
        Ok(())
    }

    // ---- Conflict configuration ----

    /// Merge new conflict settings into the live config, then persist them.
    ///
    /// The merged settings apply even if the save fails; the error is
    /// returned so the host can retry the save.
    pub async fn update_conflict_resolution_config(
        &self,
        update: ConflictConfigUpdate,
    ) -> Result<Arc<ConflictResolutionConfig>> {
        let _settings = self.settings_guard.lock().await;
        let config = self.resolver.update(&update);
        self.persistence
            .save_conflict_config(&config.to_settings()?)
            .await?;

        info!(
            "Conflict resolution settings updated: default {}, auto {}, user choice {}",
            config.default_strategy, config.enable_auto_resolution, config.enable_user_choice
        );
        self.events.emit(SyncEvent::ConfigChanged);
        Ok(config)
    }

    pub fn add_custom_resolver(&self, key: impl Into<String>, resolver: CustomResolver) {
        let key = key.into();
        debug!("Registered custom resolver {}", key);
        self.resolver.add_custom_resolver(key, resolver);
    }

    pub fn remove_custom_resolver(&self, key: &str) -> bool {
        self.resolver.remove_custom_resolver(key)
    }

    /// Set or clear a task's strategy override.
    pub async fn set_conflict_resolution_strategy(
        &self,
        id: &TaskId,
        strategy: Option<ConflictStrategy>,
    ) -> Result<()> {
        self.store.set_strategy(id, strategy).await?;
        Ok(())
    }

    /// Dry-run a resolution the way a sync cycle would.
    ///
    /// With no strategy the default applies. Configuration problems are
    /// returned rather than papered over.
    pub fn test_conflict_resolution(
        &self,
        client: &Value,
        server: &Value,
        strategy: Option<ConflictStrategy>,
    ) -> Result<ConflictResolutionResult> {
        let requested = strategy.unwrap_or_else(|| self.resolver.config().default_strategy.clone());
        self.resolver.resolve_effective(client, server, &requested)
    }
}
