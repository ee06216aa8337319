//! Task executors supplied by the host, one per task type.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use offsync_common::{Result, TaskType};
use offsync_queue::SyncTask;

/// Runs one task attempt.
///
/// Return `Error::Conflict` when the target holds a newer version of the
/// record (HTTP 409/412, version mismatch). Any other error is retried with
/// backoff until the task's budget runs out.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &SyncTask) -> Result<Value>;
}

/// Adapter turning an async closure into a [`TaskExecutor`].
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(SyncTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(SyncTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn execute(&self, task: &SyncTask) -> Result<Value> {
        (self.f)(task.clone()).await
    }
}

/// Executors keyed by task type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor for a type, replacing any previous one.
    pub fn register(&mut self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(task_type, executor);
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&task_type).cloned()
    }

    pub fn has_executor(&self, task_type: TaskType) -> bool {
        self.executors.contains_key(&task_type)
    }

    /// Registered types, in declaration order.
    pub fn task_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.executors.contains_key(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use offsync_queue::NewTask;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_executor_receives_task() {
        let executor = FnExecutor::new(|task: SyncTask| async move { Ok(task.payload) });
        let task = NewTask::data(json!({"set": "base"})).build(3, Utc::now()).unwrap();

        assert_eq!(executor.execute(&task).await.unwrap(), json!({"set": "base"}));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register(
            TaskType::Notification,
            Arc::new(FnExecutor::new(|_task: SyncTask| async { Ok(Value::Null) })),
        );
        registry.register(
            TaskType::Api,
            Arc::new(FnExecutor::new(|_task: SyncTask| async { Ok(Value::Null) })),
        );

        assert!(registry.has_executor(TaskType::Api));
        assert!(registry.get(TaskType::File).is_none());
        assert_eq!(registry.task_types(), vec![TaskType::Api, TaskType::Notification]);
    }
}
