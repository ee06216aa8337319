//! Queued sync tasks and their lifecycle transitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use offsync_common::{ConflictStrategy, Error, HttpMethod, Result, TaskId, TaskPriority, TaskType};

/// Execution state of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Waiting for the scheduler.
    #[default]
    Pending,
    /// Claimed by a running sync cycle.
    Executing,
    /// Conflict detected, a human has to pick the final value.
    AwaitingUserChoice,
    /// Retry budget exhausted. Never scheduled again.
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Executing => "executing",
            TaskState::AwaitingUserChoice => "awaiting-user-choice",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A conflict waiting for a user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConflict {
    /// Server's version of the record at detection time.
    pub server_value: serde_json::Value,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Re-queued; the task will run again once its backoff elapses.
    Retry,
    /// Budget exhausted; the task is now terminal.
    Terminal,
}

/// A queued unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    /// Backoff gate; the task is not eligible before this instant.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub conflict_resolution_strategy: Option<ConflictStrategy>,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub pending_conflict: Option<PendingConflict>,
}

impl SyncTask {
    /// Whether the scheduler may pick this task at `now`.
    ///
    /// A pending task at `retry_count == max_retries` still has its final
    /// attempt left; only `Failed` tasks are out of budget.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending
            && self.retry_count <= self.max_retries
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Whether the task has exhausted its retry budget.
    pub fn is_terminal(&self) -> bool {
        self.state == TaskState::Failed
    }

    /// Number of attempts made so far, including the one in progress.
    pub fn attempts(&self) -> u32 {
        self.retry_count + u32::from(self.last_attempt.is_some())
    }

    /// Mark as claimed by a sync cycle.
    pub fn mark_executing(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Executing;
        self.last_attempt = Some(now);
    }

    /// Record a failed attempt.
    ///
    /// While budget remains, `retry_count` grows by one and the task goes back
    /// to `Pending` gated by `backoff`. Otherwise it becomes terminal and
    /// `retry_count` stays at `max_retries`.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        backoff: Duration,
    ) -> FailureOutcome {
        self.error = Some(error.into());
        self.last_attempt = Some(now);

        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.state = TaskState::Pending;
            self.next_attempt_at = Some(now + backoff);
            FailureOutcome::Retry
        } else {
            self.state = TaskState::Failed;
            self.next_attempt_at = None;
            FailureOutcome::Terminal
        }
    }

    /// Fail the task without consuming its retry budget.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.error = Some(error.into());
        self.last_attempt = Some(now);
        self.state = TaskState::Failed;
        self.next_attempt_at = None;
        self.pending_conflict = None;
    }

    /// Park the task until a user picks the final value.
    pub fn mark_awaiting_user_choice(&mut self, server_value: serde_json::Value, now: DateTime<Utc>) {
        self.state = TaskState::AwaitingUserChoice;
        self.pending_conflict = Some(PendingConflict {
            server_value,
            detected_at: now,
        });
    }

    /// Replace the payload with a reconciled value and make the task runnable.
    pub fn apply_resolution(&mut self, value: serde_json::Value) {
        self.payload = value;
        self.pending_conflict = None;
        self.state = TaskState::Pending;
        self.next_attempt_at = None;
    }

    /// Give a terminal task a fresh retry budget.
    pub fn reset_for_retry(&mut self) {
        self.retry_count = 0;
        self.error = None;
        self.next_attempt_at = None;
        self.pending_conflict = None;
        self.state = TaskState::Pending;
    }
}

/// Specification of a task to enqueue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub conflict_resolution_strategy: Option<ConflictStrategy>,
}

impl NewTask {
    /// An empty specification of the given type.
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type: Some(task_type),
            ..Self::default()
        }
    }

    /// An HTTP call.
    pub fn api(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: Some(url.into()),
            method: Some(method),
            ..Self::new(TaskType::Api)
        }
    }

    /// A record write.
    pub fn data(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ..Self::new(TaskType::Data)
        }
    }

    /// A file transfer; the payload carries the file path.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            payload: serde_json::json!({ "path": path.into() }),
            ..Self::new(TaskType::File)
        }
    }

    /// A deferred notification.
    pub fn notification(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ..Self::new(TaskType::Notification)
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_resolution_strategy = Some(strategy);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Check the fields required by the task type.
    pub fn validate(&self) -> Result<TaskType> {
        let task_type = self
            .task_type
            .ok_or_else(|| Error::Validation("Task type is required".to_string()))?;

        match task_type {
            TaskType::Api => {
                let url = self
                    .url
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| Error::Validation("API task requires a url".to_string()))?;
                url::Url::parse(url)
                    .map_err(|e| Error::Validation(format!("Invalid url '{}': {}", url, e)))?;
                if self.method.is_none() {
                    return Err(Error::Validation("API task requires a method".to_string()));
                }
            }
            TaskType::Data | TaskType::Notification => {
                if self.payload.is_null() {
                    return Err(Error::Validation(format!(
                        "{} task requires a payload",
                        task_type
                    )));
                }
            }
            TaskType::File => {
                let has_path = self
                    .payload
                    .get("path")
                    .and_then(|p| p.as_str())
                    .is_some_and(|p| !p.is_empty());
                if !has_path {
                    return Err(Error::Validation(
                        "File task requires a payload with a 'path' string".to_string(),
                    ));
                }
            }
        }

        if let Some(ConflictStrategy::Custom(key)) = &self.conflict_resolution_strategy {
            if key.is_empty() {
                return Err(Error::Validation(
                    "Custom strategy requires a resolver key".to_string(),
                ));
            }
        }

        Ok(task_type)
    }

    /// Validate and build a task with a fresh id.
    pub fn build(self, default_max_retries: u32, now: DateTime<Utc>) -> Result<SyncTask> {
        let task_type = self.validate()?;
        Ok(SyncTask {
            id: TaskId::new(Uuid::new_v4().to_string())?,
            task_type,
            priority: self.priority.unwrap_or_default(),
            url: self.url,
            method: self.method,
            headers: self.headers,
            payload: self.payload,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            created_at: now,
            last_attempt: None,
            next_attempt_at: None,
            error: None,
            conflict_resolution_strategy: self.conflict_resolution_strategy,
            state: TaskState::Pending,
            pending_conflict: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_task_requires_url_and_method() {
        let mut spec = NewTask::api("https://api.example.com/cards", HttpMethod::Post);
        assert_eq!(spec.validate().unwrap(), TaskType::Api);

        spec.method = None;
        assert!(matches!(spec.validate(), Err(Error::Validation(_))));

        let spec = NewTask::api("not a url", HttpMethod::Get);
        assert!(matches!(spec.validate(), Err(Error::Validation(_))));

        let spec = NewTask::new(TaskType::Api);
        assert!(matches!(spec.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_data_and_file_validation() {
        assert!(NewTask::data(json!({"card": 1})).validate().is_ok());
        assert!(NewTask::data(serde_json::Value::Null).validate().is_err());
        assert!(NewTask::file("/tmp/scan.png").validate().is_ok());
        assert!(NewTask::new(TaskType::File)
            .with_payload(json!({"size": 3}))
            .validate()
            .is_err());
        assert!(NewTask::default().validate().is_err());
    }

    #[test]
    fn test_build_assigns_defaults() {
        let now = Utc::now();
        let task = NewTask::data(json!({"a": 1})).build(5, now).unwrap();
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.created_at, now);
        assert_eq!(task.state, TaskState::Pending);

        let other = NewTask::data(json!({"a": 1})).build(5, now).unwrap();
        assert_ne!(task.id, other.id);
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let now = Utc::now();
        let mut task = NewTask::data(json!({}))
            .with_max_retries(2)
            .build(3, now)
            .unwrap();

        assert_eq!(task.record_failure("e1", now, Duration::zero()), FailureOutcome::Retry);
        assert_eq!(task.record_failure("e2", now, Duration::zero()), FailureOutcome::Retry);
        assert_eq!(task.retry_count, 2);
        assert!(task.is_eligible(now));

        assert_eq!(task.record_failure("e3", now, Duration::zero()), FailureOutcome::Terminal);
        assert_eq!(task.retry_count, 2);
        assert!(task.is_terminal());
        assert!(!task.is_eligible(now));
        assert_eq!(task.error.as_deref(), Some("e3"));
    }

    #[test]
    fn test_backoff_gates_eligibility() {
        let now = Utc::now();
        let mut task = NewTask::data(json!({})).build(3, now).unwrap();
        task.record_failure("timeout", now, Duration::seconds(4));

        assert!(!task.is_eligible(now));
        assert!(!task.is_eligible(now + Duration::seconds(3)));
        assert!(task.is_eligible(now + Duration::seconds(4)));
    }

    #[test]
    fn test_user_choice_round_trip() {
        let now = Utc::now();
        let mut task = NewTask::data(json!({"qty": 1})).build(3, now).unwrap();
        task.mark_awaiting_user_choice(json!({"qty": 4}), now);
        assert!(!task.is_eligible(now));

        task.apply_resolution(json!({"qty": 5}));
        assert!(task.is_eligible(now));
        assert_eq!(task.payload, json!({"qty": 5}));
        assert!(task.pending_conflict.is_none());
    }

    #[test]
    fn test_persisted_field_names() {
        let task = NewTask::api("https://api.example.com/x", HttpMethod::Put)
            .build(3, Utc::now())
            .unwrap();
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "api");
        assert_eq!(value["method"], "PUT");
        assert!(value.get("retryCount").is_some());
        assert!(value.get("conflictResolutionStrategy").is_some());
    }
}
