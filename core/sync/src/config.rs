//! Engine configuration and partial updates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use offsync_common::{Error, Result};

use crate::retry::RetryConfig;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Period of the automatic sync trigger.
    #[serde(with = "duration_ms")]
    pub sync_interval: Duration,
    /// Whether the periodic trigger is armed at all.
    pub enable_auto_sync: bool,
    /// Upper bound on tasks executing at the same time.
    pub max_concurrent_tasks: usize,
    /// Time budget of a single task execution.
    #[serde(with = "duration_ms")]
    pub task_timeout: Duration,
    /// Retry budget and backoff.
    pub retry: RetryConfig,
}

impl SyncConfig {
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.enable_auto_sync = enabled;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            return Err(Error::Configuration(
                "syncInterval must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Configuration(
                "maxConcurrentTasks must be at least 1".to_string(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(Error::Configuration(
                "taskTimeout must be greater than zero".to_string(),
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(Error::Configuration(
                "backoffMultiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            enable_auto_sync: true,
            max_concurrent_tasks: 3,
            task_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Partial update merged into the live [`SyncConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfigUpdate {
    #[serde(with = "duration_ms::option")]
    pub sync_interval: Option<Duration>,
    pub enable_auto_sync: Option<bool>,
    pub max_concurrent_tasks: Option<usize>,
    #[serde(with = "duration_ms::option")]
    pub task_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    #[serde(with = "duration_ms::option")]
    pub initial_delay: Option<Duration>,
    #[serde(with = "duration_ms::option")]
    pub max_delay: Option<Duration>,
}

impl SyncConfigUpdate {
    /// Produce a new config with the set fields replaced.
    pub fn apply(&self, base: &SyncConfig) -> Result<SyncConfig> {
        let mut config = base.clone();
        if let Some(interval) = self.sync_interval {
            config.sync_interval = interval;
        }
        if let Some(enabled) = self.enable_auto_sync {
            config.enable_auto_sync = enabled;
        }
        if let Some(max) = self.max_concurrent_tasks {
            config.max_concurrent_tasks = max;
        }
        if let Some(timeout) = self.task_timeout {
            config.task_timeout = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(delay) = self.initial_delay {
            config.retry.initial_delay = delay;
        }
        if let Some(delay) = self.max_delay {
            config.retry.max_delay = delay;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Serde helpers that store durations as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
