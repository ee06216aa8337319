//! Common types used throughout Offsync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Unique identifier for a queued task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a TaskId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::Validation("TaskId cannot be empty".to_string()));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Kind of work a task performs; selects the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// HTTP call against a REST endpoint.
    Api,
    /// Local or remote record write.
    Data,
    /// File transfer.
    File,
    /// Deferred notification delivery.
    Notification,
}

impl TaskType {
    /// All task types, in declaration order.
    pub const ALL: [TaskType; 4] = [
        TaskType::Api,
        TaskType::Data,
        TaskType::File,
        TaskType::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Api => "api",
            TaskType::Data => "data",
            TaskType::File => "file",
            TaskType::Notification => "notification",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "api" => Ok(TaskType::Api),
            "data" => Ok(TaskType::Data),
            "file" => Ok(TaskType::File),
            "notification" => Ok(TaskType::Notification),
            other => Err(Error::Validation(format!("Unknown task type '{}'", other))),
        }
    }
}

/// Scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    /// Scheduling rank; lower runs first.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::High => 0,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            other => Err(Error::Validation(format!("Unknown priority '{}'", other))),
        }
    }
}

/// HTTP method of an `api` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(Error::Validation(format!("Unsupported HTTP method '{}'", other))),
        }
    }
}

/// Conflict resolution strategy.
///
/// Serialized as its kebab-case name; `Custom` carries the lookup key of a
/// registered resolver and is written as `custom:<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ConflictStrategy {
    /// Server value is kept as-is.
    #[default]
    ServerWins,
    /// Client value overwrites the server.
    ClientWins,
    /// Shallow field merge, server wins on collision.
    Merge,
    /// Newer embedded update timestamp wins.
    TimestampBased,
    /// Per-field comparison using per-field timestamps.
    FieldLevel,
    /// Higher version counter wins.
    VersionBased,
    /// A human has to decide.
    UserChoice,
    /// Registered resolver looked up by key.
    Custom(String),
}

impl ConflictStrategy {
    /// Create a custom strategy for the given resolver key.
    pub fn custom(key: impl Into<String>) -> Self {
        ConflictStrategy::Custom(key.into())
    }

    /// Strategy name without the custom key.
    pub fn name(&self) -> &'static str {
        match self {
            ConflictStrategy::ServerWins => "server-wins",
            ConflictStrategy::ClientWins => "client-wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::TimestampBased => "timestamp-based",
            ConflictStrategy::FieldLevel => "field-level",
            ConflictStrategy::VersionBased => "version-based",
            ConflictStrategy::UserChoice => "user-choice",
            ConflictStrategy::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::Custom(key) => write!(f, "custom:{}", key),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(key) = s.strip_prefix("custom:") {
            if key.is_empty() {
                return Err(Error::Configuration(
                    "Custom strategy requires a resolver key".to_string(),
                ));
            }
            return Ok(ConflictStrategy::Custom(key.to_string()));
        }

        match s {
            "server-wins" => Ok(ConflictStrategy::ServerWins),
            "client-wins" => Ok(ConflictStrategy::ClientWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "timestamp-based" => Ok(ConflictStrategy::TimestampBased),
            "field-level" => Ok(ConflictStrategy::FieldLevel),
            "version-based" => Ok(ConflictStrategy::VersionBased),
            "user-choice" => Ok(ConflictStrategy::UserChoice),
            "custom" => Err(Error::Configuration(
                "Custom strategy requires a resolver key (custom:<key>)".to_string(),
            )),
            other => Err(Error::Configuration(format!(
                "Unknown conflict strategy '{}'",
                other
            ))),
        }
    }
}

impl Serialize for ConflictStrategy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConflictStrategy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_task_id_empty_fails() {
        assert!(TaskId::new("").is_err());
        assert_eq!(TaskId::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(TaskPriority::High.rank() < TaskPriority::Medium.rank());
        assert!(TaskPriority::Medium.rank() < TaskPriority::Low.rank());
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "timestamp-based".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::TimestampBased
        );
        assert_eq!(
            "custom:cards".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::custom("cards")
        );
        assert!(matches!(
            "last-write-wins".parse::<ConflictStrategy>(),
            Err(Error::Configuration(_))
        ));
        assert!("custom:".parse::<ConflictStrategy>().is_err());
    }

    #[test]
    fn test_strategy_json_form() {
        let json = serde_json::to_string(&ConflictStrategy::custom("price")).unwrap();
        assert_eq!(json, "\"custom:price\"");
        let back: ConflictStrategy = serde_json::from_str("\"field-level\"").unwrap();
        assert_eq!(back, ConflictStrategy::FieldLevel);
    }

    proptest! {
        #[test]
        fn prop_custom_strategy_keeps_key(key in "[a-z][a-z0-9_-]{0,16}") {
            let parsed: ConflictStrategy = format!("custom:{}", key).parse().unwrap();
            prop_assert_eq!(parsed, ConflictStrategy::Custom(key));
        }
    }
}
