//! Persistence backends for the task queue.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use offsync_common::{Error, Result};

use crate::task::SyncTask;

/// Storage backend for queued tasks and engine settings.
///
/// The queue calls `save_tasks` after every mutation with the full ordered
/// task list. Implementations must make the write atomic so a crash never
/// leaves a half-written queue behind.
#[async_trait]
pub trait TaskPersistence: Send + Sync {
    /// Load the persisted task list, in insertion order.
    async fn load_tasks(&self) -> Result<Vec<SyncTask>>;

    /// Replace the persisted task list.
    async fn save_tasks(&self, tasks: &[SyncTask]) -> Result<()>;

    /// Load persisted conflict resolution settings, if any were saved.
    async fn load_conflict_config(&self) -> Result<Option<serde_json::Value>>;

    /// Persist conflict resolution settings.
    async fn save_conflict_config(&self, config: &serde_json::Value) -> Result<()>;
}

/// In-memory persistence.
///
/// Useful for tests and hosts that do not need the queue to outlive the
/// process. All data is lost on drop.
#[derive(Default)]
pub struct MemoryPersistence {
    tasks: RwLock<Vec<SyncTask>>,
    conflict_config: RwLock<Option<serde_json::Value>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-seeded with tasks, as if left by a previous run.
    pub fn with_tasks(tasks: Vec<SyncTask>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
            conflict_config: RwLock::new(None),
        }
    }

    /// Tasks as last saved.
    pub fn saved_tasks(&self) -> Vec<SyncTask> {
        self.tasks.read().clone()
    }
}

#[async_trait]
impl TaskPersistence for MemoryPersistence {
    async fn load_tasks(&self) -> Result<Vec<SyncTask>> {
        Ok(self.tasks.read().clone())
    }

    async fn save_tasks(&self, tasks: &[SyncTask]) -> Result<()> {
        *self.tasks.write() = tasks.to_vec();
        Ok(())
    }

    async fn load_conflict_config(&self) -> Result<Option<serde_json::Value>> {
        Ok(self.conflict_config.read().clone())
    }

    async fn save_conflict_config(&self, config: &serde_json::Value) -> Result<()> {
        *self.conflict_config.write() = Some(config.clone());
        Ok(())
    }
}

/// JSON files in a directory: `tasks.json` and `conflict_config.json`.
pub struct JsonFilePersistence {
    tasks_path: PathBuf,
    config_path: PathBuf,
}

impl JsonFilePersistence {
    const TASKS_FILE: &'static str = "tasks.json";
    const CONFIG_FILE: &'static str = "conflict_config.json";

    /// Open (and create if needed) a persistence directory.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await.map_err(Error::Io)?;

        Ok(Self {
            tasks_path: base_dir.join(Self::TASKS_FILE),
            config_path: base_dir.join(Self::CONFIG_FILE),
        })
    }

    /// Path of the task list file.
    pub fn tasks_path(&self) -> &Path {
        &self.tasks_path
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write through a temp file and rename over the target.
    async fn write_atomic(path: &Path, contents: String) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).await.map_err(Error::Io)?;
        fs::rename(&tmp, path).await.map_err(Error::Io)
    }
}

#[async_trait]
impl TaskPersistence for JsonFilePersistence {
    async fn load_tasks(&self) -> Result<Vec<SyncTask>> {
        let tasks: Vec<SyncTask> = Self::read_json(&self.tasks_path).await?.unwrap_or_default();
        debug!("Loaded {} tasks from {}", tasks.len(), self.tasks_path.display());
        Ok(tasks)
    }

    async fn save_tasks(&self, tasks: &[SyncTask]) -> Result<()> {
        let json = serde_json::to_string_pretty(tasks)?;
        Self::write_atomic(&self.tasks_path, json).await
    }

    async fn load_conflict_config(&self) -> Result<Option<serde_json::Value>> {
        Self::read_json(&self.config_path).await
    }

    async fn save_conflict_config(&self, config: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        Self::write_atomic(&self.config_path, json).await
    }
}
