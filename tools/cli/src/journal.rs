//! Local executor for non-HTTP tasks.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use offsync_common::{Error, Result};
use offsync_queue::SyncTask;
use offsync_sync::TaskExecutor;

/// Appends each delivered task as one JSON line to a journal file.
///
/// Stands in for `data`, `file` and `notification` targets when the CLI
/// drives the engine without a host application.
pub struct JournalExecutor {
    path: PathBuf,
}

impl JournalExecutor {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TaskExecutor for JournalExecutor {
    async fn execute(&self, task: &SyncTask) -> Result<Value> {
        let entry = json!({
            "id": task.id,
            "type": task.task_type,
            "payload": task.payload,
            "deliveredAt": Utc::now(),
        });
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Executor(format!("Failed to open {}: {}", self.path.display(), e)))?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!("Journaled {} task {}", task.task_type, task.id);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_queue::NewTask;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_appends_one_line_per_task() {
        let dir = TempDir::new().unwrap();
        let executor = JournalExecutor::new(dir.path().join("journal.jsonl"));

        for n in 0..2 {
            let task = NewTask::data(json!({ "n": n })).build(3, Utc::now()).unwrap();
            executor.execute(&task).await.unwrap();
        }

        let content = tokio::fs::read_to_string(executor.path()).await.unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["payload"], json!({"n": 1}));
        assert_eq!(lines[0]["type"], json!("data"));
    }
}
