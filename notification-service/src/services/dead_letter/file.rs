use super::DeadLetterSink;
use crate::error::InfrastructureError;
use crate::models::DeadLetterRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends dead letters as JSON lines, syncing each write to disk.
pub struct FileDeadLetterSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for FileDeadLetterSink {
    async fn send(&self, record: &DeadLetterRecord) -> Result<(), InfrastructureError> {
        let mut line = serde_json::to_vec(record).map_err(|e| {
            InfrastructureError::DeadLetter(format!("Failed to serialize dead letter: {}", e))
        })?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                InfrastructureError::DeadLetter(format!(
                    "Failed to open {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        file.write_all(&line)
            .await
            .map_err(|e| InfrastructureError::DeadLetter(e.to_string()))?;
        file.sync_data()
            .await
            .map_err(|e| InfrastructureError::DeadLetter(e.to_string()))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), InfrastructureError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let metadata = tokio::fs::metadata(&dir).await.map_err(|e| {
            InfrastructureError::DeadLetter(format!("{} not accessible: {}", dir.display(), e))
        })?;
        if metadata.permissions().readonly() {
            return Err(InfrastructureError::DeadLetter(format!(
                "{} is read-only",
                dir.display()
            )));
        }
        Ok(())
    }
}
