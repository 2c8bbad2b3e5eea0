//! Host-local persisted state
//!
//! Values that must survive between provisioning runs on the same host:
//! propagated secrets and whether the host already bootstrapped its cluster.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, Result};

#[async_trait]
pub trait LocalState: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Mode of the state file; it holds propagated secrets
pub const STATE_FILE_MODE: u32 = 0o600;

/// JSON document on disk, atomically replaced on every change
#[derive(Debug, Clone)]
pub struct FileLocalState {
    path: PathBuf,
}

impl FileLocalState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(AppError::IoError(format!(
                "Failed to read local state {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Write the document next to its target, then rename it into place so a
    /// reader never sees a partial file.
    async fn persist(&self, all: &BTreeMap<String, serde_json::Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        match tokio::fs::remove_file(&staging).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(STATE_FILE_MODE);

        let mut file = options.open(&staging).await?;
        file.write_all(&serde_json::to_vec_pretty(all)?).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalState for FileLocalState {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut all = self.read_all().await?;
        all.insert(key.to_string(), value);
        self.persist(&all).await?;

        debug!(path = %self.path.display(), key = key, "Local state updated");
        Ok(())
    }
}

/// Local state kept in process memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocalState {
    values: Arc<RwLock<BTreeMap<String, serde_json::Value>>>,
}

impl InMemoryLocalState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalState for InMemoryLocalState {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
