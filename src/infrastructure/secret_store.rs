//! Secret store lookups
//!
//! Items are opaque string maps scoped by environment
//! (`certificates-<env>`, `passwords-<env>`). Decryption belongs to the store;
//! the key is only resolved and passed through.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, Result};

/// Key handed to the store to decrypt an item
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptionKey(String);

impl DecryptionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Read the key from a file, trimming trailing whitespace
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::SecretStoreError(format!(
                "Failed to read decryption key {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self(content.trim_end().to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptionKey(<redacted>)")
    }
}

/// One decrypted item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretItem {
    pub scope: String,
    pub id: String,
    pub values: BTreeMap<String, String>,
}

impl SecretItem {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn require(&self, field: &str) -> Result<&str> {
        self.get(field).ok_or_else(|| {
            AppError::SecretStoreError(format!(
                "Item '{}/{}' has no field '{}'",
                self.scope, self.id, field
            ))
        })
    }
}

/// Scope holding certificate items for an environment
pub fn certificates_scope(environment: &str) -> String {
    format!("certificates-{}", environment)
}

/// Scope holding password items for an environment
pub fn passwords_scope(environment: &str) -> String {
    format!("passwords-{}", environment)
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn load(&self, scope: &str, item: &str, key: &DecryptionKey) -> Result<SecretItem>;
}

/// Store reading one JSON object per item from `<root>/<scope>/<item>.json`
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn item_path(&self, scope: &str, item: &str) -> PathBuf {
        self.root.join(scope).join(format!("{}.json", item))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn load(&self, scope: &str, item: &str, key: &DecryptionKey) -> Result<SecretItem> {
        if key.expose().is_empty() {
            return Err(AppError::SecretStoreError(
                "An empty decryption key was supplied".to_string(),
            ));
        }

        let path = self.item_path(scope, item);
        debug!(path = %path.display(), "Loading secret item");

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            AppError::SecretStoreError(format!("Unable to load '{}/{}': {}", scope, item, e))
        })?;
        let values: BTreeMap<String, String> = serde_json::from_str(&content).map_err(|e| {
            AppError::SecretStoreError(format!("Item '{}/{}' is malformed: {}", scope, item, e))
        })?;

        Ok(SecretItem {
            scope: scope.to_string(),
            id: item.to_string(),
            values,
        })
    }
}

/// Store kept in process memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct InMemorySecretStore {
    items: Arc<RwLock<HashMap<(String, String), BTreeMap<String, String>>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, scope: &str, item: &str, values: &[(&str, &str)]) {
        let values = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.items
            .write()
            .await
            .insert((scope.to_string(), item.to_string()), values);
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn load(&self, scope: &str, item: &str, _key: &DecryptionKey) -> Result<SecretItem> {
        let items = self.items.read().await;
        let values = items
            .get(&(scope.to_string(), item.to_string()))
            .cloned()
            .ok_or_else(|| {
                AppError::SecretStoreError(format!("Unable to load '{}/{}'", scope, item))
            })?;

        Ok(SecretItem {
            scope: scope.to_string(),
            id: item.to_string(),
            values,
        })
    }
}
