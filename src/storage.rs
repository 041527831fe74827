use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{ClientError, Result};

const STORE_FILE: &str = "storage.json";

/// Small string key/value store for the token and UI preference caches.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// I/O failures of the backing file.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// # Errors
    ///
    /// I/O failures of the backing file.
    async fn set(&self, key: &str, value: String) -> Result<()>;
    /// # Errors
    ///
    /// I/O failures of the backing file.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// # Errors
///
/// The store error, or a decode error for a stored value of another shape.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// # Errors
///
/// The store error.
pub async fn set_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_string(value)?).await
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON file in the data directory.
///
/// The whole map is rewritten on every change.
pub struct FileStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    path: PathBuf,
}

impl FileStore {
    /// # Errors
    ///
    /// Fails when `dir` cannot be created or holds an unreadable store file.
    pub async fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(STORE_FILE);

        let entries = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::Storage(format!("corrupt store {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(FileStore {
            entries: Arc::new(RwLock::new(entries)),
            path,
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<()> {
        let data = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.get("token").await.unwrap(), None);

        store.set("token", "T".to_string()).await.unwrap();
        assert_eq!(store.get("token").await.unwrap().as_deref(), Some("T"));

        store.remove("token").await.unwrap();
        assert_eq!(store.get("token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = FileStore::open(temp_dir.path()).await.unwrap();
            store.set("token", "T".to_string()).await.unwrap();
            set_json(&store, "viewedReels", &vec!["R1", "R2"]).await.unwrap();
        }

        let store = FileStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(store.get("token").await.unwrap().as_deref(), Some("T"));
        let viewed: Vec<String> = get_json(&store, "viewedReels").await.unwrap().unwrap();
        assert_eq!(viewed, vec!["R1", "R2"]);
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(STORE_FILE), b"{not json").unwrap();

        let result = FileStore::open(temp_dir.path()).await;
        assert!(matches!(result, Err(ClientError::Storage(_))));
    }
}
