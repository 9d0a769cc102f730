//! Key-value store adapters.
//!
//! Volumes persist their content through a [`KvStore`]. Keys are
//! `/`-separated strings; values are opaque bytes.
//!
//! Adapters are selected from the closed [`StoreKind`] set by
//! [`StoreConnector`]. Remote stores (Consul, etcd, ZooKeeper) are
//! recognized but have no client in this build and fail with
//! [`StoreError::Unsupported`].

mod file;
mod memory;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{StoreConfig, StoreKind};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The config carries no address to connect to.
    #[error("no store addresses configured")]
    NoAddresses,

    /// No adapter exists for this store kind.
    #[error("store kind {0} is not supported by this build")]
    Unsupported(StoreKind),

    /// I/O error.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted store content could not be decoded.
    #[error("corrupt store data: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Core key-value operations.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;
}

/// Connects [`StoreConfig`]s to store adapters.
///
/// Local stores are cached by their first address, so two volumes naming
/// the same address see the same data.
#[derive(Default)]
pub struct StoreConnector {
    memory: Mutex<HashMap<String, Arc<MemoryStore>>>,
    files: Mutex<HashMap<PathBuf, Arc<FileStore>>>,
}

impl std::fmt::Debug for StoreConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnector")
            .field("memory", &self.memory.lock().len())
            .field("files", &self.files.lock().len())
            .finish()
    }
}

impl StoreConnector {
    /// Create a connector with no cached stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to the store described by `config`.
    pub async fn connect(&self, config: &StoreConfig) -> StoreResult<Arc<dyn KvStore>> {
        let addr = config.addrs.first().ok_or(StoreError::NoAddresses)?;

        match config.kind {
            StoreKind::Memory => {
                let store = self
                    .memory
                    .lock()
                    .entry(addr.clone())
                    .or_insert_with(|| Arc::new(MemoryStore::new()))
                    .clone();
                Ok(store)
            }
            StoreKind::File => {
                let path = PathBuf::from(addr);
                let cached = self.files.lock().get(&path).cloned();
                if let Some(store) = cached {
                    return Ok(store);
                }

                // Opened outside the lock; a racing open of the same path
                // keeps whichever instance got cached first.
                let opened = Arc::new(FileStore::open(&path).await?);
                let store = self
                    .files
                    .lock()
                    .entry(path)
                    .or_insert(opened)
                    .clone();
                Ok(store)
            }
            kind @ (StoreKind::Consul | StoreKind::Etcd | StoreKind::Zookeeper) => {
                Err(StoreError::Unsupported(kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_shared_per_address() {
        let connector = StoreConnector::new();
        let a = StoreConfig::new(StoreKind::Memory, vec!["one".into()]);
        let b = StoreConfig::new(StoreKind::Memory, vec!["two".into()]);

        let first = connector.connect(&a).await.unwrap();
        first.put("k", b"v").await.unwrap();

        let again = connector.connect(&a).await.unwrap();
        assert_eq!(again.get("k").await.unwrap(), Some(b"v".to_vec()));

        let other = connector.connect(&b).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_shared_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let config = StoreConfig::new(StoreKind::File, vec![path.display().to_string()]);

        let connector = StoreConnector::new();
        let first = connector.connect(&config).await.unwrap();
        first.put("a/b", b"data").await.unwrap();

        let second = connector.connect(&config).await.unwrap();
        assert_eq!(second.get("a/b").await.unwrap(), Some(b"data".to_vec()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_remote_kinds_unsupported() {
        let connector = StoreConnector::new();
        for kind in [StoreKind::Consul, StoreKind::Etcd, StoreKind::Zookeeper] {
            let config = StoreConfig::new(kind, vec!["127.0.0.1:8500".into()]);
            let result = connector.connect(&config).await;
            assert!(matches!(result, Err(StoreError::Unsupported(k)) if k == kind));
        }
    }

    #[tokio::test]
    async fn test_no_addresses() {
        let connector = StoreConnector::new();
        let config = StoreConfig::new(StoreKind::Memory, vec![]);
        assert!(matches!(
            connector.connect(&config).await,
            Err(StoreError::NoAddresses)
        ));
    }
}
