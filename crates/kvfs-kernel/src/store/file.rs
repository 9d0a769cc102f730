//! Single-file local store.
//!
//! The whole keyspace is cached in memory and rewritten to a JSON document
//! after every mutation (temp file + rename, so a crash leaves either the old
//! or the new document).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex as TokioMutex;

use super::memory::scan_prefix;
use super::{KvStore, StoreResult};

/// Key-value store persisted as a JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Serializes mutate-then-persist so documents hit disk in order.
    write_lock: TokioMutex<()>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(data) if data.is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file store");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            write_lock: TokioMutex::new(()),
        })
    }

    /// Write `entries` as the new document.
    async fn persist(&self, entries: &BTreeMap<String, Vec<u8>>) -> StoreResult<()> {
        let data = serde_json::to_vec(entries)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Persist `next`, then make it visible. Readers never see an entry
    /// that is not on disk. Caller holds `write_lock`.
    async fn commit(&self, next: BTreeMap<String, Vec<u8>>) -> StoreResult<()> {
        self.persist(&next).await?;
        *self.entries.write() = next;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.entries.read().clone();
        next.insert(key.to_string(), value.to_vec());
        self.commit(next).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.entries.read().clone();
        if next.remove(key).is_none() {
            return Ok(());
        }
        self.commit(next).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        Ok(scan_prefix(&self.entries.read(), prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("kv.json")).await.unwrap();
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kv.json");

        let store = FileStore::open(&path).await.unwrap();
        store.put("vol/a.txt", b"hello").await.unwrap();
        store.put("vol/b.txt", b"bye").await.unwrap();
        store.delete("vol/b.txt").await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.list("vol/").await.unwrap(),
            vec![("vol/a.txt".to_string(), b"hello".to_vec())]
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.json");
        let store = FileStore::open(&path).await.unwrap();
        store.put("keep", b"1").await.unwrap();

        // A directory where the temp file goes makes every write fail.
        let blocker = path.with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();

        assert!(store.put("lost", b"2").await.is_err());
        assert!(store.delete("keep").await.is_err());
        assert_eq!(store.get("lost").await.unwrap(), None);
        assert_eq!(store.get("keep").await.unwrap(), Some(b"1".to_vec()));

        std::fs::remove_dir(&blocker).unwrap();
        store.put("lost", b"2").await.unwrap();
        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.list("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.json");
        std::fs::write(&path, b"not json").unwrap();

        let result = FileStore::open(&path).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
