//! Mirror backend: keeps a directory and a store prefix in sync.
//!
//! The store is the durable copy; the mountpoint directory is what
//! containers see.
//!
//! # Key mapping
//!
//! A file at `a/b.txt` under the mountpoint maps to key `{root}/a/b.txt`
//! (just `a/b.txt` when the root prefix is empty). Directories are implied
//! by keys and are not stored.
//!
//! # Change detection
//!
//! ```text
//! notify watcher ──paths──► worker ──push──► store
//! interval tick  ─────────► worker ◄─pull─── store
//! ```
//!
//! Local writes reach the worker as watcher events and are pushed file by
//! file. The store has no change feed, so it is polled on an interval and
//! only keys that moved since the last agreed snapshot touch the disk. A
//! full walk of the mountpoint happens at mount, on watcher overflow and
//! once more when the worker stops.
//!
//! # Conflicts
//!
//! Per key, the snapshot is the last content both sides agreed on. A key
//! changed on both sides since then keeps the local version.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use walkdir::WalkDir;

use super::{BackendError, BackendHandle, BackendResult, FilesystemService};
use crate::config::StoreConfig;
use crate::store::{KvStore, StoreConnector};

/// Default interval between store polls.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(500);

/// Filesystem service that mirrors store prefixes into directories.
#[derive(Debug, Clone)]
pub struct MirrorService {
    connector: Arc<StoreConnector>,
    interval: Duration,
}

impl MirrorService {
    /// Create a service using `connector` for store access.
    pub fn new(connector: Arc<StoreConnector>) -> Self {
        Self {
            connector,
            interval: DEFAULT_SYNC_INTERVAL,
        }
    }

    /// Set the interval between store polls.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl FilesystemService for MirrorService {
    async fn mount(
        &self,
        config: &StoreConfig,
        mountpoint: &Path,
    ) -> BackendResult<Box<dyn BackendHandle>> {
        let store = self.connector.connect(config).await?;
        let mut mirror = Mirror::new(store, config.key_prefix(), mountpoint);

        // Populate the directory before anyone can see it.
        let stats = mirror.sync().await?;
        tracing::debug!(
            mountpoint = %mountpoint.display(),
            store = %config.kind,
            pulled = stats.pulled,
            "mirror mounted"
        );

        Ok(Box::new(MirrorHandle {
            mountpoint: mountpoint.to_path_buf(),
            interval: self.interval,
            mirror: Some(mirror),
            worker: None,
        }))
    }
}

/// Handle to a mounted mirror.
///
/// Dropping a serving handle without [`unmount`](BackendHandle::unmount)
/// still stops the worker, but nobody waits for its last pass.
pub struct MirrorHandle {
    mountpoint: PathBuf,
    interval: Duration,
    /// Present until the worker takes it over.
    mirror: Option<Mirror>,
    /// Present from `serve()` until the worker task has finished.
    worker: Option<Worker>,
}

struct Worker {
    /// Dropped together with the worker, which ends event delivery.
    _watcher: RecommendedWatcher,
    /// Taken when the stop signal is sent.
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<BackendResult<()>>,
}

#[async_trait]
impl BackendHandle for MirrorHandle {
    fn serve(&mut self) -> BackendResult<()> {
        if self.worker.is_some() {
            return Err(BackendError::AlreadyServing);
        }
        let mut mirror = self
            .mirror
            .take()
            .ok_or_else(|| BackendError::Worker("backend was unmounted".into()))?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let watcher = match watch(&self.mountpoint, self.interval, event_tx) {
            Ok(watcher) => watcher,
            Err(e) => {
                self.mirror = Some(mirror);
                return Err(e);
            }
        };

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let interval = self.interval;
        let mountpoint = self.mountpoint.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; mount already synced.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    Some(path) = event_rx.recv() => {
                        let mut changed = BTreeSet::from([path]);
                        while let Ok(path) = event_rx.try_recv() {
                            changed.insert(path);
                        }
                        if let Err(e) = mirror.push_changes(changed).await {
                            tracing::warn!(
                                mountpoint = %mountpoint.display(),
                                error = %e,
                                "failed to push local changes"
                            );
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = mirror.pull().await {
                            tracing::warn!(
                                mountpoint = %mountpoint.display(),
                                error = %e,
                                "failed to poll store"
                            );
                        }
                    }
                }
            }

            // Events still in flight are covered by one full pass.
            mirror.sync().await.map(|_| ())
        });

        tracing::debug!(mountpoint = %self.mountpoint.display(), "mirror worker started");
        self.worker = Some(Worker {
            _watcher: watcher,
            shutdown_tx: Some(shutdown_tx),
            task,
        });
        Ok(())
    }

    async fn unmount(&mut self) -> BackendResult<()> {
        self.mirror = None;
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };

        // The receiver is only gone if the task already finished.
        if let Some(shutdown_tx) = worker.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        // The worker stays owned here until the task is joined, so an
        // unmount cancelled at this await is resumed by the next call.
        let joined = (&mut worker.task).await;
        self.worker = None;

        tracing::debug!(mountpoint = %self.mountpoint.display(), "mirror worker stopped");
        match joined {
            Ok(result) => result,
            Err(e) => Err(BackendError::Worker(e.to_string())),
        }
    }
}

/// Watch `root` recursively, forwarding every changed path to `tx`.
fn watch(
    root: &Path,
    poll_interval: Duration,
    tx: mpsc::UnboundedSender<PathBuf>,
) -> BackendResult<RecommendedWatcher> {
    let rescan_root = root.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            let Ok(event) = result else {
                return;
            };
            // Lost events: ask for a walk of the whole tree.
            if event.need_rescan() {
                let _ = tx.send(rescan_root.clone());
                return;
            }
            if matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
        },
        notify::Config::default().with_poll_interval(poll_interval),
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SyncStats {
    pushed: usize,
    pulled: usize,
    failed: usize,
}

impl SyncStats {
    fn is_empty(&self) -> bool {
        self.pushed + self.pulled + self.failed == 0
    }
}

/// Reconciliation state for one volume.
struct Mirror {
    store: Arc<dyn KvStore>,
    /// Root prefix without surrounding slashes.
    prefix: String,
    root: PathBuf,
    /// `root` with symlinks resolved, as some watchers report it.
    canonical_root: Option<PathBuf>,
    /// Last content both sides agreed on, by relative key.
    synced: HashMap<String, Vec<u8>>,
}

impl Mirror {
    fn new(store: Arc<dyn KvStore>, prefix: &str, root: &Path) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            root: root.to_path_buf(),
            canonical_root: std::fs::canonicalize(root).ok(),
            synced: HashMap::new(),
        }
    }

    fn store_key(&self, rel: &str) -> String {
        if self.prefix.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{}", self.prefix, rel)
        }
    }

    fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Key for an absolute path reported by the watcher. `Some("")` is the
    /// root itself.
    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path
            .strip_prefix(&self.root)
            .ok()
            .or_else(|| path.strip_prefix(self.canonical_root.as_deref()?).ok())?;
        if rel.as_os_str().is_empty() {
            return Some(String::new());
        }
        relative_key(rel)
    }

    /// Store entries under the prefix, keyed relative to it.
    async fn list_remote(&self) -> BackendResult<HashMap<String, Vec<u8>>> {
        let list_prefix = self.list_prefix();
        Ok(self
            .store
            .list(&list_prefix)
            .await?
            .into_iter()
            .filter_map(|(key, value)| {
                let rel = key.strip_prefix(&list_prefix)?;
                is_safe_relative(rel).then(|| (rel.to_string(), value))
            })
            .collect())
    }

    /// Full three-way pass over every file and every key.
    ///
    /// Listing either side is fatal for the pass; a failure on a single key
    /// is logged and retried later.
    async fn sync(&mut self) -> BackendResult<SyncStats> {
        let disk = scan(&self.root).await?;
        let remote = self.list_remote().await?;

        let keys: BTreeSet<String> = disk
            .keys()
            .chain(remote.keys())
            .chain(self.synced.keys())
            .cloned()
            .collect();

        let mut stats = SyncStats::default();
        for key in keys {
            self.reconcile(&key, disk.get(&key), remote.get(&key), &mut stats)
                .await;
        }

        if !stats.is_empty() {
            tracing::trace!(root = %self.root.display(), ?stats, "mirror pass");
        }
        Ok(stats)
    }

    /// Push the files behind watcher-reported paths.
    ///
    /// A path naming a directory covers everything beneath it, including
    /// files that disappeared with it.
    async fn push_changes(&mut self, paths: BTreeSet<PathBuf>) -> BackendResult<SyncStats> {
        let mut keys = BTreeSet::new();
        for path in paths {
            let Some(key) = self.key_for(&path) else {
                continue;
            };
            if key.is_empty() {
                return self.sync().await;
            }

            let nested = format!("{key}/");
            keys.extend(self.synced.keys().filter(|k| k.starts_with(&nested)).cloned());

            let abs = self.root.join(&key);
            if tokio::fs::symlink_metadata(&abs).await.is_ok_and(|m| m.is_dir()) {
                keys.extend(scan(&abs).await?.into_keys().map(|k| format!("{nested}{k}")));
            } else {
                keys.insert(key);
            }
        }

        let mut stats = SyncStats::default();
        for key in keys {
            let local = read_local(&self.root.join(&key)).await?;
            if local.as_ref() == self.synced.get(&key) {
                continue;
            }
            self.push_key(&key, local, &mut stats).await;
        }

        if !stats.is_empty() {
            tracing::trace!(root = %self.root.display(), ?stats, "pushed local changes");
        }
        Ok(stats)
    }

    /// Apply store changes made since the last agreed snapshot.
    async fn pull(&mut self) -> BackendResult<SyncStats> {
        let remote = self.list_remote().await?;
        let moved: BTreeSet<String> = remote
            .keys()
            .chain(self.synced.keys())
            .filter(|k| remote.get(*k) != self.synced.get(*k))
            .cloned()
            .collect();

        let mut stats = SyncStats::default();
        for key in moved {
            let local = read_local(&self.root.join(&key)).await?;
            self.reconcile(&key, local.as_ref(), remote.get(&key), &mut stats)
                .await;
        }

        if !stats.is_empty() {
            tracing::trace!(root = %self.root.display(), ?stats, "pulled store changes");
        }
        Ok(stats)
    }

    /// Settle one key given both sides' current content.
    async fn reconcile(
        &mut self,
        key: &str,
        local: Option<&Vec<u8>>,
        stored: Option<&Vec<u8>>,
        stats: &mut SyncStats,
    ) {
        if local == stored {
            self.agree(key, local.cloned());
        } else if local != self.synced.get(key) {
            self.push_key(key, local.cloned(), stats).await;
        } else {
            match self.write_local(key, stored).await {
                Ok(()) => {
                    stats.pulled += 1;
                    self.agree(key, stored.cloned());
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to pull key to disk");
                    stats.failed += 1;
                }
            }
        }
    }

    async fn push_key(&mut self, key: &str, local: Option<Vec<u8>>, stats: &mut SyncStats) {
        let store_key = self.store_key(key);
        let result = match &local {
            Some(data) => self.store.put(&store_key, data).await,
            None => self.store.delete(&store_key).await,
        };
        match result {
            Ok(()) => {
                stats.pushed += 1;
                self.agree(key, local);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to push file to store");
                stats.failed += 1;
            }
        }
    }

    fn agree(&mut self, key: &str, content: Option<Vec<u8>>) {
        match content {
            Some(data) => {
                self.synced.insert(key.to_string(), data);
            }
            None => {
                self.synced.remove(key);
            }
        }
    }

    async fn write_local(&self, key: &str, stored: Option<&Vec<u8>>) -> BackendResult<()> {
        let path = self.root.join(key);
        match stored {
            Some(data) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, data).await?;
            }
            None => {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                self.prune_empty_parents(&path).await;
            }
        }
        Ok(())
    }

    /// Remove directories left empty by a pulled delete, up to the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

/// A store key maps to a path under the mountpoint only if every component
/// is a plain name.
fn is_safe_relative(rel: &str) -> bool {
    !rel.is_empty()
        && !rel.starts_with('/')
        && Path::new(rel)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// `/`-joined key for a relative path; `None` for anything but plain UTF-8
/// names.
fn relative_key(rel: &Path) -> Option<String> {
    let parts = rel
        .components()
        .map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Content of the regular file at `path`, `None` if there is none.
async fn read_local(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Every regular file under `root`, keyed relative to it.
async fn scan(root: &Path) -> BackendResult<HashMap<String, Vec<u8>>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_dir(&root))
        .await
        .map_err(|e| BackendError::Worker(e.to_string()))?
        .map_err(BackendError::from)
}

/// Symlinks and names that are not valid UTF-8 are skipped.
fn scan_dir(root: &Path) -> std::io::Result<HashMap<String, Vec<u8>>> {
    let mut files = HashMap::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            // Removed while walking.
            Err(e) if e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => {
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(key) = entry.path().strip_prefix(root).ok().and_then(relative_key) else {
            tracing::debug!(path = %entry.path().display(), "skipping unmappable name");
            continue;
        };
        match std::fs::read(entry.path()) {
            Ok(data) => {
                files.insert(key, data);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreKind;
    use crate::store::MemoryStore;

    fn mirror(store: &Arc<MemoryStore>, prefix: &str, root: &Path) -> Mirror {
        Mirror::new(store.clone(), prefix, root)
    }

    /// Poll until `check` passes or a generous deadline expires.
    async fn eventually<F, Fut>(check: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..250 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_pull_store_entries_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put("vol/a.txt", b"alpha").await.unwrap();
        store.put("vol/sub/b.txt", b"beta").await.unwrap();
        store.put("other/c.txt", b"gamma").await.unwrap();

        let mut m = mirror(&store, "vol", dir.path());
        let stats = m.sync().await.unwrap();

        assert_eq!(stats.pulled, 2);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dir.path().join("sub/b.txt")).unwrap(), b"beta");
        assert!(!dir.path().join("c.txt").exists());
    }

    #[tokio::test]
    async fn test_push_local_changes_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut m = mirror(&store, "", dir.path());
        m.sync().await.unwrap();

        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/new.txt"), b"fresh").unwrap();
        let stats = m.sync().await.unwrap();

        assert_eq!(stats.pushed, 1);
        assert_eq!(store.get("nested/new.txt").await.unwrap(), Some(b"fresh".to_vec()));

        std::fs::remove_file(dir.path().join("nested/new.txt")).unwrap();
        m.sync().await.unwrap();
        assert_eq!(store.get("nested/new.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_changes_for_reported_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut m = mirror(&store, "v", dir.path());
        m.sync().await.unwrap();

        std::fs::write(dir.path().join("reported"), b"1").unwrap();
        std::fs::write(dir.path().join("unreported"), b"2").unwrap();

        let stats = m
            .push_changes(BTreeSet::from([dir.path().join("reported")]))
            .await
            .unwrap();
        assert_eq!(stats.pushed, 1);
        assert_eq!(store.get("v/reported").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("v/unreported").await.unwrap(), None);

        // A second report of the same content is a no-op.
        let stats = m
            .push_changes(BTreeSet::from([dir.path().join("reported")]))
            .await
            .unwrap();
        assert!(stats.is_empty());
    }

    #[tokio::test]
    async fn test_push_changes_removed_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put("logs/a", b"a").await.unwrap();
        store.put("logs/deep/b", b"b").await.unwrap();
        store.put("keep", b"k").await.unwrap();

        let mut m = mirror(&store, "", dir.path());
        m.sync().await.unwrap();

        std::fs::remove_dir_all(dir.path().join("logs")).unwrap();
        let stats = m
            .push_changes(BTreeSet::from([dir.path().join("logs")]))
            .await
            .unwrap();

        assert_eq!(stats.pushed, 2);
        assert!(store.list("logs/").await.unwrap().is_empty());
        assert_eq!(store.get("keep").await.unwrap(), Some(b"k".to_vec()));
    }

    #[tokio::test]
    async fn test_pull_touches_only_moved_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put("same", b"s").await.unwrap();

        let mut m = mirror(&store, "", dir.path());
        m.sync().await.unwrap();

        store.put("new", b"n").await.unwrap();
        let stats = m.pull().await.unwrap();

        assert_eq!(stats, SyncStats { pulled: 1, ..SyncStats::default() });
        assert_eq!(std::fs::read(dir.path().join("new")).unwrap(), b"n");
    }

    #[tokio::test]
    async fn test_store_delete_removes_file_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put("deep/er/file", b"x").await.unwrap();

        let mut m = mirror(&store, "", dir.path());
        m.sync().await.unwrap();
        assert!(dir.path().join("deep/er/file").exists());

        store.delete("deep/er/file").await.unwrap();
        m.pull().await.unwrap();

        assert!(!dir.path().join("deep").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_local_change_wins_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put("f", b"base").await.unwrap();

        let mut m = mirror(&store, "", dir.path());
        m.sync().await.unwrap();

        store.put("f", b"remote").await.unwrap();
        std::fs::write(dir.path().join("f"), b"local").unwrap();
        m.pull().await.unwrap();

        assert_eq!(store.get("f").await.unwrap(), Some(b"local".to_vec()));
        assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_unsafe_keys_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("mnt");
        std::fs::create_dir(&inner).unwrap();

        let store = Arc::new(MemoryStore::new());
        store.put("vol/../escape", b"no").await.unwrap();
        store.put("vol//abs", b"no").await.unwrap();
        store.put("vol/ok", b"yes").await.unwrap();

        let mut m = mirror(&store, "vol", &inner);
        m.sync().await.unwrap();

        assert!(!dir.path().join("escape").exists());
        assert_eq!(std::fs::read(inner.join("ok")).unwrap(), b"yes");
    }

    #[tokio::test]
    async fn test_watcher_pushes_local_writes() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(StoreConnector::new());
        let config = StoreConfig {
            kind: StoreKind::Memory,
            addrs: vec!["watch".into()],
            root: "w".into(),
        };

        // The store poll never fires; only the watcher can see the write.
        let service = MirrorService::new(connector.clone()).with_interval(Duration::from_secs(3600));
        let mut handle = service.mount(&config, dir.path()).await.unwrap();
        handle.serve().unwrap();

        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();

        let store = connector.connect(&config).await.unwrap();
        let pushed = eventually(|| {
            let store = store.clone();
            async move { store.get("w/hello.txt").await.unwrap().is_some() }
        })
        .await;
        assert!(pushed);

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_unmount_flushes_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(StoreConnector::new());
        let config = StoreConfig {
            kind: StoreKind::Memory,
            addrs: vec!["flush".into()],
            root: "/v/".into(),
        };

        let service = MirrorService::new(connector.clone()).with_interval(Duration::from_secs(3600));
        let mut handle = service.mount(&config, dir.path()).await.unwrap();
        handle.serve().unwrap();

        std::fs::write(dir.path().join("late.txt"), b"written").unwrap();
        handle.unmount().await.unwrap();

        let store = connector.connect(&config).await.unwrap();
        assert_eq!(store.get("v/late.txt").await.unwrap(), Some(b"written".to_vec()));
    }

    #[tokio::test]
    async fn test_cancelled_unmount_is_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(StoreConnector::new());
        let config = StoreConfig::new(StoreKind::Memory, vec!["resume".into()]);

        let service = MirrorService::new(connector.clone()).with_interval(Duration::from_millis(10));
        let mut handle = service.mount(&config, dir.path()).await.unwrap();
        handle.serve().unwrap();

        let first = tokio::time::timeout(Duration::ZERO, handle.unmount()).await;
        assert!(first.is_err());

        // Must wait for the worker the first call left running.
        handle.unmount().await.unwrap();

        std::fs::write(dir.path().join("after.txt"), b"too late").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let store = connector.connect(&config).await.unwrap();
        assert_eq!(store.get("after.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_serve_twice_and_unmount_twice() {
        let dir = tempfile::tempdir().unwrap();
        let service = MirrorService::new(Arc::new(StoreConnector::new()));
        let config = StoreConfig::new(StoreKind::Memory, vec!["x".into()]);

        let mut handle = service.mount(&config, dir.path()).await.unwrap();
        handle.serve().unwrap();
        assert!(matches!(handle.serve(), Err(BackendError::AlreadyServing)));

        handle.unmount().await.unwrap();
        handle.unmount().await.unwrap();
        assert!(handle.serve().is_err());
    }

    #[tokio::test]
    async fn test_mount_unsupported_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let service = MirrorService::new(Arc::new(StoreConnector::new()));
        let config = StoreConfig::new(StoreKind::Consul, vec!["127.0.0.1:8500".into()]);

        let result = service.mount(&config, dir.path()).await;
        assert!(matches!(result, Err(BackendError::Store(_))));
    }
}
