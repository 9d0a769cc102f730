//! Volume lifecycle manager.
//!
//! The public operation surface behind the plugin transport. Every
//! operation takes the registry lock for its whole duration, so the seven
//! operations are serialized against each other. Create and Remove call
//! into the backend while holding it; backend calls never re-enter the
//! manager.
//!
//! # Per-volume state
//!
//! ```text
//! absent ──Create──► created (backend serving, usage 0)
//!                      │  ▲
//!             Mount/Unmount (usage ± 1, backend untouched)
//!                      │
//!                   Remove (usage must be 0) / shutdown
//!                      ▼
//!                    absent
//! ```
//!
//! Mount lifetime follows volume existence, not usage: Unmount never stops
//! the backend, only Remove and shutdown do.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::timeout;

use crate::backend::{BackendError, BackendResult, FilesystemService};
use crate::config::DriverConfig;
use crate::error::{VolumeError, VolumeResult};
use crate::paths;
use crate::registry::Registry;
use crate::volume::{VolumeInfo, VolumeRecord};

/// Outcome of [`VolumeManager::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Volumes unmounted with their mountpoint removed.
    pub cleaned: Vec<String>,
    /// Volumes whose unmount or directory removal failed.
    pub failed: Vec<String>,
    /// Whether the home directory was removed.
    pub home_removed: bool,
}

/// Serializes volume lifecycle requests and owns every mounted backend.
pub struct VolumeManager {
    config: DriverConfig,
    service: Arc<dyn FilesystemService>,
    registry: Registry,
}

impl std::fmt::Debug for VolumeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl VolumeManager {
    /// Create a manager with an empty registry.
    pub fn new(config: DriverConfig, service: Arc<dyn FilesystemService>) -> Self {
        Self {
            config,
            service,
            registry: Registry::new(),
        }
    }

    /// Base directory of all mountpoints.
    pub fn home(&self) -> &Path {
        &self.config.home
    }

    /// Settings the manager was started with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Create a volume, or return the mountpoint of the existing one.
    ///
    /// An existing volume is returned unchanged even if `opts` differ from
    /// the ones it was created with.
    #[tracing::instrument(skip(self, opts), name = "volume.create")]
    pub async fn create(&self, name: &str, opts: &HashMap<String, String>) -> VolumeResult<PathBuf> {
        let mut volumes = self.registry.lock().await;
        if let Ok(existing) = volumes.get(name) {
            tracing::debug!("volume already exists");
            return Ok(existing.mountpoint().to_path_buf());
        }

        paths::validate_name(name)?;
        let store = self.config.defaults.with_options(opts)?;
        let mountpoint = paths::mountpoint(&self.config.home, name);

        create_mountpoint(&mountpoint).await?;

        let mounted = self
            .bounded(name, "mount", self.service.mount(&store, &mountpoint))
            .await;
        let mut backend = match mounted {
            Ok(backend) => backend,
            Err(e) => {
                discard_mountpoint(&mountpoint).await;
                return Err(e);
            }
        };

        if let Err(source) = backend.serve() {
            if let Err(e) = self.bounded(name, "unmount", backend.unmount()).await {
                tracing::warn!(error = %e, "failed to unmount backend that would not serve");
            }
            discard_mountpoint(&mountpoint).await;
            return Err(VolumeError::Mount {
                name: name.to_string(),
                source,
            });
        }

        volumes.insert(VolumeRecord::new(name, mountpoint.clone(), backend));
        tracing::info!(
            mountpoint = %mountpoint.display(),
            store = %store.kind,
            root = %store.root,
            "volume created"
        );
        Ok(mountpoint)
    }

    /// Look up a volume.
    pub async fn get(&self, name: &str) -> VolumeResult<VolumeInfo> {
        let volumes = self.registry.lock().await;
        Ok(volumes.get(name)?.info())
    }

    /// All volumes, in no particular order.
    pub async fn list(&self) -> Vec<VolumeInfo> {
        self.registry.lock().await.infos()
    }

    /// Unmount a volume's backend, delete its mountpoint and forget it.
    ///
    /// Fails with [`VolumeError::Busy`] while the volume has consumers. If
    /// the backend fails to unmount, the volume stays registered so that
    /// shutdown cleanup tries again. Once the backend is unmounted the
    /// volume is forgotten even if removing the directory then fails.
    #[tracing::instrument(skip(self), name = "volume.remove")]
    pub async fn remove(&self, name: &str) -> VolumeResult<PathBuf> {
        let mut volumes = self.registry.lock().await;

        let mountpoint = {
            let record = volumes.get_mut(name)?;
            if record.usage() > 0 {
                return Err(VolumeError::Busy {
                    name: name.to_string(),
                    usage: record.usage(),
                });
            }
            self.unmount_record(record).await?;
            record.mountpoint().to_path_buf()
        };
        volumes.remove(name);

        remove_mountpoint(&mountpoint).await?;
        tracing::info!(mountpoint = %mountpoint.display(), "volume removed");
        Ok(mountpoint)
    }

    /// Mountpoint of an existing volume.
    pub async fn path(&self, name: &str) -> VolumeResult<PathBuf> {
        let volumes = self.registry.lock().await;
        Ok(volumes.get(name)?.mountpoint().to_path_buf())
    }

    /// Register one more consumer. The backend is already serving.
    pub async fn mount(&self, name: &str) -> VolumeResult<PathBuf> {
        let mut volumes = self.registry.lock().await;
        let record = volumes.get_mut(name)?;
        let usage = record.acquire();
        tracing::debug!(volume = %name, usage, "volume mounted");
        Ok(record.mountpoint().to_path_buf())
    }

    /// Drop one consumer. The backend keeps serving until Remove.
    pub async fn unmount(&self, name: &str) -> VolumeResult<PathBuf> {
        let mut volumes = self.registry.lock().await;
        let record = volumes.get_mut(name)?;
        match record.release() {
            Some(usage) => tracing::debug!(volume = %name, usage, "volume unmounted"),
            None => tracing::warn!(volume = %name, "unmount without a matching mount"),
        }
        Ok(record.mountpoint().to_path_buf())
    }

    /// Current usage count of a volume.
    pub async fn usage(&self, name: &str) -> VolumeResult<usize> {
        let volumes = self.registry.lock().await;
        Ok(volumes.get(name)?.usage())
    }

    /// Unmount and delete every volume, then remove the home directory.
    ///
    /// Best effort: a failing volume is logged and skipped. Meant to run
    /// once, when the process is about to exit.
    pub async fn shutdown(&self) -> CleanupReport {
        // Released before any slow I/O; no new requests are expected.
        let records = self.registry.lock().await.drain();
        let mut report = CleanupReport::default();

        for mut record in records {
            let name = record.name().to_string();
            let result = match self.unmount_record(&mut record).await {
                Ok(()) => remove_mountpoint(record.mountpoint()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.cleaned.push(name),
                Err(e) => {
                    tracing::warn!(volume = %name, error = %e, "volume cleanup failed");
                    report.failed.push(name);
                }
            }
        }

        match tokio::fs::remove_dir_all(&self.config.home).await {
            Ok(()) => report.home_removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(home = %self.config.home.display(), error = %e, "failed to remove home");
            }
        }

        tracing::info!(
            cleaned = report.cleaned.len(),
            failed = report.failed.len(),
            "volume cleanup finished"
        );
        report
    }

    async fn unmount_record(&self, record: &mut VolumeRecord) -> VolumeResult<()> {
        let name = record.name().to_string();
        match timeout(self.config.backend_timeout, record.backend_mut().unmount()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(VolumeError::Unmount { name, source }),
            Err(_) => Err(VolumeError::Timeout {
                name,
                op: "unmount",
                after: self.config.backend_timeout,
            }),
        }
    }

    /// Run a backend call under the configured timeout.
    async fn bounded<T>(
        &self,
        name: &str,
        op: &'static str,
        call: impl Future<Output = BackendResult<T>>,
    ) -> VolumeResult<T> {
        match timeout(self.config.backend_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(backend_error(name, op, source)),
            Err(_) => Err(VolumeError::Timeout {
                name: name.to_string(),
                op,
                after: self.config.backend_timeout,
            }),
        }
    }
}

fn backend_error(name: &str, op: &'static str, source: BackendError) -> VolumeError {
    let name = name.to_string();
    if op == "unmount" {
        VolumeError::Unmount { name, source }
    } else {
        VolumeError::Mount { name, source }
    }
}

async fn create_mountpoint(path: &Path) -> VolumeResult<()> {
    tokio::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .await
        .map_err(|e| VolumeError::directory(path, e))
}

async fn remove_mountpoint(path: &Path) -> VolumeResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VolumeError::directory(path, e)),
    }
}

/// Roll back a mountpoint created for a volume that never came up.
async fn discard_mountpoint(path: &Path) {
    if let Err(e) = remove_mountpoint(path).await {
        tracing::warn!(error = %e, "failed to roll back mountpoint");
    }
}
