//! # kvfs-kernel
//!
//! Volume lifecycle core for the kvfs volume plugin.
//!
//! A volume is a named directory under the driver's home whose content is
//! kept in a key-value store. The kernel:
//! - Tracks every volume and its consumer count in a [`Registry`]
//! - Creates and removes mountpoint directories
//! - Asks a [`FilesystemService`] to mount the store at a mountpoint and owns
//!   the resulting [`BackendHandle`] until the volume is removed
//! - Unmounts and deletes everything on [`VolumeManager::shutdown`]
//!
//! [`MirrorService`] is the shipped backend: it keeps a store prefix and a
//! directory tree in sync from a background task.

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod paths;
pub mod registry;
pub mod store;
pub mod volume;

pub use backend::{
    BackendError, BackendHandle, BackendResult, FilesystemService, MirrorHandle, MirrorService,
    DEFAULT_SYNC_INTERVAL,
};
pub use config::{ConfigError, DriverConfig, StoreConfig, StoreKind, DEFAULT_BACKEND_TIMEOUT};
pub use error::{VolumeError, VolumeResult};
pub use manager::{CleanupReport, VolumeManager};
pub use registry::{Registry, RegistryGuard};
pub use store::{FileStore, KvStore, MemoryStore, StoreConnector, StoreError, StoreResult};
pub use volume::{VolumeInfo, VolumeRecord};
