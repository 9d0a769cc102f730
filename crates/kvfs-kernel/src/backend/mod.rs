//! Backend filesystem service abstraction.
//!
//! The volume manager never implements filesystem semantics. It asks a
//! [`FilesystemService`] to mount a store at a directory and gets back a
//! [`BackendHandle`] it owns for the lifetime of the volume:
//!
//! ```text
//! FilesystemService::mount(config, mountpoint)
//!         │
//!         ▼
//!   BackendHandle ──serve()──► watcher + background worker (touch mountpoint)
//!         │
//!         └──unmount()──► worker stopped, mountpoint safe to delete
//! ```
//!
//! [`MirrorService`] is the implementation shipped with the daemon.

mod mirror;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::store::StoreError;

pub use mirror::{MirrorHandle, MirrorService, DEFAULT_SYNC_INTERVAL};

/// Backend error type.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store could not be reached or used.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error on the mountpoint.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The mountpoint could not be watched.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// `serve()` was called on a handle that already has a worker.
    #[error("backend is already serving")]
    AlreadyServing,

    /// The background worker failed or panicked.
    #[error("backend worker failed: {0}")]
    Worker(String),
}

/// Backend result type.
pub type BackendResult<T> = Result<T, BackendError>;

/// Factory producing mounted backends.
#[async_trait]
pub trait FilesystemService: Send + Sync {
    /// Connect to the store and present it at `mountpoint`.
    ///
    /// The directory already exists when this is called. On error nothing
    /// is left running.
    async fn mount(
        &self,
        config: &StoreConfig,
        mountpoint: &Path,
    ) -> BackendResult<Box<dyn BackendHandle>>;
}

/// A mounted backend, exclusively owned by one volume.
#[async_trait]
pub trait BackendHandle: Send + Sync {
    /// Start handling filesystem work in the background.
    ///
    /// Returns immediately. Must be called from within a tokio runtime.
    fn serve(&mut self) -> BackendResult<()>;

    /// Stop serving.
    ///
    /// Does not return until the worker has stopped touching the
    /// mountpoint. Calling it on a handle that is not serving is a no-op.
    async fn unmount(&mut self) -> BackendResult<()>;
}
