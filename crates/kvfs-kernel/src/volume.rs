//! Volume records.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::BackendHandle;

/// Public view of a volume, returned by Get and List.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Host directory the volume is visible at.
    pub mountpoint: PathBuf,
    /// Active consumers (Mount calls not yet matched by Unmount).
    pub usage: usize,
}

/// A registered volume and the backend serving it.
///
/// Only the registry holds records; everything outside it sees
/// [`VolumeInfo`] snapshots.
pub struct VolumeRecord {
    name: String,
    mountpoint: PathBuf,
    backend: Box<dyn BackendHandle>,
    usage: usize,
}

impl std::fmt::Debug for VolumeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeRecord")
            .field("name", &self.name)
            .field("mountpoint", &self.mountpoint)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

impl VolumeRecord {
    /// Create a record with no consumers.
    pub fn new(name: impl Into<String>, mountpoint: PathBuf, backend: Box<dyn BackendHandle>) -> Self {
        Self {
            name: name.into(),
            mountpoint,
            backend,
            usage: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Snapshot for callers outside the registry.
    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            name: self.name.clone(),
            mountpoint: self.mountpoint.clone(),
            usage: self.usage,
        }
    }

    pub(crate) fn acquire(&mut self) -> usize {
        self.usage += 1;
        self.usage
    }

    /// Drop one consumer. Returns `None` if there was none to drop.
    pub(crate) fn release(&mut self) -> Option<usize> {
        self.usage = self.usage.checked_sub(1)?;
        Some(self.usage)
    }

    pub(crate) fn backend_mut(&mut self) -> &mut dyn BackendHandle {
        self.backend.as_mut()
    }
}
