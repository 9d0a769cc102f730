//! Volume registry.
//!
//! One exclusive lock guards the whole name → record map, including every
//! record's usage count. All access goes through [`RegistryGuard`], which
//! only exposes operations that keep the map consistent.

use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{VolumeError, VolumeResult};
use crate::volume::{VolumeInfo, VolumeRecord};

/// Registry of live volumes.
///
/// The lock is async because callers hold it across backend mount and
/// unmount calls.
#[derive(Debug, Default)]
pub struct Registry {
    volumes: Mutex<HashMap<String, VolumeRecord>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the registry lock.
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            volumes: self.volumes.lock().await,
        }
    }
}

/// Exclusive access to the registry; released on drop.
pub struct RegistryGuard<'a> {
    volumes: MutexGuard<'a, HashMap<String, VolumeRecord>>,
}

impl RegistryGuard<'_> {
    /// Look up a record.
    pub fn get(&self, name: &str) -> VolumeResult<&VolumeRecord> {
        self.volumes
            .get(name)
            .ok_or_else(|| VolumeError::not_found(name))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> VolumeResult<&mut VolumeRecord> {
        self.volumes
            .get_mut(name)
            .ok_or_else(|| VolumeError::not_found(name))
    }

    /// Register a record. The caller has checked that the name is free.
    pub(crate) fn insert(&mut self, record: VolumeRecord) {
        let name = record.name().to_string();
        let previous = self.volumes.insert(name, record);
        debug_assert!(previous.is_none(), "volume registered twice");
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<VolumeRecord> {
        self.volumes.remove(name)
    }

    /// Remove every record, for shutdown.
    pub(crate) fn drain(&mut self) -> Vec<VolumeRecord> {
        self.volumes.drain().map(|(_, record)| record).collect()
    }

    /// Snapshot of all volumes, in no particular order.
    pub fn infos(&self) -> Vec<VolumeInfo> {
        self.volumes.values().map(VolumeRecord::info).collect()
    }
}
