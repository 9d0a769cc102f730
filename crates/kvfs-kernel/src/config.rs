//! Store selection and driver configuration.
//!
//! A volume's content lives under a key prefix (`root`) of one store. The
//! driver carries a default [`StoreConfig`]; create-time options may override
//! any of its three fields.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::EnumString;
use thiserror::Error;

use crate::error::{VolumeError, VolumeResult};

/// Option key overriding the store kind.
pub const OPT_STORE: &str = "store";
/// Option key overriding the address list (comma separated).
pub const OPT_ADDRS: &str = "addrs";
/// Option key setting the root key prefix.
pub const OPT_ROOT: &str = "root";

/// Default bound on backend mount/unmount calls.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Supported key-value store kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StoreKind {
    /// Process-local map, shared by every volume naming the same address.
    #[default]
    Memory,
    /// JSON document on local disk; the first address is the file path.
    #[strum(serialize = "file", serialize = "boltdb")]
    File,
    /// HashiCorp Consul.
    Consul,
    /// etcd.
    Etcd,
    /// Apache ZooKeeper.
    #[strum(serialize = "zookeeper", serialize = "zk")]
    Zookeeper,
}

impl StoreKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::File => "file",
            StoreKind::Consul => "consul",
            StoreKind::Etcd => "etcd",
            StoreKind::Zookeeper => "zookeeper",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection parameters handed to the backend filesystem service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which store adapter to use.
    pub kind: StoreKind,
    /// Store addresses, at least one.
    pub addrs: Vec<String>,
    /// Key prefix under which the volume's entries live.
    pub root: String,
}

impl StoreConfig {
    /// Create a config with an empty root prefix.
    pub fn new(kind: StoreKind, addrs: Vec<String>) -> Self {
        Self {
            kind,
            addrs,
            root: String::new(),
        }
    }

    /// Apply create-time options on top of this config.
    ///
    /// Recognized keys are `store`, `addrs` and `root`; anything else is
    /// ignored so callers can pass through options meant for other layers.
    pub fn with_options(&self, opts: &HashMap<String, String>) -> VolumeResult<Self> {
        let mut resolved = self.clone();

        if let Some(kind) = opts.get(OPT_STORE) {
            resolved.kind = StoreKind::from_str(kind.trim()).ok_or_else(|| {
                VolumeError::invalid_option(OPT_STORE, format!("unknown store kind {kind:?}"))
            })?;
        }

        if let Some(addrs) = opts.get(OPT_ADDRS) {
            resolved.addrs = parse_addrs(addrs);
        }

        if let Some(root) = opts.get(OPT_ROOT) {
            resolved.root = root.clone();
        }

        if resolved.addrs.is_empty() {
            return Err(VolumeError::invalid_option(OPT_ADDRS, "no store addresses"));
        }

        Ok(resolved)
    }

    /// The root prefix with surrounding slashes removed.
    pub fn key_prefix(&self) -> &str {
        self.root.trim_matches('/')
    }
}

/// Split a comma-separated address list, dropping empty entries.
pub fn parse_addrs(addrs: &str) -> Vec<String> {
    addrs
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

/// Startup configuration errors. These are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("need at least one addr to connect to kv store")]
    NoAddresses,
}

/// Startup-time settings for the volume manager.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Base directory for all mountpoints.
    pub home: PathBuf,
    /// Store used when a volume's options do not say otherwise.
    pub defaults: StoreConfig,
    /// Upper bound on a single backend mount or unmount.
    pub backend_timeout: Duration,
}

impl DriverConfig {
    /// Build a driver config, rejecting an empty address list.
    pub fn new(
        home: impl Into<PathBuf>,
        kind: StoreKind,
        addrs: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let addrs: Vec<String> = addrs.into_iter().filter(|a| !a.trim().is_empty()).collect();
        if addrs.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        Ok(Self {
            home: home.into(),
            defaults: StoreConfig::new(kind, addrs),
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        })
    }

    /// Override the backend timeout.
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }
}
