//! Command line configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use kvfs_kernel::{ConfigError, DriverConfig, MirrorService, StoreConnector, StoreKind};

use crate::constants::{
    DEFAULT_BACKEND_TIMEOUT_SECS, DEFAULT_HOME, DEFAULT_SOCKET_PATH, DEFAULT_STORE,
    DEFAULT_SYNC_INTERVAL_MS,
};

/// Docker volume plugin backed by a key-value store.
#[derive(Parser, Debug, Clone)]
#[command(name = "kvfs")]
#[command(about = "Docker volume plugin serving key-value store prefixes as directories")]
pub struct Args {
    /// Store address; repeat for several. For `file` stores, the path of the data file
    #[arg(long = "addr", value_name = "ADDR")]
    pub addrs: Vec<String>,

    /// Default store kind: memory, file (boltdb), consul, etcd, zookeeper
    #[arg(long, default_value = DEFAULT_STORE, value_parser = parse_store_kind)]
    pub store: StoreKind,

    /// Base directory for volume mountpoints
    #[arg(long, default_value = DEFAULT_HOME)]
    pub home: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Plugin socket path
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    pub listen: PathBuf,

    /// Upper bound on a single backend mount or unmount, in seconds
    #[arg(long, default_value_t = DEFAULT_BACKEND_TIMEOUT_SECS)]
    pub backend_timeout_secs: u64,

    /// Interval between mirror reconciliation passes, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL_MS)]
    pub sync_interval_ms: u64,
}

fn parse_store_kind(s: &str) -> Result<StoreKind, String> {
    StoreKind::from_str(s).ok_or_else(|| format!("unknown store kind {s:?}"))
}

impl Args {
    /// Volume manager configuration. Fails without a store address.
    pub fn driver_config(&self) -> Result<DriverConfig, ConfigError> {
        Ok(DriverConfig::new(&self.home, self.store, self.addrs.clone())?
            .with_backend_timeout(Duration::from_secs(self.backend_timeout_secs)))
    }

    /// The mirror backend, configured with the sync interval.
    pub fn mirror_service(&self) -> MirrorService {
        MirrorService::new(Arc::new(StoreConnector::new()))
            .with_interval(Duration::from_millis(self.sync_interval_ms.max(1)))
    }

    /// Log filter directive for `EnvFilter` when `RUST_LOG` is unset.
    pub fn default_log_level(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["kvfs", "--addr", "local"]);
        assert_eq!(args.store, StoreKind::Memory);
        assert_eq!(args.home, PathBuf::from(DEFAULT_HOME));
        assert_eq!(args.listen, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert!(!args.debug);
        assert_eq!(args.default_log_level(), "info");

        let config = args.driver_config().unwrap();
        assert_eq!(config.backend_timeout, Duration::from_secs(30));
        assert_eq!(config.defaults.addrs, vec!["local"]);
    }

    #[test]
    fn test_repeated_addr_and_store() {
        let args = Args::parse_from([
            "kvfs", "--store", "BoltDB", "--addr", "/a.json", "--addr", "/b.json", "--debug",
        ]);
        assert_eq!(args.store, StoreKind::File);
        assert_eq!(args.addrs, vec!["/a.json", "/b.json"]);
        assert_eq!(args.default_log_level(), "debug");
    }

    #[test]
    fn test_missing_addr_is_fatal() {
        let args = Args::parse_from(["kvfs"]);
        let err = args.driver_config().unwrap_err();
        assert_eq!(err.to_string(), "need at least one addr to connect to kv store");
    }

    #[test]
    fn test_unknown_store_rejected() {
        assert!(Args::try_parse_from(["kvfs", "--store", "redis", "--addr", "x"]).is_err());
    }
}
