//! Daemon configuration constants.
//!
//! Defaults for the command line plus the fixed parts of the plugin
//! protocol.

use std::time::Duration;

/// Default base directory for volume mountpoints.
pub const DEFAULT_HOME: &str = "/var/run/kvfs";

/// Default plugin socket. Docker discovers plugins in this directory.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker/plugins/kvfs.sock";

/// Default store kind for volumes created without a `store` option.
pub const DEFAULT_STORE: &str = "memory";

/// Default bound on a backend mount or unmount, in seconds.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;

/// Default mirror reconciliation interval, in milliseconds.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 500;

/// Content type of every plugin protocol response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Largest request body accepted.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// How long open connections get to finish after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
