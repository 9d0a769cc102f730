//! kvfs server library
//!
//! Docker volume plugin daemon: the plugin socket transport, its protocol
//! messages and command line configuration. Volume semantics live in
//! `kvfs-kernel`.

pub mod config;
pub mod constants;
pub mod plugin;
pub mod protocol;
pub mod transport;

pub use config::Args;
pub use plugin::{PluginHandler, PluginServer};
pub use protocol::{ActivateResponse, Volume, VolumeRequest, VolumeResponse};
pub use transport::TransportError;
