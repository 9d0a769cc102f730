//! kvfs daemon binary
//!
//! Docker volume plugin serving key-value store prefixes as directories.
//!
//! ## Usage
//!
//! ```bash
//! # In-process store, default socket and home
//! kvfs --addr local
//!
//! # Volumes persisted to a JSON data file
//! kvfs --store file --addr /var/lib/kvfs/data.json --debug
//!
//! docker volume create -d kvfs -o root=apps/web web
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use kvfs_kernel::VolumeManager;
use kvfs_server::{Args, PluginHandler, PluginServer};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.default_log_level()));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.driver_config()?;

    tokio::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(&config.home)
        .await
        .with_context(|| format!("failed to create home {}", config.home.display()))?;

    tracing::info!(
        home = %config.home.display(),
        store = %config.defaults.kind,
        addrs = ?config.defaults.addrs,
        "starting kvfs"
    );

    let manager = Arc::new(VolumeManager::new(config, Arc::new(args.mirror_service())));
    let server = PluginServer::bind(&args.listen, PluginHandler::new(manager.clone()))
        .await
        .with_context(|| format!("failed to listen on {}", args.listen.display()))?;

    let served = server.run(shutdown_signal()).await;

    let report = manager.shutdown().await;
    if !report.failed.is_empty() {
        tracing::warn!(volumes = ?report.failed, "some volumes were not cleaned up");
    }

    served.context("plugin server failed")
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
