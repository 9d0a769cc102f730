//! Plugin socket server.
//!
//! Listens on a Unix socket, decodes Docker volume plugin requests and
//! forwards them to the [`VolumeManager`]. Each connection is served by
//! hyper on its own task; the server tracks those tasks so none outlive
//! [`PluginServer::run`].

use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::{Body, Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use kvfs_kernel::{VolumeManager, VolumeResult};

use crate::constants::SHUTDOWN_GRACE;
use crate::protocol::{ActivateResponse, VolumeRequest, VolumeResponse};
use crate::transport::{TransportError, json_response, read_body};

/// Maps plugin endpoints onto manager operations.
#[derive(Debug, Clone)]
pub struct PluginHandler {
    manager: Arc<VolumeManager>,
}

impl PluginHandler {
    pub fn new(manager: Arc<VolumeManager>) -> Self {
        Self { manager }
    }

    /// Handle one request.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if request.method() != Method::POST {
            return json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &VolumeResponse::error("plugin endpoints accept POST only"),
            );
        }

        let path = request.uri().path().to_string();
        tracing::trace!(path = %path, "plugin request");

        if path == "/Plugin.Activate" {
            return json_response(StatusCode::OK, &ActivateResponse::default());
        }

        let Some(endpoint) = path.strip_prefix("/VolumeDriver.") else {
            return not_found(&path);
        };

        let body = match read_body(request.into_body()).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "unreadable request body");
                return json_response(e.status(), &VolumeResponse::error(&e));
            }
        };

        let request: VolumeRequest = if body.iter().all(u8::is_ascii_whitespace) {
            VolumeRequest::default()
        } else {
            match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(endpoint, error = %e, "undecodable request body");
                    return json_response(
                        StatusCode::BAD_REQUEST,
                        &VolumeResponse::error(format!("invalid request body: {e}")),
                    );
                }
            }
        };

        let result = match endpoint {
            "Create" => mountpoint(self.manager.create(&request.name, &request.opts).await),
            "Remove" => mountpoint(self.manager.remove(&request.name).await),
            "Mount" => mountpoint(self.manager.mount(&request.name).await),
            "Unmount" => mountpoint(self.manager.unmount(&request.name).await),
            "Path" => mountpoint(self.manager.path(&request.name).await),
            "Get" => self.manager.get(&request.name).await.map(VolumeResponse::volume),
            "List" => Ok(VolumeResponse::volumes(self.manager.list().await)),
            "Capabilities" => Ok(VolumeResponse::capabilities()),
            _ => return not_found(&path),
        };

        match result {
            Ok(response) => json_response(StatusCode::OK, &response),
            Err(e) => {
                tracing::warn!(endpoint, volume = %request.name, id = %request.id, error = %e, "request failed");
                json_response(StatusCode::INTERNAL_SERVER_ERROR, &VolumeResponse::error(e))
            }
        }
    }
}

fn mountpoint(result: VolumeResult<PathBuf>) -> VolumeResult<VolumeResponse> {
    result.map(|path| VolumeResponse::mountpoint(&path))
}

fn not_found(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &VolumeResponse::error(format!("unknown endpoint {path}")),
    )
}

/// A bound plugin socket.
pub struct PluginServer {
    listener: UnixListener,
    socket_path: PathBuf,
    handler: Arc<PluginHandler>,
}

impl PluginServer {
    /// Bind the plugin socket, replacing a stale one left by a previous run.
    pub async fn bind(socket_path: impl Into<PathBuf>, handler: PluginHandler) -> Result<Self, TransportError> {
        let socket_path = socket_path.into();

        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::remove_file(&socket_path).await {
            Ok(()) => tracing::debug!(path = %socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&socket_path)?;
        tracing::info!(path = %socket_path.display(), "plugin socket listening");

        Ok(Self {
            listener,
            socket_path,
            handler: Arc::new(handler),
        })
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Open connections then finish their current request and close. Any
    /// still running after [`SHUTDOWN_GRACE`] are aborted. The socket file
    /// is removed before this returns.
    pub async fn run<F>(self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "plugin connection task failed");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        connections.spawn(serve_connection(
                            Arc::clone(&self.handler),
                            stream,
                            stop_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "plugin accept error");
                    }
                },
            }
        }

        drop(self.listener);
        let _ = stop_tx.send(true);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = connections.len(), "aborting plugin connections");
            connections.shutdown().await;
        }

        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.socket_path.display(), error = %e, "failed to remove socket");
        }
        tracing::info!("plugin socket closed");
        Ok(())
    }
}

/// Serve requests on one connection until the client closes it or the
/// server stops.
async fn serve_connection(handler: Arc<PluginHandler>, stream: UnixStream, mut stop: watch::Receiver<bool>) {
    let service = service_fn(move |request: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(handler.handle(request).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut stopping = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "plugin connection error");
                }
                break;
            }
            _ = stop.wait_for(|stopped| *stopped), if !stopping => {
                stopping = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}
