//! Unix socket server for a running monitor

use crate::daemon::handlers::Host;
use crate::protocol::{Request, Response};
use anyhow::{Context, Result};
use async_net::unix::{UnixListener, UnixStream};
use fleet_orchestration::ShutdownSignal;
use futures::io::BufReader;
use futures::{AsyncBufReadExt, AsyncWriteExt, StreamExt};
use smol::Task;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bound control socket
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Bind the socket at `path`, replacing a stale one
    ///
    /// Only call this while holding the state store, which guarantees no
    /// other monitor is serving the same path.
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Removing stale control socket {}", path.display());
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind control socket {}", path.display()))?;
        info!("Control socket listening on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Serve requests until `shutdown` is triggered
    ///
    /// Requests in flight at shutdown are allowed to finish.
    pub async fn serve(self, host: Arc<Host>, shutdown: &ShutdownSignal) {
        let mut connections: Vec<Task<()>> = Vec::new();

        loop {
            let accepted = smol::future::or(async { Some(self.listener.accept().await) }, async {
                shutdown.wait().await;
                None
            })
            .await;
            let Some(accepted) = accepted else {
                break;
            };

            match accepted {
                Ok((stream, _)) => {
                    debug!("New control connection");
                    let host = host.clone();
                    connections.retain(|task| !task.is_finished());
                    connections.push(smol::spawn(async move {
                        if let Err(e) = handle_connection(stream, host).await {
                            error!("Control connection error: {:#}", e);
                        }
                    }));
                }
                Err(e) => error!("Failed to accept control connection: {}", e),
            }
        }

        drop(self.listener);
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove control socket {}: {}", self.path.display(), e);
        }

        if !connections.is_empty() {
            debug!("Waiting for {} control connections", connections.len());
            futures::future::join_all(connections).await;
        }
        info!("Control socket closed");
    }
}

async fn handle_connection(stream: UnixStream, host: Arc<Host>) -> Result<()> {
    let mut writer = stream.clone();
    let mut lines = BufReader::new(stream).lines();

    while let Some(line) = lines.next().await {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => host.handle(request).await,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                Response::Error {
                    message: format!("Invalid request format: {}", e),
                }
            }
        };

        let mut text = serde_json::to_string(&response)?;
        text.push('\n');
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
    }

    debug!("Control connection closed");
    Ok(())
}
