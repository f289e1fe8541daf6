//! Client side of the monitor control socket

use crate::protocol::{Request, Response};
use anyhow::{Context, Result, anyhow};
use async_net::unix::UnixStream;
use futures::io::{BufReader, Lines};
use futures::{AsyncBufReadExt, AsyncWriteExt, StreamExt};
use std::path::Path;
use tracing::debug;

/// Connection to a running `fleet monitor`
pub struct ControlClient {
    writer: UnixStream,
    lines: Lines<BufReader<UnixStream>>,
}

impl ControlClient {
    /// Connect to the socket at `path`
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("failed to connect to {}", path.display()))?;
        debug!("Connected to monitor at {}", path.display());

        Ok(Self {
            writer: stream.clone(),
            lines: BufReader::new(stream).lines(),
        })
    }

    /// Connect if a monitor is serving `path`
    ///
    /// A socket file left behind by a monitor that died counts as absent.
    pub async fn find(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::connect(path).await {
            Ok(client) => Some(client),
            Err(e) => {
                debug!("No monitor behind {}: {:#}", path.display(), e);
                None
            }
        }
    }

    /// Send a request and wait for its response
    pub async fn send_request(&mut self, request: &Request) -> Result<Response> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let reply = self
            .lines
            .next()
            .await
            .ok_or_else(|| anyhow!("connection closed by monitor"))?
            .context("failed to read monitor response")?;
        serde_json::from_str(&reply).context("failed to parse monitor response")
    }
}
