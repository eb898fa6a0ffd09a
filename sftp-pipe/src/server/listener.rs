//! WebSocket accept loop.

use super::handler::Filesystem;
use super::session::serve_channel;
use super::ServerConfig;
use crate::transport::{websocket, Channel};

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::Instrument;

/// Serves one filesystem to any number of WebSocket clients.
///
/// Every connection gets its own session; the filesystem is shared.
pub struct SftpServer<F> {
    fs: Arc<F>,
    config: ServerConfig,
}

impl<F: Filesystem + 'static> SftpServer<F> {
    /// Create a new server with default configuration.
    pub fn new(fs: F) -> Self {
        Self::with_config(fs, ServerConfig::default())
    }

    /// Create a new server with custom configuration.
    pub fn with_config(fs: F, config: ServerConfig) -> Self {
        Self {
            fs: Arc::new(fs),
            config,
        }
    }

    pub fn filesystem(&self) -> &Arc<F> {
        &self.fs
    }

    /// Bind `addr` and serve forever.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve_listener(self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!(target: "sftp-pipe::server", addr = %listener.local_addr()?, "listening");

        let mut client_id = 0u64;
        loop {
            let (stream, peer) = listener.accept().await?;
            let fs = Arc::clone(&self.fs);
            let span = tracing::info_span!(parent: &self.config.span, "session", client = client_id, %peer);
            let config = self.config.clone().span(span.clone());
            client_id += 1;

            tokio::spawn(
                async move {
                    let channel = match websocket::accept_tcp(stream).await {
                        Ok(channel) => channel,
                        Err(e) => {
                            tracing::warn!(target: "sftp-pipe::server", error = %e, "handshake failed");
                            return;
                        }
                    };
                    tracing::info!(target: "sftp-pipe::server", "client connected");
                    if let Err(e) = serve_channel(fs, channel, config).await {
                        tracing::warn!(target: "sftp-pipe::server", error = %e, "session error");
                    }
                    tracing::info!(target: "sftp-pipe::server", "client disconnected");
                }
                .instrument(span),
            );
        }
    }

    /// Run a session over an established channel until it closes.
    pub async fn serve_channel(&self, channel: Channel) -> anyhow::Result<()> {
        serve_channel(Arc::clone(&self.fs), channel, self.config.clone()).await
    }
}
