//! Upstream camera client
//!
//! Owns the single connection to the camera. Every failure, whether
//! connect, handshake, transport or idle timeout, ends the same way: the
//! connection is dropped, the client waits the fixed reconnect delay and
//! tries again. It never gives up.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::Instant;

use super::config::UpstreamConfig;
use super::handshake::handshake;
use super::state::ConnectionState;
use super::transport::{Inbound, Transport, UpstreamConnection, WsTransport};
use crate::error::UpstreamError;
use crate::stats::metrics::{add, bump};
use crate::stats::RelayStats;

/// Receives the raw bitstream
///
/// Implemented for any `FnMut(Bytes)`; implement it directly to also hear
/// about new connections.
pub trait ChunkSink: Send + 'static {
    /// One binary chunk, in arrival order
    fn on_chunk(&mut self, chunk: Bytes);

    /// A new connection finished its handshake; the bitstream restarts
    fn on_reconnect(&mut self) {}
}

impl<F> ChunkSink for F
where
    F: FnMut(Bytes) + Send + 'static,
{
    fn on_chunk(&mut self, chunk: Bytes) {
        self(chunk)
    }
}

/// Upstream camera client
///
/// # Example
/// ```no_run
/// use camrelay::upstream::{UpstreamClient, UpstreamConfig};
/// use camrelay::stats::RelayStats;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), camrelay::error::ConfigError> {
/// let config = UpstreamConfig::new("ws://camera.local:8000/stream")?.token("secret");
/// let mut client = UpstreamClient::new(config, Arc::new(RelayStats::new()));
///
/// client.on_chunk(|chunk: bytes::Bytes| {
///     println!("{} bytes", chunk.len());
/// });
///
/// // Never returns
/// client.run().await;
/// # Ok(())
/// # }
/// ```
pub struct UpstreamClient<T: Transport = WsTransport> {
    config: UpstreamConfig,
    transport: T,
    sink: Option<Box<dyn ChunkSink>>,
    state_tx: watch::Sender<ConnectionState>,
    stats: Arc<RelayStats>,
    last_attempt: Option<Instant>,
}

impl UpstreamClient<WsTransport> {
    /// Create a WebSocket client
    pub fn new(config: UpstreamConfig, stats: Arc<RelayStats>) -> Self {
        Self::with_transport(config, WsTransport, stats)
    }
}

impl<T: Transport> UpstreamClient<T> {
    pub fn with_transport(config: UpstreamConfig, transport: T, stats: Arc<RelayStats>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            transport,
            sink: None,
            state_tx,
            stats,
            last_attempt: None,
        }
    }

    /// Register the sink for incoming chunks, replacing any previous one
    pub fn on_chunk(&mut self, sink: impl ChunkSink) {
        self.sink = Some(Box::new(sink));
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state changes
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// When the last connection attempt started
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Open the transport and perform the handshake
    ///
    /// Both steps together must finish within the connect timeout.
    pub async fn connect(&mut self) -> Result<T::Connection, UpstreamError> {
        self.last_attempt = Some(Instant::now());
        bump(&self.stats.upstream.connect_attempts);
        self.set_state(ConnectionState::Connecting);

        tracing::debug!(target_addr = %self.config.target(), "Connecting to upstream");

        // Borrow only the Sync parts so the future stays Send
        let timeout = self.config.connect_timeout;
        let (transport, config, state_tx) = (&self.transport, &self.config, &self.state_tx);
        let attempt = async move {
            let mut conn = transport.connect(&config.url).await?;
            state_tx.send_replace(ConnectionState::Handshaking);
            handshake(&mut conn, &config.token, &config.options).await?;
            Ok::<_, UpstreamError>(conn)
        };

        let conn = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| UpstreamError::ConnectTimeout(timeout))??;

        bump(&self.stats.upstream.connections);
        self.set_state(ConnectionState::Streaming);
        tracing::info!(target_addr = %self.config.target(), "Upstream connected");

        Ok(conn)
    }

    /// Run forever, reconnecting after every failure
    pub async fn run(&mut self) {
        loop {
            let err = self.run_once().await;

            let state = match err {
                UpstreamError::Closed => ConnectionState::Disconnected,
                _ => ConnectionState::Failed,
            };
            self.set_state(state);

            tracing::warn!(
                error = %err,
                target_addr = %self.config.target(),
                retry_in = ?self.config.reconnect_delay,
                "Upstream connection lost"
            );

            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// One connect and stream cycle
    ///
    /// Returns the error that ended it; the connection is released before
    /// returning.
    pub async fn run_once(&mut self) -> UpstreamError {
        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(e) => return e,
        };

        if let Some(sink) = self.sink.as_mut() {
            sink.on_reconnect();
        }

        let err = self.stream(&mut conn).await;
        if matches!(err, UpstreamError::Closed) {
            conn.close().await;
        }
        err
    }

    async fn stream(&mut self, conn: &mut T::Connection) -> UpstreamError {
        let idle = self.config.idle_timeout;
        let mut deadline = Instant::now() + idle;

        loop {
            let inbound = match tokio::time::timeout_at(deadline, conn.recv()).await {
                Err(_) => return UpstreamError::Idle(idle),
                Ok(Err(e)) => return e,
                Ok(Ok(None)) => return UpstreamError::Closed,
                Ok(Ok(Some(inbound))) => inbound,
            };

            match inbound {
                Inbound::Binary(chunk) => {
                    deadline = Instant::now() + idle;
                    bump(&self.stats.upstream.chunks_received);
                    add(&self.stats.upstream.bytes_received, chunk.len() as u64);

                    if let Some(sink) = self.sink.as_mut() {
                        sink.on_chunk(chunk);
                    }
                }
                Inbound::Text(text) => {
                    tracing::debug!(len = text.len(), "Ignoring text message from upstream");
                }
            }
        }
    }
}
