//! Upstream transports
//!
//! The client only needs to open a connection, send text and receive
//! frames, so the transport is a trait. Production uses WebSocket; tests
//! script connections in memory.

use std::future::Future;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::UpstreamError;

/// A frame received from upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Bitstream chunk
    Binary(Bytes),
    /// Out-of-band text message
    Text(String),
}

/// Opens connections to the camera
pub trait Transport: Send + Sync + 'static {
    type Connection: UpstreamConnection;

    fn connect(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<Self::Connection, UpstreamError>> + Send;
}

/// One open connection
///
/// Dropping the connection releases it.
pub trait UpstreamConnection: Send + 'static {
    fn send_text(&mut self, text: &str)
        -> impl Future<Output = Result<(), UpstreamError>> + Send;

    /// Next frame, or `None` once the peer has closed the connection
    fn recv(&mut self) -> impl Future<Output = Result<Option<Inbound>, UpstreamError>> + Send;

    /// Close politely; errors are ignored
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// WebSocket transport (`ws://` and `wss://`)
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    type Connection = WsConnection;

    async fn connect(&self, url: &Url) -> Result<WsConnection, UpstreamError> {
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| UpstreamError::ConnectFailed {
                addr: url.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(status = %response.status(), "WebSocket upgrade complete");
        Ok(WsConnection { stream })
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl UpstreamConnection for WsConnection {
    async fn send_text(&mut self, text: &str) -> Result<(), UpstreamError> {
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, UpstreamError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };

            match message? {
                Message::Binary(data) => return Ok(Some(Inbound::Binary(Bytes::from(data)))),
                Message::Text(text) => return Ok(Some(Inbound::Text(text))),
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "Upstream sent close");
                    return Ok(None);
                }
                // Pongs are queued by tungstenite and flushed on the next read
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
