//! Upstream camera connection
//!
//! One long-lived WebSocket to the camera. After the handshake every binary
//! frame is an opaque chunk of the compressed bitstream, handed to the
//! registered [`ChunkSink`] in arrival order.

pub mod client;
pub mod config;
pub mod handshake;
pub mod state;
pub mod transport;

pub use client::{ChunkSink, UpstreamClient};
pub use config::{parse_source, UpstreamConfig};
pub use state::ConnectionState;
pub use transport::{Inbound, Transport, UpstreamConnection, WsConnection, WsTransport};
