//! camrelay: camera bitstream relay
//!
//! Pulls a compressed video stream from one camera over WebSocket, decodes
//! it and serves the decoded frames to any number of HTTP viewers as a
//! `multipart/x-mixed-replace` JPEG stream.
//!
//! ```text
//! camera ──ws──▶ UpstreamClient ──chunks──▶ StreamDecoder ──frames──▶ FrameHub
//!                                                                      │
//!                                         ┌────────────────────────────┼──────────┐
//!                                         ▼                            ▼          ▼
//!                                   ViewerSession               ViewerSession    ...
//!                                   GET /video                  GET /video
//! ```
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use camrelay::decode::{Codec, DecoderConfig, StreamDecoder};
//! use camrelay::hub::{FrameHub, HubConfig};
//! use camrelay::server::{Producer, ServerConfig, StreamServer};
//! use camrelay::stats::RelayStats;
//! use camrelay::upstream::{UpstreamClient, UpstreamConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stats = Arc::new(RelayStats::new());
//! let hub = FrameHub::with_config(HubConfig::default(), Arc::clone(&stats));
//!
//! let upstream = UpstreamConfig::new("ws://camera.local:8000/stream")?.token("secret");
//! let client = UpstreamClient::new(upstream, Arc::clone(&stats));
//! let decoder = StreamDecoder::new(Codec::Mjpeg, DecoderConfig::default(), Arc::clone(&stats));
//! let producer = Producer::new(client, decoder, hub.clone());
//!
//! StreamServer::new(ServerConfig::default(), hub, producer)?.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod decode;
pub mod error;
pub mod hub;
pub mod server;
pub mod stats;
pub mod upstream;

pub use decode::{Codec, StreamDecoder};
pub use error::{Error, Result};
pub use hub::{DecodedFrame, FrameHub};
pub use server::{ServerConfig, StreamServer};
pub use upstream::{UpstreamClient, UpstreamConfig};
