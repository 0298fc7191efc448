//! camrelay binary
//!
//! Every option can also be set through its environment variable:
//!
//!   CS_VIDEO_SOURCE=ws://camera.local:8000/stream CS_UPSTREAM_TOKEN=secret camrelay
//!
//! Then open http://localhost:8080/video in a browser.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use camrelay::decode::{Codec, DecoderConfig, StreamDecoder};
use camrelay::error::ConfigError;
use camrelay::hub::{FrameHub, HubConfig};
use camrelay::server::{Producer, ServerConfig, StreamServer};
use camrelay::stats::RelayStats;
use camrelay::upstream::{UpstreamClient, UpstreamConfig};

#[derive(Parser, Debug)]
#[command(name = "camrelay", version, about = "Relay a camera stream to HTTP viewers as MJPEG")]
struct Cli {
    /// Upstream camera address (ws:// or wss://)
    #[arg(long, env = "CS_VIDEO_SOURCE")]
    source: String,

    /// Interface to listen on
    #[arg(long, env = "CS_SERVER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "CS_SERVER_PORT", default_value_t = 8080)]
    port: u16,

    /// Credential sent as the first handshake message
    #[arg(long, env = "CS_UPSTREAM_TOKEN", default_value = "")]
    token: String,

    /// Options sent as the second handshake message
    #[arg(long, env = "CS_UPSTREAM_OPTIONS", default_value = "")]
    options: String,

    /// Upstream bitstream format (mjpeg or h264)
    #[arg(long, env = "CS_CODEC", default_value_t = Codec::Mjpeg)]
    codec: Codec,

    /// Decoded frames kept for viewers
    #[arg(long, env = "CS_QUEUE_DEPTH", default_value_t = 10)]
    queue_depth: usize,

    /// Seconds to wait before reconnecting upstream
    #[arg(long, env = "CS_RECONNECT_DELAY", default_value_t = 5)]
    reconnect_delay: u64,

    /// Milliseconds a viewer waits for a frame before the fallback is sent
    #[arg(long, env = "CS_READ_TIMEOUT_MS", default_value_t = 1000)]
    read_timeout: u64,

    #[arg(long, env = "CS_FALLBACK_WIDTH", default_value_t = 640)]
    fallback_width: u32,

    #[arg(long, env = "CS_FALLBACK_HEIGHT", default_value_t = 480)]
    fallback_height: u32,

    /// JPEG quality for delivered frames (1-100)
    #[arg(long, env = "CS_JPEG_QUALITY", default_value_t = 80)]
    jpeg_quality: u8,

    /// Maximum concurrent viewers, 0 for unlimited
    #[arg(long, env = "CS_MAX_VIEWERS", default_value_t = 0)]
    max_viewers: usize,

    /// Connect upstream at startup instead of on the first viewer
    #[arg(long, env = "CS_EAGER_START")]
    eager: bool,
}

impl Cli {
    fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::InvalidListen(format!("{}:{}", self.host, self.port)))
    }

    fn upstream_config(&self) -> Result<UpstreamConfig, ConfigError> {
        if self.reconnect_delay == 0 {
            return Err(ConfigError::Zero {
                name: "reconnect delay",
            });
        }

        Ok(UpstreamConfig::new(&self.source)?
            .token(self.token.as_str())
            .options(self.options.as_str())
            .reconnect_delay(Duration::from_secs(self.reconnect_delay)))
    }

    fn hub_config(&self) -> Result<HubConfig, ConfigError> {
        if self.queue_depth == 0 {
            return Err(ConfigError::Zero {
                name: "queue depth",
            });
        }
        Ok(HubConfig::default().depth(self.queue_depth))
    }

    fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::JpegQuality(self.jpeg_quality));
        }

        let config = ServerConfig::with_addr(self.listen_addr()?)
            .read_timeout(Duration::from_millis(self.read_timeout))
            .fallback_size(self.fallback_width, self.fallback_height)
            .jpeg_quality(self.jpeg_quality)
            .max_viewers(self.max_viewers)
            .eager_start(self.eager);
        config.validate()?;
        Ok(config)
    }

    fn codec(&self) -> Result<Codec, ConfigError> {
        if !self.codec.is_available() {
            return Err(ConfigError::CodecFeature(self.codec.as_str(), "ffmpeg"));
        }
        Ok(self.codec)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let upstream = cli.upstream_config().context("invalid upstream configuration")?;
    let hub_config = cli.hub_config().context("invalid frame queue configuration")?;
    let server = cli.server_config().context("invalid server configuration")?;
    let codec = cli.codec().context("invalid codec")?;

    tracing::info!(
        source = %upstream.target(),
        codec = %codec,
        listen = %server.bind_addr,
        queue_depth = hub_config.depth,
        "Starting camrelay"
    );

    let stats = Arc::new(RelayStats::new());
    let hub = FrameHub::with_config(hub_config, Arc::clone(&stats));

    let client = UpstreamClient::new(upstream, Arc::clone(&stats));
    let decoder = StreamDecoder::new(codec, DecoderConfig::default(), Arc::clone(&stats));
    let producer = Producer::new(client, decoder, hub.clone());

    StreamServer::new(server, hub, producer)
        .context("failed to prepare server")?
        .run()
        .await?;

    Ok(())
}
