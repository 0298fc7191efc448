//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// How long a viewer waits for a live frame before getting the fallback
    pub read_timeout: Duration,

    /// Fallback picture width in pixels
    pub fallback_width: u32,

    /// Fallback picture height in pixels
    pub fallback_height: u32,

    /// JPEG quality for delivered frames (1-100)
    pub jpeg_quality: u8,

    /// Maximum concurrent viewers (0 = unlimited)
    pub max_viewers: usize,

    /// Start the producer at boot instead of on the first viewer
    pub eager_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            read_timeout: Duration::from_secs(1),
            fallback_width: 640,
            fallback_height: 480,
            jpeg_quality: 80,
            max_viewers: 0, // Unlimited
            eager_start: false,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the per-frame read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the fallback picture size
    pub fn fallback_size(mut self, width: u32, height: u32) -> Self {
        self.fallback_width = width;
        self.fallback_height = height;
        self
    }

    /// Set JPEG quality, clamped to 1-100
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set maximum viewers
    pub fn max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = max;
        self
    }

    /// Start the producer at boot
    pub fn eager_start(mut self, eager: bool) -> Self {
        self.eager_start = eager;
        self
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "read timeout",
            });
        }
        if self.fallback_width == 0 {
            return Err(ConfigError::Zero {
                name: "fallback width",
            });
        }
        if self.fallback_height == 0 {
            return Err(ConfigError::Zero {
                name: "fallback height",
            });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::JpegQuality(self.jpeg_quality));
        }
        Ok(())
    }
}
