//! Error types
//!
//! Each pipeline stage has its own error family so callers can decide how to
//! recover: upstream errors reconnect, decode errors skip a unit, encode
//! errors skip a frame for one viewer, and config errors stop the process.

use std::time::Duration;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures on the upstream camera connection.
///
/// All of these are recovered by reconnecting after the fixed delay.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("no data received for {0:?}")]
    Idle(Duration),

    #[error("connection closed by peer")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for UpstreamError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => UpstreamError::Closed,
            other => UpstreamError::Transport(other.to_string()),
        }
    }
}

/// Failures decoding one access unit.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The unit could not be decoded; it is skipped.
    #[error("corrupt access unit: {0}")]
    Corrupt(String),

    /// The decoder backend is unusable and must be recreated.
    #[error("unrecoverable decoder failure: {0}")]
    Unrecoverable(String),

    /// The requested codec was not compiled into this build.
    #[error("codec {0} is not available in this build")]
    CodecUnavailable(&'static str),
}

impl DecodeError {
    /// Whether the backend must be torn down after this error
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            DecodeError::Unrecoverable(_) | DecodeError::CodecUnavailable(_)
        )
    }
}

/// Failures JPEG-encoding a frame for delivery.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame buffer is {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("jpeg encoder failed: {0}")]
    Jpeg(#[from] image::ImageError),

    #[error("encoder worker lost: {0}")]
    WorkerLost(String),
}

/// Missing or invalid configuration at startup. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid upstream address {addr:?}: {reason}")]
    InvalidSource { addr: String, reason: String },

    #[error("invalid listen address {0:?}")]
    InvalidListen(String),

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("jpeg quality must be within 1..=100, got {0}")]
    JpegQuality(u8),

    #[error("codec {0} requires building with the `{1}` feature")]
    CodecFeature(&'static str, &'static str),

    #[error("fallback frame could not be encoded: {0}")]
    Fallback(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_classification() {
        assert!(!DecodeError::Corrupt("bad slice".into()).is_unrecoverable());
        assert!(DecodeError::Unrecoverable("oom".into()).is_unrecoverable());
        assert!(DecodeError::CodecUnavailable("h264").is_unrecoverable());
    }

    #[test]
    fn test_tungstenite_close_maps_to_closed() {
        let e: UpstreamError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(e, UpstreamError::Closed));
    }

    #[test]
    fn test_error_display() {
        let e = Error::from(ConfigError::Zero { name: "queue depth" });
        assert_eq!(
            e.to_string(),
            "configuration error: queue depth must be greater than zero"
        );
    }
}
