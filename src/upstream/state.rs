//! Upstream connection state
//!
//! Tracks the camera connection from the first attempt through streaming
//! and back again after every failure.

use std::fmt;

use serde::Serialize;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection; either not started yet or the peer closed cleanly
    #[default]
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, sending token and options
    Handshaking,
    /// Handshake complete, receiving chunks
    Streaming,
    /// Last attempt failed; waiting out the reconnect delay
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Failed => "failed",
        }
    }

    /// Whether chunks are currently flowing
    pub fn is_streaming(&self) -> bool {
        *self == ConnectionState::Streaming
    }

    /// Whether a connection attempt is in progress
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Handshaking
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
