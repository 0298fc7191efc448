//! Upstream client configuration

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

/// Default wait between a failure and the next connection attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default limit on connect plus handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default silence tolerated on a streaming connection
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream client configuration options
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Camera endpoint (`ws://` or `wss://`)
    pub url: Url,

    /// Credential sent as the first handshake frame
    pub token: String,

    /// Stream options sent as the second handshake frame
    pub options: String,

    /// Fixed delay after any failure
    pub reconnect_delay: Duration,

    /// Connect and handshake must finish within this time
    pub connect_timeout: Duration,

    /// Reconnect if no chunk arrives for this long
    pub idle_timeout: Duration,
}

impl UpstreamConfig {
    /// Create a config for `source`, validating the address
    pub fn new(source: &str) -> Result<Self, ConfigError> {
        Ok(Self::with_url(parse_source(source)?))
    }

    pub fn with_url(url: Url) -> Self {
        Self {
            url,
            token: String::new(),
            options: String::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Host and port for logging
    pub fn target(&self) -> String {
        match (self.url.host_str(), self.url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => self.url.to_string(),
        }
    }
}

/// Parse and check an upstream address
pub fn parse_source(source: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidSource {
        addr: source.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(source).map_err(|e| invalid(&e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(&format!("unsupported scheme {other:?}, expected ws or wss"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }

    Ok(url)
}
