//! Frame hub configuration

/// Default number of frames retained for lagging viewers
pub const DEFAULT_HUB_DEPTH: usize = 10;

/// Frame hub configuration options
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Number of most recent frames retained
    ///
    /// A viewer that falls further behind than this skips to the newest frame.
    pub depth: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_HUB_DEPTH,
        }
    }
}

impl HubConfig {
    /// Set the backlog depth (at least one frame is always kept)
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }
}
