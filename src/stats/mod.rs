//! Pipeline statistics

pub mod metrics;

pub use metrics::{
    DecoderStats, HubStats, RelayStats, ServerStats, StatsSnapshot, UpstreamStats,
};
