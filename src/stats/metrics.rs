//! Statistics for the relay pipeline
//!
//! Counters are updated from the producer and viewer tasks without locking;
//! `snapshot()` copies them into plain serializable structs for `/health`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Upstream connection counters
#[derive(Debug, Default)]
pub struct UpstreamStats {
    /// Connection attempts started
    pub connect_attempts: AtomicU64,
    /// Attempts that completed the handshake
    pub connections: AtomicU64,
    /// Binary chunks received
    pub chunks_received: AtomicU64,
    /// Bytes received in binary chunks
    pub bytes_received: AtomicU64,
}

/// Decoder counters
#[derive(Debug, Default)]
pub struct DecoderStats {
    /// Access units extracted by the parser
    pub access_units: AtomicU64,
    /// Frames produced by the backend
    pub frames_decoded: AtomicU64,
    /// Access units skipped because they failed to decode
    pub decode_errors: AtomicU64,
    /// Times the backend was torn down and rebuilt
    pub recreations: AtomicU64,
    /// Bytes dropped from an overflowing parser buffer
    pub bytes_discarded: AtomicU64,
}

/// Frame hub counters
#[derive(Debug, Default)]
pub struct HubStats {
    /// Frames accepted by `publish`
    pub frames_published: AtomicU64,
    /// Frames refused because their sequence number went backwards
    pub frames_rejected: AtomicU64,
    /// Frames lagging viewers never saw
    pub frames_skipped: AtomicU64,
}

/// HTTP viewer counters
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Viewers ever accepted
    pub total_viewers: AtomicU64,
    /// Viewers currently streaming
    pub active_viewers: AtomicU64,
    /// Live frame parts written
    pub frames_sent: AtomicU64,
    /// Fallback parts written
    pub fallback_sent: AtomicU64,
    /// Frames that failed to encode
    pub encode_errors: AtomicU64,
}

/// All counters for one relay instance
#[derive(Debug)]
pub struct RelayStats {
    pub upstream: UpstreamStats,
    pub decoder: DecoderStats,
    pub hub: HubStats,
    pub server: ServerStats,
    started_at: Instant,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            upstream: UpstreamStats::default(),
            decoder: DecoderStats::default(),
            hub: HubStats::default(),
            server: ServerStats::default(),
            started_at: Instant::now(),
        }
    }

    /// Copy every counter into a serializable snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            connect_attempts: load(&self.upstream.connect_attempts),
            connections: load(&self.upstream.connections),
            chunks_received: load(&self.upstream.chunks_received),
            bytes_received: load(&self.upstream.bytes_received),
            access_units: load(&self.decoder.access_units),
            frames_decoded: load(&self.decoder.frames_decoded),
            decode_errors: load(&self.decoder.decode_errors),
            decoder_recreations: load(&self.decoder.recreations),
            bytes_discarded: load(&self.decoder.bytes_discarded),
            frames_published: load(&self.hub.frames_published),
            frames_rejected: load(&self.hub.frames_rejected),
            frames_skipped: load(&self.hub.frames_skipped),
            total_viewers: load(&self.server.total_viewers),
            active_viewers: load(&self.server.active_viewers),
            frames_sent: load(&self.server.frames_sent),
            fallback_sent: load(&self.server.fallback_sent),
            encode_errors: load(&self.server.encode_errors),
        }
    }
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub connect_attempts: u64,
    pub connections: u64,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub access_units: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub decoder_recreations: u64,
    pub bytes_discarded: u64,
    pub frames_published: u64,
    pub frames_rejected: u64,
    pub frames_skipped: u64,
    pub total_viewers: u64,
    pub active_viewers: u64,
    pub frames_sent: u64,
    pub fallback_sent: u64,
    pub encode_errors: u64,
}

/// Increment a counter by one
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Increment a counter by `n`
pub(crate) fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Decrement a counter by one, saturating at zero
pub(crate) fn drop_one(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(1))
    });
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
