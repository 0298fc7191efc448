//! Viewer sessions
//!
//! One session per `/video` request. The session owns a hub cursor and
//! produces the response body one multipart part at a time: a live frame
//! when one arrives within the read timeout, the fallback part otherwise.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::watch;

use super::encode::encode_jpeg_blocking;
use super::multipart;
use crate::error::EncodeError;
use crate::hub::FrameCursor;
use crate::stats::metrics::{bump, drop_one};
use crate::stats::RelayStats;

/// Viewer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    /// Request accepted, nothing written yet
    Connected,
    /// At least one part written
    Streaming,
    /// Viewer went away or the server is shutting down
    Disconnected,
    /// The encoder worker was lost; terminal
    Errored,
}

/// What a session needs from the server, shared by all sessions
#[derive(Clone)]
pub struct SessionContext {
    pub read_timeout: Duration,
    pub jpeg_quality: u8,
    /// Pre-framed fallback part
    pub fallback_part: Bytes,
    pub stats: Arc<RelayStats>,
    /// Flips to `true` on server shutdown
    pub shutdown: watch::Receiver<bool>,
}

/// One connected viewer
pub struct ViewerSession {
    id: u64,
    cursor: FrameCursor,
    ctx: SessionContext,
    state: ViewerState,
    frames_sent: u64,
    fallback_sent: u64,
    connected_at: Instant,
}

impl ViewerSession {
    /// Start a session
    ///
    /// The caller has already counted this viewer in `active_viewers`; the
    /// session releases that slot when dropped.
    pub fn new(id: u64, cursor: FrameCursor, ctx: SessionContext) -> Self {
        bump(&ctx.stats.server.total_viewers);
        tracing::info!(viewer = id, "Viewer connected");

        Self {
            id,
            cursor,
            ctx,
            state: ViewerState::Connected,
            frames_sent: 0,
            fallback_sent: 0,
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    /// Live frames written so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Fallback parts written so far
    pub fn fallback_sent(&self) -> u64 {
        self.fallback_sent
    }

    /// Produce the next part of the body
    ///
    /// Returns `None` when the stream should end: after the encoder worker
    /// is lost or when the server shuts down.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        if matches!(self.state, ViewerState::Errored | ViewerState::Disconnected) {
            return None;
        }

        let mut shutdown = self.ctx.shutdown.clone();
        tokio::select! {
            biased;

            Ok(_) = shutdown.wait_for(|stop| *stop) => {
                tracing::debug!(viewer = self.id, "Server shutting down, ending stream");
                self.state = ViewerState::Disconnected;
                None
            }
            part = self.produce() => part,
        }
    }

    async fn produce(&mut self) -> Option<Bytes> {
        // Skipped frames must not push the fallback past one read timeout
        let deadline = tokio::time::Instant::now() + self.ctx.read_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(frame) = self.cursor.next(remaining).await else {
                self.fallback_sent += 1;
                bump(&self.ctx.stats.server.fallback_sent);
                tracing::trace!(viewer = self.id, "No live frame, sending fallback");
                return Some(self.written(self.ctx.fallback_part.clone()));
            };

            let seq = frame.seq;
            match encode_jpeg_blocking(frame, self.ctx.jpeg_quality).await {
                Ok(jpeg) => {
                    self.frames_sent += 1;
                    bump(&self.ctx.stats.server.frames_sent);
                    return Some(self.written(multipart::part(&jpeg)));
                }
                Err(EncodeError::WorkerLost(reason)) => {
                    tracing::error!(viewer = self.id, seq = seq, reason = %reason, "Encoder worker lost");
                    self.state = ViewerState::Errored;
                    return None;
                }
                Err(e) => {
                    bump(&self.ctx.stats.server.encode_errors);
                    tracing::warn!(viewer = self.id, seq = seq, error = %e, "Failed to encode frame, skipping");
                }
            }
        }
    }

    fn written(&mut self, part: Bytes) -> Bytes {
        if self.state == ViewerState::Connected {
            self.state = ViewerState::Streaming;
        }
        part
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        drop_one(&self.ctx.stats.server.active_viewers);

        if self.state != ViewerState::Errored {
            self.state = ViewerState::Disconnected;
        }

        tracing::info!(
            viewer = self.id,
            state = ?self.state,
            frames = self.frames_sent,
            fallbacks = self.fallback_sent,
            duration = ?self.connected_at.elapsed(),
            "Viewer disconnected"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::hub::{DecodedFrame, FrameHub, HubConfig, PixelFormat};
    use crate::server::encode::encode_jpeg;

    fn setup(read_timeout: Duration) -> (FrameHub, SessionContext, watch::Sender<bool>) {
        let stats = Arc::new(RelayStats::new());
        let hub = FrameHub::with_config(HubConfig::default(), Arc::clone(&stats));
        let (tx, rx) = watch::channel(false);
        let ctx = SessionContext {
            read_timeout,
            jpeg_quality: 80,
            fallback_part: multipart::part(b"fallback"),
            stats,
            shutdown: rx,
        };
        (hub, ctx, tx)
    }

    fn session(hub: &FrameHub, ctx: &SessionContext) -> ViewerSession {
        ctx.stats.server.active_viewers.fetch_add(1, Ordering::Relaxed);
        ViewerSession::new(1, hub.subscribe(), ctx.clone())
    }

    #[tokio::test]
    async fn test_live_frame_part() {
        let (hub, ctx, _tx) = setup(Duration::from_secs(5));
        let mut viewer = session(&hub, &ctx);
        assert_eq!(viewer.state(), ViewerState::Connected);

        let frame = DecodedFrame::solid(16, 16, [10, 20, 30]);
        let expected = multipart::part(&encode_jpeg(&frame, 80).unwrap());
        let mut frame = frame;
        frame.seq = 1;
        hub.publish(frame);

        let part = viewer.next_part().await.unwrap();
        assert_eq!(part, expected);
        assert_eq!(viewer.state(), ViewerState::Streaming);
        assert_eq!(viewer.frames_sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_once_per_timeout() {
        let (hub, ctx, _tx) = setup(Duration::from_secs(1));
        let mut viewer = session(&hub, &ctx);

        let start = tokio::time::Instant::now();
        for n in 1..=3u64 {
            let part = viewer.next_part().await.unwrap();
            assert_eq!(part, ctx.fallback_part);
            assert!(start.elapsed() >= Duration::from_secs(n));
        }
        assert_eq!(viewer.fallback_sent(), 3);
        assert_eq!(ctx.stats.snapshot().fallback_sent, 3);
    }

    #[tokio::test]
    async fn test_encode_failure_skips_frame() {
        let (hub, ctx, _tx) = setup(Duration::from_secs(5));
        let mut viewer = session(&hub, &ctx);

        // Raster too short for its dimensions
        hub.publish(DecodedFrame::new(1, 8, 8, PixelFormat::Rgb8, Bytes::from_static(&[0; 3])));
        let mut good = DecodedFrame::solid(8, 8, [255, 255, 255]);
        good.seq = 2;
        let expected = multipart::part(&encode_jpeg(&good, 80).unwrap());
        hub.publish(good);

        let part = viewer.next_part().await.unwrap();
        assert_eq!(part, expected);
        assert_eq!(ctx.stats.snapshot().encode_errors, 1);
        assert_eq!(viewer.state(), ViewerState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encode_failure_keeps_read_deadline() {
        let (hub, ctx, _tx) = setup(Duration::from_secs(1));
        let mut viewer = session(&hub, &ctx);

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(900)).await;
            let bad = DecodedFrame::new(1, 8, 8, PixelFormat::Rgb8, Bytes::from_static(&[0; 3]));
            assert!(publisher.publish(bad));
        });

        let start = tokio::time::Instant::now();
        let part = viewer.next_part().await.unwrap();
        assert_eq!(part, ctx.fallback_part);
        assert!(start.elapsed() <= Duration::from_millis(1100));
        assert_eq!(ctx.stats.snapshot().encode_errors, 1);
        assert_eq!(viewer.fallback_sent(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let (hub, ctx, tx) = setup(Duration::from_secs(30));
        let mut viewer = session(&hub, &ctx);

        tx.send_replace(true);
        assert!(viewer.next_part().await.is_none());
        assert_eq!(viewer.state(), ViewerState::Disconnected);
        assert!(viewer.next_part().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_viewer_slot() {
        let (hub, ctx, _tx) = setup(Duration::from_secs(1));
        let viewer = session(&hub, &ctx);
        assert_eq!(ctx.stats.snapshot().active_viewers, 1);
        assert_eq!(hub.subscriber_count(), 1);

        drop(viewer);
        assert_eq!(ctx.stats.snapshot().active_viewers, 0);
        assert_eq!(ctx.stats.snapshot().total_viewers, 1);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
