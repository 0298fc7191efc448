//! Frame hub implementation
//!
//! One producer publishes into a bounded ring guarded by a mutex; a `watch`
//! channel carrying the newest sequence number wakes every waiting cursor.
//! Cursors never remove frames, so viewers cannot steal from each other.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::config::HubConfig;
use super::frame::DecodedFrame;
use super::ring::FrameRing;
use crate::stats::metrics::{add, bump};
use crate::stats::RelayStats;

struct HubInner {
    ring: Mutex<FrameRing>,
    /// Newest published sequence number, for waking cursors
    tx: watch::Sender<u64>,
    subscriber_count: AtomicU32,
    stats: Arc<RelayStats>,
}

impl HubInner {
    fn ring(&self) -> MutexGuard<'_, FrameRing> {
        // Nothing panics while holding this lock, but a poisoned ring is still consistent
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared fan-out point for decoded frames
///
/// Cheap to clone; every clone refers to the same ring.
#[derive(Clone)]
pub struct FrameHub {
    inner: Arc<HubInner>,
    config: HubConfig,
}

impl FrameHub {
    /// Create a hub with default configuration and private statistics
    pub fn new() -> Self {
        Self::with_config(HubConfig::default(), Arc::new(RelayStats::new()))
    }

    /// Create a hub reporting into shared statistics
    pub fn with_config(config: HubConfig, stats: Arc<RelayStats>) -> Self {
        let (tx, _) = watch::channel(0);

        Self {
            inner: Arc::new(HubInner {
                ring: Mutex::new(FrameRing::new(config.depth)),
                tx,
                subscriber_count: AtomicU32::new(0),
                stats,
            }),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Publish a frame to every subscriber
    ///
    /// Returns `false` if the frame was refused because its sequence number
    /// is not newer than the last published frame.
    pub fn publish(&self, frame: DecodedFrame) -> bool {
        let seq = frame.seq;
        let pushed = self.inner.ring().push(Arc::new(frame));

        match pushed {
            Ok(()) => {
                bump(&self.inner.stats.hub.frames_published);
                // send_replace succeeds even with no receivers
                self.inner.tx.send_replace(seq);
                true
            }
            Err(last) => {
                bump(&self.inner.stats.hub.frames_rejected);
                tracing::warn!(seq = seq, last_seq = last, "Frame rejected: sequence not increasing");
                false
            }
        }
    }

    /// Create a new cursor
    ///
    /// The cursor starts at the current newest frame, so it has no initial
    /// frame and waits for the next publish.
    pub fn subscribe(&self) -> FrameCursor {
        let last_seq = self.inner.ring().last_seq();
        let rx = self.inner.tx.subscribe();
        let count = self.inner.subscriber_count.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::debug!(subscribers = count, last_seq = last_seq, "Subscriber added");

        FrameCursor {
            hub: Arc::clone(&self.inner),
            rx,
            last_seq,
            delivered: 0,
        }
    }

    /// Wait for the next frame on `cursor`
    ///
    /// Same as [`FrameCursor::next`].
    pub async fn next(
        &self,
        cursor: &mut FrameCursor,
        timeout: Duration,
    ) -> Option<Arc<DecodedFrame>> {
        debug_assert!(Arc::ptr_eq(&self.inner, &cursor.hub));
        cursor.next(timeout).await
    }

    /// Number of live cursors
    pub fn subscriber_count(&self) -> u32 {
        self.inner.subscriber_count.load(Ordering::Relaxed)
    }

    /// Newest published sequence number (0 if nothing was published)
    pub fn latest_seq(&self) -> u64 {
        self.inner.ring().last_seq()
    }

    /// Newest published frame
    pub fn latest(&self) -> Option<Arc<DecodedFrame>> {
        self.inner.ring().latest().cloned()
    }

    /// Statistics this hub reports into
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.inner.stats
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One viewer's position in the hub
///
/// Dropping the cursor unregisters it; a pending `next()` future is simply
/// dropped with it.
pub struct FrameCursor {
    hub: Arc<HubInner>,
    rx: watch::Receiver<u64>,
    last_seq: u64,
    delivered: u64,
}

impl FrameCursor {
    /// Wait until a frame newer than the last delivered one exists
    ///
    /// Returns `None` once `timeout` has elapsed without a newer frame so
    /// the caller can substitute a fallback.
    pub async fn next(&mut self, timeout: Duration) -> Option<Arc<DecodedFrame>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Mark the current version seen before looking, so a publish that
            // lands between the look and the wait still wakes us.
            self.rx.borrow_and_update();

            if let Some(frame) = self.try_next() {
                return Some(frame);
            }

            match tokio::time::timeout_at(deadline, self.rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    // Sender lives in the hub we hold, so this cannot happen
                    tokio::time::sleep_until(deadline).await;
                    return None;
                }
                Err(_) => return None,
            }
        }
    }

    /// Take the next frame if one is already available
    pub fn try_next(&mut self) -> Option<Arc<DecodedFrame>> {
        let read = self.hub.ring().next_after(self.last_seq)?;

        if read.skipped > 0 {
            add(&self.hub.stats.hub.frames_skipped, read.skipped);
            tracing::debug!(
                skipped = read.skipped,
                seq = read.frame.seq,
                "Cursor lagged, jumping to newest frame"
            );
        }

        self.last_seq = read.frame.seq;
        self.delivered += 1;
        Some(read.frame)
    }

    /// Sequence number of the last frame delivered (or the start position)
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Number of frames delivered through this cursor
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl Drop for FrameCursor {
    fn drop(&mut self) {
        let prev = self.hub.subscriber_count.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(subscribers = prev.saturating_sub(1), "Subscriber removed");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_test::{assert_pending, assert_ready};

    use super::*;
    use crate::hub::frame::PixelFormat;

    fn frame(seq: u64) -> DecodedFrame {
        DecodedFrame::new(seq, 2, 1, PixelFormat::Gray8, Bytes::from_static(&[1, 2]))
    }

    #[tokio::test]
    async fn test_subscribe_has_no_initial_frame() {
        let hub = FrameHub::new();
        hub.publish(frame(1));

        let mut cursor = hub.subscribe();
        assert_eq!(cursor.last_seq(), 1);
        assert!(cursor.try_next().is_none());
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = FrameHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(frame(1));

        let fa = a.next(Duration::from_secs(1)).await.unwrap();
        let fb = b.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(fa.seq, 1);
        assert_eq!(fb.seq, 1);
        // Same allocation, not a copy
        assert!(Arc::ptr_eq(&fa, &fb));
    }

    #[tokio::test]
    async fn test_fast_reader_sees_every_frame_in_order() {
        let hub = FrameHub::new();
        let mut cursor = hub.subscribe();

        let mut seen = Vec::new();
        for seq in 1..=50 {
            hub.publish(frame(seq));
            let f = cursor.next(Duration::from_secs(1)).await.unwrap();
            seen.push(f.seq);
        }

        let expected: Vec<u64> = (1..=50).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_burst_within_depth_is_delivered_in_full() {
        let hub = FrameHub::with_config(HubConfig::default().depth(10), Arc::new(RelayStats::new()));
        let mut cursor = hub.subscribe();

        for seq in 1..=5 {
            hub.publish(frame(seq));
        }

        for seq in 1..=5 {
            assert_eq!(cursor.next(Duration::from_millis(10)).await.unwrap().seq, seq);
        }
    }

    #[tokio::test]
    async fn test_idle_subscriber_does_not_block_others() {
        let hub = FrameHub::with_config(HubConfig::default().depth(2), Arc::new(RelayStats::new()));
        let _idle = hub.subscribe();
        let mut active = hub.subscribe();

        for seq in 1..=100 {
            assert!(hub.publish(frame(seq)));
            assert_eq!(active.next(Duration::from_millis(10)).await.unwrap().seq, seq);
        }
    }

    #[tokio::test]
    async fn test_slow_reader_skips_to_latest() {
        let stats = Arc::new(RelayStats::new());
        let hub = FrameHub::with_config(HubConfig::default().depth(3), Arc::clone(&stats));
        let mut cursor = hub.subscribe();

        for seq in 1..=10 {
            hub.publish(frame(seq));
        }

        let f = cursor.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(f.seq, 10);
        assert_eq!(stats.snapshot().frames_skipped, 9);
        assert!(cursor.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_times_out_without_publish() {
        let hub = FrameHub::new();
        let mut cursor = hub.subscribe();

        let start = Instant::now();
        let result = cursor.next(Duration::from_secs(1)).await;
        assert!(result.is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1100));

        // Once per interval, not early
        let result = cursor.next(Duration::from_secs(1)).await;
        assert!(result.is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2100));
    }

    #[tokio::test]
    async fn test_next_wakes_on_publish() {
        let hub = FrameHub::new();
        let mut cursor = hub.subscribe();

        let mut fut = tokio_test::task::spawn(cursor.next(Duration::from_secs(30)));
        assert_pending!(fut.poll());

        hub.publish(frame(1));
        assert!(fut.is_woken());
        let got = assert_ready!(fut.poll());
        assert_eq!(got.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_rejects_non_increasing_sequence() {
        let stats = Arc::new(RelayStats::new());
        let hub = FrameHub::with_config(HubConfig::default(), Arc::clone(&stats));

        assert!(hub.publish(frame(3)));
        assert!(!hub.publish(frame(3)));
        assert!(!hub.publish(frame(1)));
        assert_eq!(hub.latest_seq(), 3);
        assert_eq!(stats.snapshot().frames_rejected, 2);
    }

    #[tokio::test]
    async fn test_drop_cursor_unregisters() {
        let hub = FrameHub::new();
        let cursor = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(cursor);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_hub_next_delegates_to_cursor() {
        let hub = FrameHub::new();
        let mut cursor = hub.subscribe();
        hub.publish(frame(7));

        let f = hub.next(&mut cursor, Duration::from_millis(10)).await.unwrap();
        assert_eq!(f.seq, 7);
        assert_eq!(cursor.delivered(), 1);
        assert_eq!(hub.latest().unwrap().seq, 7);
    }
}
