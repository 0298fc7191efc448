//! Bounded frame backlog
//!
//! Holds the most recent frames in publish order. Readers never remove
//! anything; they only ask for the first frame after a sequence number they
//! have already seen.

use std::collections::VecDeque;
use std::sync::Arc;

use super::frame::DecodedFrame;

/// What a reader gets back from [`FrameRing::next_after`]
#[derive(Debug)]
pub struct RingRead {
    /// The frame to deliver
    pub frame: Arc<DecodedFrame>,
    /// Frames the reader never saw because it fell behind the ring
    pub skipped: u64,
}

/// Fixed-capacity ring of recent frames
#[derive(Debug)]
pub struct FrameRing {
    frames: VecDeque<Arc<DecodedFrame>>,
    capacity: usize,
    /// Sequence number of the newest frame ever pushed
    last_seq: u64,
    /// Sequence number of the newest frame evicted from the ring
    evicted_through: u64,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            last_seq: 0,
            evicted_through: 0,
        }
    }

    /// Append a frame, evicting the oldest when full
    ///
    /// Frames must arrive with strictly increasing sequence numbers; anything
    /// else is refused and the current newest sequence number is returned.
    pub fn push(&mut self, frame: Arc<DecodedFrame>) -> Result<(), u64> {
        if frame.seq <= self.last_seq {
            return Err(self.last_seq);
        }

        if self.frames.len() == self.capacity {
            if let Some(old) = self.frames.pop_front() {
                self.evicted_through = old.seq;
            }
        }

        self.last_seq = frame.seq;
        self.frames.push_back(frame);
        Ok(())
    }

    /// First frame newer than `after`
    ///
    /// A reader whose position has already been evicted jumps straight to the
    /// newest frame instead of replaying stale ones.
    pub fn next_after(&self, after: u64) -> Option<RingRead> {
        if after >= self.last_seq {
            return None;
        }

        if after < self.evicted_through {
            let newest = self.frames.back()?;
            let delivered_between = self
                .frames
                .iter()
                .filter(|f| f.seq > after && f.seq < newest.seq)
                .count() as u64;
            let evicted_unseen = self.evicted_through - after;
            return Some(RingRead {
                frame: Arc::clone(newest),
                skipped: evicted_unseen + delivered_between,
            });
        }

        self.frames
            .iter()
            .find(|f| f.seq > after)
            .map(|frame| RingRead {
                frame: Arc::clone(frame),
                skipped: 0,
            })
    }

    /// Newest sequence number pushed so far (0 if none)
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Newest frame, if any
    pub fn latest(&self) -> Option<&Arc<DecodedFrame>> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
