//! Stream decoder
//!
//! Glues a parser to a backend. Chunks go in, sequenced frames come out.
//! A unit that fails to decode is skipped; the backend is rebuilt when it
//! reports itself unusable or keeps failing.

use std::sync::Arc;

use super::backend::{Codec, DecoderFactory, FrameDecoder, RawImage};
use super::parser::{AccessUnit, AccessUnitParser, DEFAULT_MAX_BUFFER};
use crate::error::DecodeError;
use crate::hub::DecodedFrame;
use crate::stats::metrics::{add, bump};
use crate::stats::RelayStats;

/// Default number of consecutive failures before the backend is rebuilt
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 25;

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Cap on bytes buffered while assembling one access unit
    pub max_buffer: usize,
    /// Failures in a row tolerated before recreating the backend
    pub max_consecutive_errors: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

impl DecoderConfig {
    pub fn max_buffer(mut self, bytes: usize) -> Self {
        self.max_buffer = bytes.max(1);
        self
    }

    pub fn max_consecutive_errors(mut self, n: u32) -> Self {
        self.max_consecutive_errors = n;
        self
    }
}

/// Turns upstream chunks into decoded frames
pub struct StreamDecoder {
    parser: Box<dyn AccessUnitParser>,
    factory: DecoderFactory,
    backend: Option<Box<dyn FrameDecoder>>,
    config: DecoderConfig,
    stats: Arc<RelayStats>,
    /// Sequence number for the next frame; never reused, even across resets
    next_seq: u64,
    consecutive_errors: u32,
}

impl StreamDecoder {
    pub fn new(codec: Codec, config: DecoderConfig, stats: Arc<RelayStats>) -> Self {
        let parser = codec.parser(config.max_buffer);
        Self::with_parts(parser, codec.factory(), config, stats)
    }

    /// Build from an explicit parser and backend factory
    pub fn with_parts(
        parser: Box<dyn AccessUnitParser>,
        factory: DecoderFactory,
        config: DecoderConfig,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            parser,
            factory,
            backend: None,
            config,
            stats,
            next_seq: 1,
            consecutive_errors: 0,
        }
    }

    /// Feed one upstream chunk
    ///
    /// Returns every frame that became available, possibly none.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodedFrame> {
        let mut units = Vec::new();
        self.parser.push(chunk, &mut units);
        self.account_discarded();

        let mut frames = Vec::new();
        for unit in &units {
            self.decode_unit(unit, &mut frames);
        }
        frames
    }

    /// Flush the parser and the backend at end of stream
    pub fn finish(&mut self) -> Vec<DecodedFrame> {
        let mut units = Vec::new();
        self.parser.flush(&mut units);
        self.account_discarded();

        let mut frames = Vec::new();
        for unit in &units {
            self.decode_unit(unit, &mut frames);
        }

        if let Some(backend) = self.backend.as_mut() {
            match backend.flush() {
                Ok(images) => {
                    for image in images {
                        self.emit(image, &mut frames);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Decoder flush failed");
                    self.backend = None;
                }
            }
        }
        frames
    }

    /// Drop buffered bytes and the backend so the next unit starts clean
    ///
    /// Called when the upstream connection is replaced. Sequence numbers
    /// continue from where they were.
    pub fn reset(&mut self) {
        self.parser.reset();
        self.backend = None;
        self.consecutive_errors = 0;
        tracing::debug!(next_seq = self.next_seq, "Decoder reset");
    }

    /// Sequence number the next frame will carry
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn account_discarded(&mut self) {
        let n = self.parser.take_discarded();
        if n > 0 {
            add(&self.stats.decoder.bytes_discarded, n as u64);
        }
    }

    fn backend(&mut self) -> Result<&mut Box<dyn FrameDecoder>, DecodeError> {
        if self.backend.is_none() {
            let backend = (self.factory)()?;
            tracing::debug!(backend = backend.name(), "Decoder backend created");
            self.backend = Some(backend);
        }
        // Populated just above
        self.backend
            .as_mut()
            .ok_or(DecodeError::Unrecoverable("backend missing".into()))
    }

    fn decode_unit(&mut self, unit: &AccessUnit, frames: &mut Vec<DecodedFrame>) {
        bump(&self.stats.decoder.access_units);

        let result = self.backend().and_then(|backend| backend.decode(unit));
        match result {
            Ok(images) => {
                self.consecutive_errors = 0;
                for image in images {
                    self.emit(image, frames);
                }
            }
            Err(e) => self.on_error(e, unit.len()),
        }
    }

    fn emit(&mut self, image: RawImage, frames: &mut Vec<DecodedFrame>) {
        let frame = DecodedFrame::new(
            self.next_seq,
            image.width,
            image.height,
            image.format,
            image.data,
        );

        if !frame.is_well_formed() {
            bump(&self.stats.decoder.decode_errors);
            tracing::warn!(
                width = frame.width,
                height = frame.height,
                len = frame.data.len(),
                "Backend produced a malformed picture, dropping"
            );
            return;
        }

        self.next_seq += 1;
        bump(&self.stats.decoder.frames_decoded);
        frames.push(frame);
    }

    fn on_error(&mut self, e: DecodeError, unit_len: usize) {
        bump(&self.stats.decoder.decode_errors);
        self.consecutive_errors += 1;

        tracing::debug!(
            error = %e,
            bytes = unit_len,
            consecutive = self.consecutive_errors,
            "Access unit skipped"
        );

        if e.is_unrecoverable() || self.consecutive_errors > self.config.max_consecutive_errors {
            tracing::warn!(
                error = %e,
                consecutive = self.consecutive_errors,
                "Recreating decoder backend"
            );
            self.backend = None;
            self.consecutive_errors = 0;
            bump(&self.stats.decoder.recreations);
        }
    }
}
