//! Bitstream decoding
//!
//! Upstream chunks are arbitrary slices of a compressed bitstream. Decoding
//! happens in two steps:
//!
//! 1. An [`AccessUnitParser`] reassembles chunks into complete access units
//!    (one JPEG image, or one H.264 picture with its parameter sets).
//! 2. A [`FrameDecoder`] backend turns units into raw pictures.
//!
//! [`StreamDecoder`] drives both, stamps frames with sequence numbers and
//! recovers from bad input by skipping units or rebuilding the backend.

pub mod backend;
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod h264;
pub mod jpeg;
pub mod parser;

pub use backend::{Codec, DecoderFactory, FrameDecoder, RawImage};
pub use decoder::{DecoderConfig, StreamDecoder, DEFAULT_MAX_CONSECUTIVE_ERRORS};
pub use h264::{AnnexBParser, NaluType};
pub use jpeg::{JpegFrameDecoder, JpegParser};
pub use parser::{AccessUnit, AccessUnitParser, DEFAULT_MAX_BUFFER};
