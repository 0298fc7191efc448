//! Decoder backends
//!
//! A backend turns access units into raw pictures. Backends may buffer
//! internally (H.264 reordering), so one unit can yield zero or many images.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;

use super::h264::AnnexBParser;
use super::jpeg::{JpegFrameDecoder, JpegParser};
use super::parser::{AccessUnit, AccessUnitParser};
use crate::error::DecodeError;
use crate::hub::PixelFormat;

/// A decoded picture before it is given a sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl RawImage {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }
}

/// A stateful codec instance
pub trait FrameDecoder: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Decode one access unit
    ///
    /// Returns every picture that became available, in presentation order.
    fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<RawImage>, DecodeError>;

    /// Drain pictures still held for reordering
    fn flush(&mut self) -> Result<Vec<RawImage>, DecodeError>;
}

/// Builds a fresh backend; called again whenever the backend is recreated
pub type DecoderFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameDecoder>, DecodeError> + Send + Sync>;

/// Upstream bitstream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Concatenated JPEG images
    #[default]
    Mjpeg,
    /// H.264 Annex B byte stream
    H264,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Mjpeg => "mjpeg",
            Codec::H264 => "h264",
        }
    }

    /// Whether a backend for this codec was compiled in
    pub fn is_available(&self) -> bool {
        match self {
            Codec::Mjpeg => true,
            Codec::H264 => cfg!(feature = "ffmpeg"),
        }
    }

    /// Create the access unit parser for this codec
    pub fn parser(&self, max_buffer: usize) -> Box<dyn AccessUnitParser> {
        match self {
            Codec::Mjpeg => Box::new(JpegParser::with_max_buffer(max_buffer)),
            Codec::H264 => Box::new(AnnexBParser::with_max_buffer(max_buffer)),
        }
    }

    /// Factory creating backends for this codec
    pub fn factory(&self) -> DecoderFactory {
        match self {
            Codec::Mjpeg => Arc::new(|| Ok(Box::new(JpegFrameDecoder::new()) as Box<dyn FrameDecoder>)),
            #[cfg(feature = "ffmpeg")]
            Codec::H264 => Arc::new(|| {
                super::ffmpeg::FfmpegH264Decoder::new().map(|d| Box::new(d) as Box<dyn FrameDecoder>)
            }),
            #[cfg(not(feature = "ffmpeg"))]
            Codec::H264 => Arc::new(|| Err(DecodeError::CodecUnavailable("h264"))),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mjpeg" | "jpeg" | "mjpg" => Ok(Codec::Mjpeg),
            "h264" | "avc" => Ok(Codec::H264),
            other => Err(format!("unknown codec {other:?} (expected mjpeg or h264)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_parse() {
        assert_eq!("mjpeg".parse::<Codec>().unwrap(), Codec::Mjpeg);
        assert_eq!("MJPG".parse::<Codec>().unwrap(), Codec::Mjpeg);
        assert_eq!("h264".parse::<Codec>().unwrap(), Codec::H264);
        assert!("vp9".parse::<Codec>().is_err());
        assert_eq!(Codec::H264.to_string(), "h264");
        assert_eq!(Codec::default(), Codec::Mjpeg);
    }

    #[test]
    fn test_mjpeg_factory_always_available() {
        assert!(Codec::Mjpeg.is_available());
        let decoder = (Codec::Mjpeg.factory())().unwrap();
        assert_eq!(decoder.name(), "mjpeg");
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_h264_unavailable_without_ffmpeg() {
        assert!(!Codec::H264.is_available());
        let err = (Codec::H264.factory())().err().unwrap();
        assert!(matches!(err, DecodeError::CodecUnavailable("h264")));
    }
}
