//! JPEG encoding for delivery
//!
//! Encoding is CPU-bound, so viewers run it on the blocking pool.

use std::sync::Arc;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::{ConfigError, EncodeError};
use crate::hub::{DecodedFrame, PixelFormat};

/// Encode one frame
pub fn encode_jpeg(frame: &DecodedFrame, quality: u8) -> Result<Bytes, EncodeError> {
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(EncodeError::BufferSize {
            expected,
            actual: frame.data.len(),
        });
    }

    let color = match frame.format {
        PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
        PixelFormat::Gray8 => ExtendedColorType::L8,
    };

    // JPEG is usually well under a tenth of the raster
    let mut out = Vec::with_capacity(expected / 8 + 1024);
    JpegEncoder::new_with_quality(&mut out, quality).encode(
        &frame.data,
        frame.width,
        frame.height,
        color,
    )?;

    Ok(Bytes::from(out))
}

/// Encode on the blocking pool
///
/// A panicked or cancelled worker is reported as [`EncodeError::WorkerLost`].
pub async fn encode_jpeg_blocking(
    frame: Arc<DecodedFrame>,
    quality: u8,
) -> Result<Bytes, EncodeError> {
    tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
        .await
        .map_err(|e| EncodeError::WorkerLost(e.to_string()))?
}

/// Encode the solid black fallback picture once at startup
pub fn fallback_jpeg(width: u32, height: u32, quality: u8) -> Result<Bytes, ConfigError> {
    let frame = DecodedFrame::solid(width, height, [0, 0, 0]);
    encode_jpeg(&frame, quality).map_err(|e| ConfigError::Fallback(e.to_string()))
}
