//! Decoded frame types
//!
//! Frames are shared between every viewer through `Arc`, and the pixel data
//! is a `Bytes` so cloning a frame never copies the raster.

use std::time::SystemTime;

use bytes::Bytes;

/// Pixel layout of a decoded raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGB, 3 bytes per pixel
    Rgb8,
    /// 8-bit luma, 1 byte per pixel
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A decoded picture ready for fan-out
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Monotonically increasing sequence number (0 is reserved for synthetic frames)
    pub seq: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout of `data`
    pub format: PixelFormat,
    /// Tightly packed raster, row-major
    pub data: Bytes,
    /// When the frame left the decoder
    pub captured_at: SystemTime,
}

impl DecodedFrame {
    /// Create a frame stamped with the current time
    pub fn new(seq: u64, width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        Self {
            seq,
            width,
            height,
            format,
            data,
            captured_at: SystemTime::now(),
        }
    }

    /// Create a solid-colour RGB frame
    ///
    /// Used for the fallback picture shown while upstream is unavailable.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(0, width, height, PixelFormat::Rgb8, Bytes::from(data))
    }

    /// Number of bytes the raster should occupy
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Check that dimensions are non-zero and the buffer matches them
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_frame() {
        let frame = DecodedFrame::solid(4, 2, [10, 20, 30]);
        assert_eq!(frame.seq, 0);
        assert_eq!(frame.format, PixelFormat::Rgb8);
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert_eq!(&frame.data[..3], &[10, 20, 30]);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_malformed_frames() {
        let short = DecodedFrame::new(1, 2, 2, PixelFormat::Gray8, Bytes::from_static(&[0; 3]));
        assert!(!short.is_well_formed());

        let empty = DecodedFrame::new(1, 0, 2, PixelFormat::Gray8, Bytes::new());
        assert!(!empty.is_well_formed());
    }
}
