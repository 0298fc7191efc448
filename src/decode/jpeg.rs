//! Motion JPEG parsing and decoding
//!
//! An MJPEG bitstream is a plain concatenation of JPEG images. Each image is
//! one access unit, from SOI (`FF D8`) to EOI (`FF D9`).
//!
//! Segments are walked by their length fields up to the start of scan, so an
//! EXIF thumbnail's own SOI/EOI pair inside APP1 never ends the image early.
//! Inside entropy-coded data `FF` is always stuffed as `FF 00` or is a
//! restart marker, so the first other marker after the scan is the next
//! segment (or EOI).

use bytes::{Bytes, BytesMut};
use image::{DynamicImage, ImageFormat};

use super::backend::{FrameDecoder, RawImage};
use super::parser::{AccessUnit, AccessUnitParser, DEFAULT_MAX_BUFFER};
use crate::error::DecodeError;
use crate::hub::PixelFormat;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;

/// Where an unfinished scan stopped, relative to the image start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Resume {
    pos: usize,
    /// Stopped inside entropy-coded data
    entropy: bool,
}

/// Result of scanning the buffer for one image
#[derive(Debug, PartialEq, Eq)]
enum Scan {
    /// Image occupies `start..end`
    Complete { start: usize, end: usize },
    /// An image starts at `start` but is not finished
    Incomplete { start: usize, resume: Resume },
    /// No SOI in the buffer
    NoStart,
    /// Segment structure broken at `at`; the image starting at `start` is unusable
    Corrupt { start: usize, at: usize },
}

fn find_soi(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < from + 2 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == SOI)
        .map(|p| p + from)
}

fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD7)
}

/// Scan for one image
///
/// With `resume`, `buf` must begin with the SOI of the image an earlier
/// scan left unfinished; scanning picks up where that scan stopped.
fn scan_image(buf: &[u8], resume: Option<Resume>) -> Scan {
    let (start, mut i, mut entropy) = match resume {
        Some(r) => (0, r.pos, r.entropy),
        None => match find_soi(buf, 0) {
            Some(start) => (start, start + 2, false),
            None => return Scan::NoStart,
        },
    };
    let incomplete = |i: usize, entropy: bool| Scan::Incomplete {
        start,
        resume: Resume {
            pos: i - start,
            entropy,
        },
    };

    loop {
        if entropy {
            // Skip entropy-coded data up to the next real marker
            loop {
                if i + 1 >= buf.len() {
                    return incomplete(i, true);
                }
                if buf[i] == 0xFF {
                    let next = buf[i + 1];
                    if next != 0x00 && !(0xD0..=0xD7).contains(&next) {
                        break;
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            entropy = false;
        }

        if i + 1 >= buf.len() {
            return incomplete(i, false);
        }
        if buf[i] != 0xFF {
            return Scan::Corrupt { start, at: i };
        }

        let marker = buf[i + 1];
        match marker {
            // Fill byte before a marker
            0xFF => i += 1,
            EOI => return Scan::Complete { start, end: i + 2 },
            SOI => return Scan::Corrupt { start, at: i },
            m if is_standalone(m) => i += 2,
            _ => {
                if i + 3 >= buf.len() {
                    return incomplete(i, false);
                }
                let len = u16::from_be_bytes([buf[i + 2], buf[i + 3]]) as usize;
                if len < 2 {
                    return Scan::Corrupt { start, at: i };
                }
                i += 2 + len;
                entropy = marker == SOS;
            }
        }
    }
}

/// Splits a byte stream into JPEG images
#[derive(Debug)]
pub struct JpegParser {
    buffer: BytesMut,
    max_buffer: usize,
    discarded: usize,
    /// Progress through the partial image at the front of `buffer`
    resume: Option<Resume>,
}

impl JpegParser {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(128 * 1024),
            max_buffer,
            discarded: 0,
            resume: None,
        }
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            self.discarded += n;
            let _ = self.buffer.split_to(n);
        }
    }
}

impl Default for JpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessUnitParser for JpegParser {
    fn push(&mut self, chunk: &[u8], out: &mut Vec<AccessUnit>) {
        self.buffer.extend_from_slice(chunk);

        loop {
            match scan_image(&self.buffer, self.resume.take()) {
                Scan::Complete { start, end } => {
                    self.discard(start);
                    let image = self.buffer.split_to(end - start).freeze();
                    out.push(AccessUnit::new(image, true));
                }
                Scan::Incomplete { start, resume } => {
                    self.discard(start);
                    self.resume = Some(resume);
                    break;
                }
                Scan::NoStart => {
                    // Keep a trailing 0xFF, it may be half of the next SOI
                    let keep = usize::from(self.buffer.last() == Some(&0xFF));
                    let drop = self.buffer.len() - keep;
                    self.discard(drop);
                    break;
                }
                Scan::Corrupt { start, at } => {
                    tracing::debug!(offset = at, "Malformed JPEG segment, resynchronising");
                    let resume = find_soi(&self.buffer, start + 2).unwrap_or(at);
                    self.discard(resume);
                }
            }
        }

        if self.buffer.len() > self.max_buffer {
            tracing::warn!(
                bytes = self.buffer.len(),
                limit = self.max_buffer,
                "JPEG buffer overflow, resynchronising"
            );
            let n = self.buffer.len();
            self.discard(n);
            self.resume = None;
        }
    }

    fn flush(&mut self, _out: &mut Vec<AccessUnit>) {
        // An unterminated JPEG cannot be decoded
        let n = self.buffer.len();
        self.discard(n);
        self.resume = None;
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.resume = None;
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }
}

/// JPEG decoder backed by the `image` crate
///
/// Every JPEG is intra-coded, so this decoder keeps no state between units.
#[derive(Debug, Default)]
pub struct JpegFrameDecoder;

impl JpegFrameDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameDecoder for JpegFrameDecoder {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<RawImage>, DecodeError> {
        let image = image::load_from_memory_with_format(&unit.data, ImageFormat::Jpeg)
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

        let raw = match image {
            DynamicImage::ImageLuma8(gray) => {
                let (width, height) = gray.dimensions();
                RawImage::new(width, height, PixelFormat::Gray8, Bytes::from(gray.into_raw()))
            }
            other => {
                let rgb = other.into_rgb8();
                let (width, height) = rgb.dimensions();
                RawImage::new(width, height, PixelFormat::Rgb8, Bytes::from(rgb.into_raw()))
            }
        };

        Ok(vec![raw])
    }

    fn flush(&mut self) -> Result<Vec<RawImage>, DecodeError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;

    use super::*;

    fn jpeg(width: u32, height: u32, value: u8) -> Vec<u8> {
        let pixels = vec![value; (width * height * 3) as usize];
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode(&pixels, width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    /// Textured image, so most of the file is entropy-coded data
    fn noisy_jpeg(width: u32, height: u32) -> Vec<u8> {
        let pixels: Vec<u8> = (0..width * height * 3)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode(&pixels, width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    fn parse(parser: &mut JpegParser, data: &[u8]) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        parser.push(data, &mut out);
        out
    }

    #[test]
    fn test_scan_complete_image() {
        let img = jpeg(8, 8, 100);
        assert_eq!(
            scan_image(&img, None),
            Scan::Complete {
                start: 0,
                end: img.len()
            }
        );
        assert!(matches!(
            scan_image(&img[..img.len() - 1], None),
            Scan::Incomplete { start: 0, .. }
        ));
        assert_eq!(scan_image(&[0x00, 0x11], None), Scan::NoStart);
    }

    #[test]
    fn test_scan_ignores_thumbnail_markers() {
        // APP1 segment whose payload contains a nested SOI/EOI pair
        let mut data = vec![0xFF, SOI, 0xFF, 0xE1, 0x00, 0x06, 0xFF, SOI, 0xFF, EOI];
        data.extend_from_slice(&[0xFF, EOI]);
        assert_eq!(
            scan_image(&data, None),
            Scan::Complete {
                start: 0,
                end: data.len()
            }
        );
    }

    #[test]
    fn test_scan_skips_stuffed_bytes_in_entropy_data() {
        // SOS with a 2-byte header, then entropy data containing FF 00 and RST0
        let data = [
            0xFF, SOI, 0xFF, SOS, 0x00, 0x02, 0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56, 0xFF, EOI,
        ];
        assert_eq!(
            scan_image(&data, None),
            Scan::Complete {
                start: 0,
                end: data.len()
            }
        );
    }

    #[test]
    fn test_parser_splits_concatenated_images() {
        let a = jpeg(8, 8, 10);
        let b = jpeg(16, 8, 200);
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut parser = JpegParser::new();
        let units = parse(&mut parser, &stream);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].data.as_ref(), a.as_slice());
        assert_eq!(units[1].data.as_ref(), b.as_slice());
        assert!(units.iter().all(|u| u.keyframe));
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_parser_reassembles_across_chunks() {
        let img = jpeg(8, 8, 50);
        let mut parser = JpegParser::new();

        let mut units = Vec::new();
        for chunk in img.chunks(7) {
            parser.push(chunk, &mut units);
        }
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), img.as_slice());
    }

    #[test]
    fn test_partial_scan_resumes_where_it_stopped() {
        let img = noisy_jpeg(64, 64);
        let half = img.len() / 2;
        let mut parser = JpegParser::new();

        assert!(parse(&mut parser, &img[..half]).is_empty());
        let resume = parser.resume.expect("scan progress kept");
        assert!(resume.entropy);
        assert!(resume.pos + 2 >= half);

        // Resumed scan must agree with a scan from scratch
        let mut partial = img[..half].to_vec();
        partial.extend_from_slice(&img[half..img.len() - 1]);
        let fresh = scan_image(&partial, None);
        let resumed = scan_image(&partial, Some(resume));
        assert_eq!(resumed, fresh);

        let units = parse(&mut parser, &img[half..]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), img.as_slice());
        assert!(parser.resume.is_none());
    }

    #[test]
    fn test_garbage_prefix_then_split_image() {
        let img = jpeg(8, 8, 5);
        let mut stream = vec![0x42; 5];
        stream.extend_from_slice(&img);

        let mut parser = JpegParser::new();
        let mut units = Vec::new();
        for chunk in stream.chunks(3) {
            parser.push(chunk, &mut units);
        }
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), img.as_slice());
        assert_eq!(parser.take_discarded(), 5);
    }

    #[test]
    fn test_reset_forgets_scan_progress() {
        let img = jpeg(8, 8, 5);
        let mut parser = JpegParser::new();
        assert!(parse(&mut parser, &img[..img.len() / 2]).is_empty());
        assert!(parser.resume.is_some());

        parser.reset();
        assert!(parser.resume.is_none());
        let units = parse(&mut parser, &img);
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_parser_drops_garbage_between_images() {
        let img = jpeg(8, 8, 50);
        let mut stream = vec![0x01, 0x02, 0x03];
        stream.extend_from_slice(&img);

        let mut parser = JpegParser::new();
        let units = parse(&mut parser, &stream);
        assert_eq!(units.len(), 1);
        assert_eq!(parser.take_discarded(), 3);
    }

    #[test]
    fn test_parser_overflow() {
        let mut parser = JpegParser::with_max_buffer(32);
        let mut data = vec![0xFF, SOI, 0xFF, 0xE0, 0xFF, 0xFF];
        data.extend_from_slice(&[0u8; 64]);

        let units = parse(&mut parser, &data);
        assert!(units.is_empty());
        assert_eq!(parser.buffered(), 0);
        assert!(parser.take_discarded() > 32);
    }

    #[test]
    fn test_decoder_produces_rgb_frame() {
        let img = jpeg(16, 8, 128);
        let mut decoder = JpegFrameDecoder::new();

        let frames = decoder
            .decode(&AccessUnit::new(Bytes::from(img), true))
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].width, 16);
        assert_eq!(frames[0].height, 8);
        assert_eq!(frames[0].format, PixelFormat::Rgb8);
        assert_eq!(frames[0].data.len(), 16 * 8 * 3);
    }

    #[test]
    fn test_decoder_rejects_corrupt_unit() {
        let mut decoder = JpegFrameDecoder::new();
        let unit = AccessUnit::new(Bytes::from_static(&[0xFF, SOI, 0xFF, EOI]), true);

        let err = decoder.decode(&unit).unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt(_)));
    }
}
