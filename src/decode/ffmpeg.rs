//! H.264 backend built on libavcodec
//!
//! Only compiled with the `ffmpeg` feature.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use ffmpeg::software::scaling;
use ffmpeg::util::format::pixel::Pixel;

use super::backend::{FrameDecoder, RawImage};
use super::parser::AccessUnit;
use crate::error::DecodeError;
use crate::hub::PixelFormat;

struct Scaler {
    context: scaling::Context,
    source: (Pixel, u32, u32),
}

// SAFETY: the scaling context is owned by a single decoder and only touched
// through `&mut self`.
unsafe impl Send for Scaler {}

/// libavcodec H.264 decoder converting every picture to RGB
pub struct FfmpegH264Decoder {
    decoder: codec::decoder::Video,
    scaler: Option<Scaler>,
}

impl FfmpegH264Decoder {
    pub fn new() -> Result<Self, DecodeError> {
        ffmpeg::init().map_err(|e| DecodeError::Unrecoverable(format!("ffmpeg init: {e}")))?;

        let h264 = codec::decoder::find(codec::Id::H264)
            .ok_or(DecodeError::CodecUnavailable("h264"))?;
        let decoder = codec::context::Context::new()
            .decoder()
            .open_as(h264)
            .and_then(|opened| opened.video())
            .map_err(|e| DecodeError::Unrecoverable(format!("open h264 decoder: {e}")))?;

        tracing::debug!("libavcodec H.264 decoder opened");

        Ok(Self {
            decoder,
            scaler: None,
        })
    }

    fn drain(&mut self, out: &mut Vec<RawImage>) -> Result<(), DecodeError> {
        let mut decoded = ffmpeg::frame::Video::empty();

        while self.decoder.receive_frame(&mut decoded).is_ok() {
            out.push(self.convert(&decoded)?);
        }
        Ok(())
    }

    fn convert(&mut self, frame: &ffmpeg::frame::Video) -> Result<RawImage, DecodeError> {
        let source = (frame.format(), frame.width(), frame.height());

        // Resolution changes mid-stream rebuild the scaler
        let stale = self.scaler.as_ref().map_or(true, |s| s.source != source);
        if stale {
            let context = scaling::Context::get(
                source.0,
                source.1,
                source.2,
                Pixel::RGB24,
                source.1,
                source.2,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| DecodeError::Unrecoverable(format!("create scaler: {e}")))?;
            self.scaler = Some(Scaler { context, source });
        }

        let mut rgb = ffmpeg::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .context
                .run(frame, &mut rgb)
                .map_err(|e| DecodeError::Corrupt(format!("scale to rgb: {e}")))?;
        }

        let (pixels, width, height) = packed_rgb(&rgb)?;
        Ok(RawImage::new(width, height, PixelFormat::Rgb8, Bytes::from(pixels)))
    }
}

impl FrameDecoder for FfmpegH264Decoder {
    fn name(&self) -> &'static str {
        "h264"
    }

    fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<RawImage>, DecodeError> {
        let packet = ffmpeg::Packet::copy(&unit.data);
        self.decoder.send_packet(&packet).map_err(classify)?;

        let mut out = Vec::new();
        self.drain(&mut out)?;
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<RawImage>, DecodeError> {
        self.decoder.send_eof().map_err(classify)?;

        let mut out = Vec::new();
        self.drain(&mut out)?;
        Ok(out)
    }
}

fn classify(e: ffmpeg::Error) -> DecodeError {
    match e {
        ffmpeg::Error::Eof | ffmpeg::Error::Bug | ffmpeg::Error::Bug2 | ffmpeg::Error::External => {
            DecodeError::Unrecoverable(e.to_string())
        }
        other => DecodeError::Corrupt(other.to_string()),
    }
}

/// Copy plane 0 of an RGB24 frame, dropping row padding
fn packed_rgb(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .ok_or_else(|| DecodeError::Corrupt("rgb plane shorter than frame".into()))?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or_else(|| DecodeError::Corrupt("rgb row out of bounds".into()))?;
        pixels.extend_from_slice(line);
    }

    Ok((pixels, width, height))
}
