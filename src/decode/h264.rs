//! H.264 Annex B parsing
//!
//! Cameras push H.264 as an Annex B byte stream: NAL units separated by
//! start codes (`00 00 01` or `00 00 00 01`).
//!
//! NAL unit header:
//! ```text
//! +---+-------+-----------+
//! | F |  NRI  |   Type    |
//! | 1 |   2   |     5     |
//! +---+-------+-----------+
//! ```
//!
//! Access units are delimited the way a decoder expects them (ISO 14496-10
//! 7.4.1.2.3, simplified): once a unit holds a picture slice, a new unit
//! begins at an access unit delimiter, a parameter set, an SEI, or a slice
//! whose `first_mb_in_slice` is zero.

use bytes::{BufMut, Bytes, BytesMut};

use super::parser::{AccessUnit, AccessUnitParser, DEFAULT_MAX_BUFFER};

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }

    /// Whether this NAL carries picture data
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            NaluType::Slice
                | NaluType::SlicePartA
                | NaluType::SlicePartB
                | NaluType::SlicePartC
                | NaluType::Idr
        )
    }
}

/// Whether a NAL unit starts a new access unit after a picture
///
/// Returns `None` when not enough of the NAL is available to tell.
fn opens_unit(nal: &[u8]) -> Option<bool> {
    let header = *nal.first()?;
    match NaluType::from_byte(header) {
        Some(NaluType::Aud | NaluType::Sps | NaluType::Pps | NaluType::Sei) => Some(true),
        // first_mb_in_slice is ue(v); a leading 1 bit means zero
        Some(t) if t.is_vcl() => nal.get(1).map(|b| b & 0x80 != 0),
        Some(_) => Some(false),
        // Prefix NAL, subset SPS and friends (14..=18)
        None => Some(matches!(header & 0x1F, 14..=18)),
    }
}

/// Offset of the first `00 00 01` at or after `from`
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < from + 3 {
        return None;
    }
    data[from..]
        .windows(3)
        .position(|w| w == [0x00, 0x00, 0x01])
        .map(|p| p + from)
}

/// Incremental Annex B access unit parser
#[derive(Debug)]
pub struct AnnexBParser {
    /// Unconsumed bytes; starts with a start code once synced
    buffer: BytesMut,
    synced: bool,
    /// Offset in `buffer` up to which no start code was found
    scanned: usize,
    /// NAL units of the unit being assembled, each prefixed with a start code
    current: BytesMut,
    current_has_vcl: bool,
    current_keyframe: bool,
    max_buffer: usize,
    discarded: usize,
}

impl AnnexBParser {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            synced: false,
            scanned: 3,
            current: BytesMut::new(),
            current_has_vcl: false,
            current_keyframe: false,
            max_buffer,
            discarded: 0,
        }
    }

    fn sync(&mut self) -> bool {
        match find_start_code(&self.buffer, 0) {
            Some(pos) => {
                let garbage = self.buffer[..pos].iter().filter(|b| **b != 0).count();
                if garbage > 0 {
                    tracing::debug!(bytes = garbage, "Skipping bytes before first start code");
                    self.discarded += garbage;
                }
                let _ = self.buffer.split_to(pos);
                self.synced = true;
                true
            }
            None => {
                // Keep a possible partial start code
                let keep = self.buffer.len().min(2);
                let drop = self.buffer.len() - keep;
                if drop > 0 {
                    self.discarded += self.buffer[..drop].iter().filter(|b| **b != 0).count();
                    let _ = self.buffer.split_to(drop);
                }
                false
            }
        }
    }

    fn take_current(&mut self) -> Option<AccessUnit> {
        let has_vcl = self.current_has_vcl;
        let keyframe = self.current_keyframe;
        let data = self.current.split().freeze();
        self.current_has_vcl = false;
        self.current_keyframe = false;

        if has_vcl {
            Some(AccessUnit::new(data, keyframe))
        } else {
            None
        }
    }

    fn on_nal(&mut self, nal: &[u8], out: &mut Vec<AccessUnit>) {
        let Some(&header) = nal.first() else {
            return;
        };
        let nalu_type = NaluType::from_byte(header);

        if opens_unit(nal).unwrap_or(false) && self.current_has_vcl {
            if let Some(unit) = self.take_current() {
                out.push(unit);
            }
        }

        self.current.put_slice(&START_CODE);
        self.current.put_slice(nal);

        if let Some(t) = nalu_type {
            self.current_has_vcl |= t.is_vcl();
            self.current_keyframe |= t.is_keyframe();

            if matches!(t, NaluType::EndSeq | NaluType::EndStream) {
                if let Some(unit) = self.take_current() {
                    out.push(unit);
                }
            }
        }
    }
}

impl Default for AnnexBParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessUnitParser for AnnexBParser {
    fn push(&mut self, chunk: &[u8], out: &mut Vec<AccessUnit>) {
        self.buffer.extend_from_slice(chunk);

        loop {
            if !self.synced && !self.sync() {
                break;
            }

            // buffer[0..3] is a start code; the NAL ends at the next one
            let Some(end) = find_start_code(&self.buffer, self.scanned) else {
                // The last two bytes may open a start code
                self.scanned = self.buffer.len().saturating_sub(2).max(3);
                break;
            };
            self.scanned = 3;

            // Zero bytes before the next start code belong to it
            let mut nal_end = end;
            while nal_end > 3 && self.buffer[nal_end - 1] == 0 {
                nal_end -= 1;
            }

            let block = self.buffer.split_to(end).freeze();
            self.on_nal(&block[3..nal_end], out);
        }

        // Close the pending unit as soon as the next NAL header shows a new
        // picture, instead of waiting for that NAL to finish
        if self.synced && self.current_has_vcl && opens_unit(&self.buffer[3..]) == Some(true) {
            if let Some(unit) = self.take_current() {
                out.push(unit);
            }
        }

        if self.buffer.len() + self.current.len() > self.max_buffer {
            let dropped = self.buffer.len() + self.current.len();
            tracing::warn!(
                bytes = dropped,
                limit = self.max_buffer,
                "Annex B buffer overflow, resynchronising"
            );
            self.discarded += dropped;
            self.reset();
        }
    }

    fn flush(&mut self, out: &mut Vec<AccessUnit>) {
        if self.synced && self.buffer.len() > 3 {
            let mut nal_end = self.buffer.len();
            while nal_end > 3 && self.buffer[nal_end - 1] == 0 {
                nal_end -= 1;
            }
            let block = self.buffer.split().freeze();
            self.on_nal(&block[3..nal_end], out);
        }
        self.scanned = 3;
        if let Some(unit) = self.take_current() {
            out.push(unit);
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.current.clear();
        self.synced = false;
        self.scanned = 3;
        self.current_has_vcl = false;
        self.current_keyframe = false;
    }

    fn buffered(&self) -> usize {
        self.buffer.len() + self.current.len()
    }

    fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1F];
    const PPS: &[u8] = &[0x68, 0xCE, 0x38, 0x80];
    // first_mb_in_slice == 0 (leading bit set)
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x21];
    const P1: &[u8] = &[0x41, 0x9A, 0x02, 0x03];
    const P2: &[u8] = &[0x41, 0x9A, 0x04, 0x05];
    // second slice of the same picture (first_mb_in_slice != 0)
    const P2_SLICE2: &[u8] = &[0x41, 0x40, 0x06];

    fn annexb(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nal);
        }
        out
    }

    fn parse_all(parser: &mut AnnexBParser, data: &[u8]) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        parser.push(data, &mut out);
        out
    }

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x68), Some(NaluType::Pps));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
        assert_eq!(NaluType::from_byte(0x09), Some(NaluType::Aud));
        assert_eq!(NaluType::from_byte(0x0E), None);
    }

    #[test]
    fn test_nalu_type_classes() {
        assert!(NaluType::Idr.is_keyframe());
        assert!(!NaluType::Slice.is_keyframe());
        assert!(NaluType::Sps.is_parameter_set());
        assert!(!NaluType::Idr.is_parameter_set());
        assert!(NaluType::Slice.is_vcl());
        assert!(NaluType::Idr.is_vcl());
        assert!(!NaluType::Sei.is_vcl());
        assert!(!NaluType::Aud.is_vcl());
    }

    #[test]
    fn test_find_start_code() {
        assert_eq!(find_start_code(&[0, 0, 1, 5], 0), Some(0));
        assert_eq!(find_start_code(&[0, 0, 0, 1, 5], 0), Some(1));
        assert_eq!(find_start_code(&[9, 0, 0, 1], 1), Some(1));
        assert_eq!(find_start_code(&[0, 0], 0), None);
        assert_eq!(find_start_code(&[0, 0, 1], 1), None);
    }

    #[test]
    fn test_units_split_on_new_picture() {
        let mut parser = AnnexBParser::new();
        let stream = annexb(&[SPS, PPS, IDR, P1, P2]);

        let units = parse_all(&mut parser, &stream);
        // IDR unit completes when P1 starts; P1 when P2 starts; P2 still pending
        assert_eq!(units.len(), 2);
        assert!(units[0].keyframe);
        assert_eq!(units[0].data.as_ref(), annexb(&[SPS, PPS, IDR]).as_slice());
        assert!(!units[1].keyframe);
        assert_eq!(units[1].data.as_ref(), annexb(&[P1]).as_slice());

        let mut rest = Vec::new();
        parser.flush(&mut rest);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].data.as_ref(), annexb(&[P2]).as_slice());

        rest.clear();
        parser.flush(&mut rest);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_multi_slice_picture_stays_together() {
        let mut parser = AnnexBParser::new();
        let mut stream = annexb(&[P2, P2_SLICE2]);
        stream.extend_from_slice(&annexb(&[P1]));

        let units = parse_all(&mut parser, &stream);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), annexb(&[P2, P2_SLICE2]).as_slice());
    }

    #[test]
    fn test_aud_delimits_units() {
        let mut parser = AnnexBParser::new();
        let aud: &[u8] = &[0x09, 0xF0];
        let stream = annexb(&[aud, P1, aud, P2, aud]);

        let units = parse_all(&mut parser, &stream);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].data.as_ref(), annexb(&[aud, P1]).as_slice());
        assert_eq!(units[1].data.as_ref(), annexb(&[aud, P2]).as_slice());
    }

    #[test]
    fn test_unit_spanning_chunks() {
        let mut parser = AnnexBParser::new();
        let stream = annexb(&[SPS, PPS, IDR, P1]);

        // Feed one byte at a time
        let mut units = Vec::new();
        for b in &stream {
            parser.push(std::slice::from_ref(b), &mut units);
        }
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), annexb(&[SPS, PPS, IDR]).as_slice());

        let mut rest = Vec::new();
        parser.flush(&mut rest);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].data.as_ref(), annexb(&[P1]).as_slice());
    }

    #[test]
    fn test_search_resumes_after_scanned_bytes() {
        let mut parser = AnnexBParser::new();
        let mut big = vec![0x65, 0x88];
        big.extend_from_slice(&[0x11; 4096]);
        let stream = annexb(&[big.as_slice(), P1]);
        let split = START_CODE.len() + big.len();

        let mut units = Vec::new();
        for chunk in stream[..split].chunks(256) {
            parser.push(chunk, &mut units);
        }
        assert!(units.is_empty());
        // Only the tail that may hold a partial start code is searched again
        assert_eq!(parser.scanned, parser.buffer.len() - 2);

        // Start code split across pushes
        parser.push(&stream[split..split + 2], &mut units);
        parser.push(&stream[split + 2..], &mut units);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), annexb(&[big.as_slice()]).as_slice());
        assert_eq!(parser.scanned, parser.buffer.len() - 2);

        parser.reset();
        assert_eq!(parser.scanned, 3);
    }

    #[test]
    fn test_three_byte_start_codes() {
        let mut parser = AnnexBParser::new();
        let mut stream = Vec::new();
        for nal in [IDR, P1] {
            stream.extend_from_slice(&[0, 0, 1]);
            stream.extend_from_slice(nal);
        }

        let units = parse_all(&mut parser, &stream);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), annexb(&[IDR]).as_slice());
    }

    #[test]
    fn test_leading_garbage_is_discarded() {
        let mut parser = AnnexBParser::new();
        let mut stream = vec![0xDE, 0xAD, 0xBE, 0xEF];
        stream.extend_from_slice(&annexb(&[IDR, P1]));

        let units = parse_all(&mut parser, &stream);
        assert_eq!(units.len(), 1);
        assert!(parser.take_discarded() >= 4);
        assert_eq!(parser.take_discarded(), 0);
    }

    #[test]
    fn test_end_of_sequence_closes_unit() {
        let mut parser = AnnexBParser::new();
        let eos: &[u8] = &[0x0A];
        let stream = annexb(&[IDR, eos, P1]);

        let units = parse_all(&mut parser, &stream);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), annexb(&[IDR, eos]).as_slice());
    }

    #[test]
    fn test_overflow_resets() {
        let mut parser = AnnexBParser::with_max_buffer(16);
        let mut stream = START_CODE.to_vec();
        stream.push(0x65);
        stream.extend_from_slice(&[0x11; 64]);

        let units = parse_all(&mut parser, &stream);
        assert!(units.is_empty());
        assert_eq!(parser.buffered(), 0);
        assert!(parser.take_discarded() > 16);
    }

    #[test]
    fn test_reset_clears_pending_unit() {
        let mut parser = AnnexBParser::new();
        let _ = parse_all(&mut parser, &annexb(&[IDR, P1]));
        parser.reset();
        assert_eq!(parser.buffered(), 0);

        let mut rest = Vec::new();
        parser.flush(&mut rest);
        assert!(rest.is_empty());
    }
}
