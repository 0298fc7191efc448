//! Access unit extraction
//!
//! Parsers turn an arbitrary chunking of the bitstream into complete access
//! units. A unit may span many chunks and one chunk may hold many units.

use bytes::Bytes;

/// Default cap on bytes held while waiting for a unit to complete (8 MiB)
pub const DEFAULT_MAX_BUFFER: usize = 8 * 1024 * 1024;

/// One independently decodable unit of the bitstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Unit bytes in the codec's native framing
    pub data: Bytes,
    /// Whether the unit starts a new group of pictures
    pub keyframe: bool,
}

impl AccessUnit {
    pub fn new(data: Bytes, keyframe: bool) -> Self {
        Self { data, keyframe }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Incremental access unit parser
pub trait AccessUnitParser: Send {
    /// Append a chunk and collect every unit it completes into `out`
    fn push(&mut self, chunk: &[u8], out: &mut Vec<AccessUnit>);

    /// Emit whatever is still being assembled (end of stream)
    fn flush(&mut self, out: &mut Vec<AccessUnit>);

    /// Drop all buffered state
    fn reset(&mut self);

    /// Bytes currently buffered
    fn buffered(&self) -> usize;

    /// Bytes thrown away since the last call (overflow or garbage)
    fn take_discarded(&mut self) -> usize;
}
