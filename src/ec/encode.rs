//! Segmenter for the EC write path: buffers the incoming byte stream
//! and hands every full segment to the codec.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::common::errors::StoreError;
use crate::storage::codec::EcCodec;

/// One encoded segment: fragment `i` goes to the writer holding
/// fragment slot `i`.
pub type FragmentSet = Vec<Bytes>;

pub struct EcSegmenter {
    codec: Arc<dyn EcCodec>,
    segment_size: usize,
    buf: BytesMut,
}

impl EcSegmenter {
    pub fn new(codec: Arc<dyn EcCodec>, segment_size: u64) -> Self {
        Self {
            codec,
            segment_size: segment_size as usize,
            buf: BytesMut::new(),
        }
    }

    /// Buffers `data` and encodes every completed segment.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<FragmentSet>, StoreError> {
        self.buf.extend_from_slice(data);
        let mut encoded = Vec::new();
        while self.buf.len() >= self.segment_size {
            let segment = self.buf.split_to(self.segment_size);
            encoded.push(self.codec.encode(&segment)?);
        }
        Ok(encoded)
    }

    /// Encodes whatever is buffered as the (possibly empty) tail
    /// segment. An empty tail still yields k+m empty fragments so every
    /// writer sees the end of its body.
    pub fn finish(self) -> Result<FragmentSet, StoreError> {
        self.codec.encode(&self.buf)
    }
}
