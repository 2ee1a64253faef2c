use crate::dispatch::RequestId;
use bytes::Bytes;

/// One radio-packet-sized piece of a relay message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub request_id: RequestId,
    /// Zero-based position within the message
    pub sequence_index: u32,
    pub total_chunks: u32,
    pub bytes: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.sequence_index + 1 == self.total_chunks
    }

    /// Chunks are always cut on character boundaries
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}
