use bytes::Bytes;

use super::error::{ChunkError, ChunkResult};
use super::types::Chunk;
use crate::dispatch::RequestId;

/// Smallest budget that always fits one UTF-8 code point
const MIN_CHUNK_BYTES: usize = 4;

pub struct MessageChunker {
    max_chunk_bytes: usize,
}

impl MessageChunker {
    pub fn new(max_chunk_bytes: usize) -> ChunkResult<Self> {
        if max_chunk_bytes < MIN_CHUNK_BYTES {
            return Err(ChunkError::InvalidChunkSize(format!(
                "{max_chunk_bytes} bytes (minimum {MIN_CHUNK_BYTES})"
            )));
        }
        Ok(Self { max_chunk_bytes })
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }

    /// Split text into ordered chunks of at most `max_chunk_bytes` each.
    ///
    /// Leading and trailing whitespace is dropped; everything else is kept, so
    /// concatenating the chunks gives back the trimmed text. Blank text gives
    /// no chunks.
    pub fn split(&self, request_id: RequestId, text: &str) -> ChunkResult<Vec<Chunk>> {
        let pieces = self.pieces(text);

        let total_chunks =
            u32::try_from(pieces.len()).map_err(|_| ChunkError::TooManyChunks(pieces.len()))?;

        let chunks = pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| Chunk {
                request_id,
                sequence_index: index as u32,
                total_chunks,
                bytes: Bytes::copy_from_slice(piece.as_bytes()),
            })
            .collect();

        Ok(chunks)
    }

    /// Number of chunks `text` would produce
    pub fn count(&self, text: &str) -> usize {
        self.pieces(text).len()
    }

    fn pieces<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut pieces = Vec::new();
        let mut rest = text.trim();

        while !rest.is_empty() {
            if rest.len() <= self.max_chunk_bytes {
                pieces.push(rest);
                break;
            }

            let mut cut = self.max_chunk_bytes;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }

            // Break after the last whitespace inside the budget, or hard-cut
            // a word that is longer than the budget
            let split_at = rest[..cut]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(cut);

            let (head, tail) = rest.split_at(split_at);
            pieces.push(head);
            rest = tail;
        }

        pieces
    }
}
