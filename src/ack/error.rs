use crate::dispatch::RequestId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    #[error("Chunk {sequence_index} of {request_id} is already tracked")]
    AlreadyTracked {
        request_id: RequestId,
        sequence_index: u32,
    },

    #[error("Chunk {sequence_index} out of range for {total_chunks}-chunk message")]
    ChunkOutOfRange {
        sequence_index: u32,
        total_chunks: u32,
    },

    #[error("No acks tracked for request {0}")]
    UnknownRequest(RequestId),

    #[error("Request {request_id} still has {outstanding} unresolved chunks")]
    NotFinished {
        request_id: RequestId,
        outstanding: usize,
    },
}

pub type AckResult<T> = Result<T, AckError>;
