use crate::ack::AckError;
use crate::chunk::ChunkError;
use crate::offline::OfflineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Chunking failed: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Ack tracking failed: {0}")]
    Ack(#[from] AckError),

    #[error("Offline queue failed: {0}")]
    Offline(#[from] OfflineError),

    #[error("Invalid dispatcher configuration: {0}")]
    InvalidConfig(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
