use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Message needs {0} chunks, more than can be numbered")]
    TooManyChunks(usize),
}

pub type ChunkResult<T> = std::result::Result<T, ChunkError>;
