pub mod chunker;
pub mod error;
pub mod types;

pub use chunker::MessageChunker;
pub use error::{ChunkError, ChunkResult};
pub use types::Chunk;
