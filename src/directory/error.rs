use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;
