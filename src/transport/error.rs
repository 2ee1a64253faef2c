use crate::directory::NodeId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("Send to {destination} failed: {reason}")]
    SendFailed { destination: NodeId, reason: String },

    #[error("Transmit timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type TransportResult<T> = Result<T, TransportError>;
