use crate::directory::NodeId;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Recipient {0} has opted out of relays")]
    RecipientOptedOut(NodeId),

    #[error("Offline queue persistence failed: {0}")]
    Store(#[from] StoreError),
}

pub type OfflineResult<T> = Result<T, OfflineError>;
