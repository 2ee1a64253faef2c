use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrivacyError {
    #[error("Failed to persist privacy preference: {0}")]
    Store(#[from] StoreError),
}

pub type PrivacyResult<T> = Result<T, PrivacyError>;
