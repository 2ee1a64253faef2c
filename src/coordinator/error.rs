use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Config error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Store error: {0}")]
    StoreError(#[from] crate::store::StoreError),

    #[error("Privacy error: {0}")]
    PrivacyError(#[from] crate::privacy::PrivacyError),

    #[error("Offline queue error: {0}")]
    OfflineError(#[from] crate::offline::OfflineError),

    #[error("Dispatch error: {0}")]
    DispatchError(#[from] crate::dispatch::DispatchError),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
