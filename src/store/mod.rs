pub mod error;
pub mod retry;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use retry::{persist_with_backoff, write_backoff};
pub use sqlite::RelayStore;
