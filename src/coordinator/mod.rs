//! Wires the relay components together and runs their background tasks:
//! relay workers, directory refresh, ack ticker, confirmation pump and the
//! offline expiry sweep.

mod coordinator;
mod error;
mod types;

pub use coordinator::RelayCore;
pub use error::{CoordinatorError, CoordinatorResult};
pub use types::CoreStats;
