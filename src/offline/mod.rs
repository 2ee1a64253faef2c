//! Offline Queue
//!
//! Store-and-forward for relays whose recipient did not confirm. Entries are
//! kept per recipient, bounded, expiring, and persisted on every change.

pub mod error;
pub mod queue;
pub mod types;

pub use error::{OfflineError, OfflineResult};
pub use queue::OfflineQueue;
pub use types::{
    DropReason, DroppedRelay, EnqueueReceipt, OfflineStats, QueuedRelay, RedeliveryReport,
};
