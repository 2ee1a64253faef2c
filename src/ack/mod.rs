//! Ack Tracker
//!
//! Per-chunk delivery confirmation: each transmitted chunk waits in
//! `Awaiting` until a matching confirmation or its deadline, whichever comes
//! first. Terminal states never change.

pub mod error;
pub mod tracker;
pub mod types;

pub use error::{AckError, AckResult};
pub use tracker::{AckTracker, AckWaiter};
pub use types::{AckEvent, AckKey, AckState, AckStats, AckSummary, PendingAck, RelayOutcome};
