//! Metrics and observability module
//!
//! Key metrics exposed:
//! - Submissions by result code
//! - Chunk transmissions and ack resolutions
//! - Relay outcomes, split by fresh and retried relays
//! - Offline queue depth, resubmissions and drops

pub mod recorder;

pub use recorder::{init_metrics, RelayTimer};
