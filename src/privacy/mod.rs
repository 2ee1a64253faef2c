//! Privacy Registry
//!
//! Nodes that opted out of relayed traffic. Reads come from memory, writes
//! are durable before they are visible.

pub mod error;
pub mod registry;

pub use error::{PrivacyError, PrivacyResult};
pub use registry::PrivacyRegistry;
