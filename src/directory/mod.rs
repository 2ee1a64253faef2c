//! Shortname Directory
//!
//! Maps short human aliases to mesh node ids and tracks which nodes have been
//! heard recently. Rebuilt periodically from the external node table.

pub mod directory;
pub mod error;
pub mod types;

pub use directory::{DirectorySnapshot, ShortnameDirectory};
pub use error::{DirectoryError, DirectoryResult};
pub use types::{NodeId, NodeInfo, NodeSource, NodeTable};
