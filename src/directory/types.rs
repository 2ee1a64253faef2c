//! Node identity and node-table types

use crate::directory::error::DirectoryError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Mesh node identifier, rendered as `!` followed by eight hex digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .trim()
            .strip_prefix('!')
            .ok_or_else(|| DirectoryError::InvalidNodeId(s.to_string()))?;

        if hex.is_empty() || hex.len() > 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DirectoryError::InvalidNodeId(s.to_string()));
        }

        u32::from_str_radix(hex, 16)
            .map(NodeId)
            .map_err(|_| DirectoryError::InvalidNodeId(s.to_string()))
    }
}

/// One row of the external node table. Read-only to the relay core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub shortname: String,
    pub last_heard_at: Option<DateTime<Utc>>,
    /// Last reported SNR
    pub signal_quality: Option<f32>,
    pub hop_count: Option<u8>,
}

impl NodeInfo {
    pub fn new(node_id: NodeId, shortname: impl Into<String>) -> Self {
        Self {
            node_id,
            shortname: shortname.into(),
            last_heard_at: None,
            signal_quality: None,
            hop_count: None,
        }
    }

    pub fn heard_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_heard_at = Some(at);
        self
    }

    pub fn with_signal(mut self, snr: f32, hops: u8) -> Self {
        self.signal_quality = Some(snr);
        self.hop_count = Some(hops);
        self
    }

    /// Firmware fallback labels like `Node_1a2b` are not real shortnames
    pub fn has_real_shortname(&self) -> bool {
        let name = self.shortname.trim();
        !name.is_empty() && !name.starts_with("Node_")
    }
}

/// Read-only view of the external node directory
pub trait NodeSource: Send + Sync {
    /// Latest known state of every node
    fn snapshot(&self) -> Vec<NodeInfo>;
}

/// In-process node table, fed by whatever hears the radio
#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: RwLock<HashMap<NodeId, NodeInfo>>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, node: NodeInfo) {
        self.nodes.write().insert(node.node_id, node);
    }

    /// Record that a node was heard; unknown nodes get a placeholder name
    pub fn mark_heard(&self, node_id: NodeId, at: DateTime<Utc>) {
        let mut nodes = self.nodes.write();
        nodes
            .entry(node_id)
            .or_insert_with(|| NodeInfo::new(node_id, format!("Node_{:04x}", node_id.0 & 0xffff)))
            .last_heard_at = Some(at);
    }

    pub fn remove(&self, node_id: &NodeId) -> Option<NodeInfo> {
        self.nodes.write().remove(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeSource for NodeTable {
    fn snapshot(&self) -> Vec<NodeInfo> {
        self.nodes.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_and_parse() {
        let id = NodeId(0xa1b2c3d4);
        assert_eq!(id.to_string(), "!a1b2c3d4");
        assert_eq!("!a1b2c3d4".parse::<NodeId>().unwrap(), id);
        assert_eq!("!ff".parse::<NodeId>().unwrap(), NodeId(0xff));
    }

    #[test]
    fn test_node_id_rejects_garbage() {
        assert!("a1b2c3d4".parse::<NodeId>().is_err());
        assert!("!".parse::<NodeId>().is_err());
        assert!("!123456789".parse::<NodeId>().is_err());
        assert!("!snmo".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_placeholder_shortnames() {
        assert!(NodeInfo::new(NodeId(1), "SnMo").has_real_shortname());
        assert!(!NodeInfo::new(NodeId(1), "Node_00ab").has_real_shortname());
        assert!(!NodeInfo::new(NodeId(1), "  ").has_real_shortname());
    }

    #[test]
    fn test_node_table_mark_heard_inserts_placeholder() {
        let table = NodeTable::new();
        let now = Utc::now();
        table.mark_heard(NodeId(0x1234abcd), now);

        let nodes = table.snapshot();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].shortname, "Node_abcd");
        assert_eq!(nodes[0].last_heard_at, Some(now));
    }
}
