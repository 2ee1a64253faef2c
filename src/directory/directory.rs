//! Shortname directory
//!
//! Holds an immutable [`DirectorySnapshot`] behind an `RwLock<Arc<_>>`. Readers
//! clone the `Arc` and release the lock immediately; a rebuild constructs the
//! next snapshot off-lock and swaps the pointer, so a reader sees either the
//! old or the new snapshot in full.

use crate::clock::to_chrono;
use crate::directory::error::{DirectoryError, DirectoryResult};
use crate::directory::types::{NodeId, NodeInfo};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One complete, immutable view of the node table
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    by_alias: HashMap<String, NodeId>,
    nodes: HashMap<NodeId, NodeInfo>,
    active: HashSet<NodeId>,
    built_at: DateTime<Utc>,
}

impl DirectorySnapshot {
    pub fn empty() -> Self {
        Self {
            by_alias: HashMap::new(),
            nodes: HashMap::new(),
            active: HashSet::new(),
            built_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Index a node table. When several nodes share a shortname the most
    /// recently heard one owns it.
    pub fn build(nodes: Vec<NodeInfo>, now: DateTime<Utc>, active_window: Duration) -> Self {
        let mut by_alias: HashMap<String, NodeId> = HashMap::new();
        let mut node_map = HashMap::with_capacity(nodes.len());
        let mut active = HashSet::new();

        for node in nodes {
            if let Some(heard) = node.last_heard_at {
                if now.signed_duration_since(heard) <= active_window {
                    active.insert(node.node_id);
                }
            }
            node_map.insert(node.node_id, node);
        }

        for node in node_map.values() {
            if !node.has_real_shortname() {
                continue;
            }
            let alias = node.shortname.trim().to_lowercase();
            match by_alias.get(&alias) {
                Some(existing) => {
                    let current = &node_map[existing];
                    if (node.last_heard_at, node.node_id) > (current.last_heard_at, current.node_id)
                    {
                        by_alias.insert(alias, node.node_id);
                    }
                }
                None => {
                    by_alias.insert(alias, node.node_id);
                }
            }
        }

        Self {
            by_alias,
            nodes: node_map,
            active,
            built_at: now,
        }
    }

    /// Case-insensitive shortname lookup
    pub fn resolve(&self, alias: &str) -> Option<NodeId> {
        self.by_alias.get(&alias.trim().to_lowercase()).copied()
    }

    pub fn node(&self, node_id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    pub fn shortname_of(&self, node_id: &NodeId) -> Option<&str> {
        self.nodes
            .get(node_id)
            .filter(|n| n.has_real_shortname())
            .map(|n| n.shortname.trim())
    }

    pub fn is_active(&self, node_id: &NodeId) -> bool {
        self.active.contains(node_id)
    }

    pub fn active_nodes(&self) -> &HashSet<NodeId> {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}

/// Shortname → node resolution with atomic snapshot refresh
pub struct ShortnameDirectory {
    current: RwLock<Arc<DirectorySnapshot>>,
    active_window: Duration,
}

impl ShortnameDirectory {
    pub fn new(active_window: std::time::Duration) -> Self {
        Self {
            current: RwLock::new(Arc::new(DirectorySnapshot::empty())),
            active_window: to_chrono(active_window),
        }
    }

    /// Current snapshot. Hold on to it to get repeatable reads.
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.current.read().clone()
    }

    pub fn resolve(&self, alias: &str) -> Option<NodeId> {
        self.snapshot().resolve(alias)
    }

    /// Resolve a shortname, falling back to a literal `!hex` node id
    pub fn resolve_target(&self, target: &str) -> DirectoryResult<NodeId> {
        if let Some(node_id) = self.resolve(target) {
            return Ok(node_id);
        }
        target
            .parse::<NodeId>()
            .map_err(|_| DirectoryError::UnknownTarget(target.trim().to_string()))
    }

    /// Shortname if known, otherwise the `!hex` id
    pub fn label_of(&self, node_id: &NodeId) -> String {
        self.snapshot()
            .shortname_of(node_id)
            .map(str::to_string)
            .unwrap_or_else(|| node_id.to_string())
    }

    pub fn is_active(&self, node_id: &NodeId) -> bool {
        self.snapshot().is_active(node_id)
    }

    /// Rebuild from a fresh node table and swap it in. Returns the nodes that
    /// were not recently heard in the previous snapshot but are now.
    pub fn rebuild(&self, nodes: Vec<NodeInfo>, now: DateTime<Utc>) -> Vec<NodeId> {
        let next = Arc::new(DirectorySnapshot::build(nodes, now, self.active_window));

        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, next.clone())
        };

        let mut newly_active: Vec<NodeId> = next
            .active_nodes()
            .difference(previous.active_nodes())
            .copied()
            .collect();
        newly_active.sort();

        tracing::debug!(
            nodes = next.len(),
            aliases = next.by_alias.len(),
            active = next.active_nodes().len(),
            newly_active = newly_active.len(),
            "shortname directory rebuilt"
        );

        newly_active
    }
}
