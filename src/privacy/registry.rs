use crate::clock::SharedClock;
use crate::directory::NodeId;
use crate::privacy::error::PrivacyResult;
use crate::store::{persist_with_backoff, write_backoff, RelayStore};
use parking_lot::RwLock;
use std::collections::HashSet;

/// Opt-out set backed by the relay store
pub struct PrivacyRegistry {
    store: RelayStore,
    clock: SharedClock,
    opted_out: RwLock<HashSet<NodeId>>,
    /// Serializes writers so the cache never runs ahead of, or behind, the store
    write_lock: tokio::sync::Mutex<()>,
}

impl PrivacyRegistry {
    /// Load persisted preferences
    pub async fn load(store: RelayStore, clock: SharedClock) -> PrivacyResult<Self> {
        let opted_out: HashSet<NodeId> = store.load_opted_out().await?.into_iter().collect();

        tracing::info!(opted_out = opted_out.len(), "privacy registry loaded");

        Ok(Self {
            store,
            clock,
            opted_out: RwLock::new(opted_out),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn is_opted_out(&self, node_id: &NodeId) -> bool {
        self.opted_out.read().contains(node_id)
    }

    /// Persist a preference, then make it visible. On failure the previous
    /// preference stays in effect.
    pub async fn set_opt_out(&self, node_id: NodeId, opted_out: bool) -> PrivacyResult<()> {
        let _guard = self.write_lock.lock().await;
        let at = self.clock.now();

        persist_with_backoff("save_privacy", write_backoff(), || {
            self.store.save_privacy(node_id, opted_out, at)
        })
        .await?;

        let mut set = self.opted_out.write();
        if opted_out {
            set.insert(node_id);
        } else {
            set.remove(&node_id);
        }
        drop(set);

        tracing::info!(node = %node_id, opted_out, "privacy preference updated");
        Ok(())
    }

    pub fn opted_out_count(&self) -> usize {
        self.opted_out.read().len()
    }
}
