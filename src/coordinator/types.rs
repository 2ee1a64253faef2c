use crate::ack::AckStats;
use crate::dispatch::DispatchStats;
use crate::offline::OfflineStats;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time view of the whole relay core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreStats {
    pub dispatch: DispatchStats,
    pub acks: AckStats,
    pub offline: OfflineStats,
    pub intake_depth: usize,
    pub known_nodes: usize,
    pub active_nodes: usize,
    pub opted_out: usize,
}

impl fmt::Display for CoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Relays: {} accepted, {} rejected, {} delivered, {} partial, {} undelivered, {} in flight | Nodes: {}/{} active | {}",
            self.dispatch.accepted,
            self.dispatch.rejected,
            self.dispatch.delivered,
            self.dispatch.partial,
            self.dispatch.undelivered,
            self.dispatch.in_flight,
            self.active_nodes,
            self.known_nodes,
            self.offline
        )
    }
}
