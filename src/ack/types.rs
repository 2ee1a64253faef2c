use crate::directory::NodeId;
use crate::dispatch::RequestId;
use crate::transport::PacketId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckState {
    Awaiting,
    Confirmed,
    Expired,
}

impl AckState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AckState::Confirmed | AckState::Expired)
    }
}

impl fmt::Display for AckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AckState::Awaiting => "awaiting",
            AckState::Confirmed => "confirmed",
            AckState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Identifies one chunk of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckKey {
    pub request_id: RequestId,
    pub sequence_index: u32,
}

/// Delivery-confirmation bookkeeping for one transmitted chunk
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub request_id: RequestId,
    pub sequence_index: u32,
    pub target_node_id: NodeId,
    /// `None` when the transport never accepted the chunk
    pub packet_id: Option<PacketId>,
    pub deadline: DateTime<Utc>,
    pub state: AckState,
    /// Node that sent the confirmation, when known
    pub confirmed_by: Option<NodeId>,
}

impl PendingAck {
    pub fn key(&self) -> AckKey {
        AckKey {
            request_id: self.request_id,
            sequence_index: self.sequence_index,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == AckState::Awaiting && now >= self.deadline
    }
}

/// Aggregate delivery result over all chunks of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayOutcome {
    AllConfirmed,
    Partial,
    NoneConfirmed,
}

impl RelayOutcome {
    /// Fold terminal chunk states into an outcome. `None` if any chunk is
    /// still awaiting or there are no chunks at all.
    pub fn from_states<I>(states: I) -> Option<Self>
    where
        I: IntoIterator<Item = AckState>,
    {
        let mut confirmed = 0usize;
        let mut expired = 0usize;
        for state in states {
            match state {
                AckState::Confirmed => confirmed += 1,
                AckState::Expired => expired += 1,
                AckState::Awaiting => return None,
            }
        }

        match (confirmed, expired) {
            (0, 0) => None,
            (_, 0) => Some(RelayOutcome::AllConfirmed),
            (0, _) => Some(RelayOutcome::NoneConfirmed),
            _ => Some(RelayOutcome::Partial),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, RelayOutcome::AllConfirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::AllConfirmed => "all_confirmed",
            RelayOutcome::Partial => "partial",
            RelayOutcome::NoneConfirmed => "none_confirmed",
        }
    }
}

/// Final per-request ack report, produced when the tracker lets go of a request
#[derive(Debug, Clone)]
pub struct AckSummary {
    pub request_id: RequestId,
    pub outcome: RelayOutcome,
    pub total_chunks: u32,
    pub confirmed: Vec<u32>,
    pub expired: Vec<u32>,
    /// First node seen confirming a chunk of this request
    pub acked_by: Option<NodeId>,
}

/// Confirmation event from the radio transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckEvent {
    pub packet_id: PacketId,
    pub from: Option<NodeId>,
}

impl AckEvent {
    pub fn new(packet_id: PacketId, from: Option<NodeId>) -> Self {
        Self { packet_id, from }
    }
}

/// Tracker counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckStats {
    pub registered: u64,
    pub confirmed: u64,
    pub expired: u64,
    pub late_confirmations: u64,
    pub early_confirmations: u64,
    pub awaiting: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_all_confirmed() {
        let outcome = RelayOutcome::from_states([AckState::Confirmed, AckState::Confirmed]);
        assert_eq!(outcome, Some(RelayOutcome::AllConfirmed));
    }

    #[test]
    fn test_outcome_none_confirmed() {
        let outcome = RelayOutcome::from_states([AckState::Expired]);
        assert_eq!(outcome, Some(RelayOutcome::NoneConfirmed));
    }

    #[test]
    fn test_outcome_partial() {
        let outcome = RelayOutcome::from_states([
            AckState::Confirmed,
            AckState::Expired,
            AckState::Confirmed,
        ]);
        assert_eq!(outcome, Some(RelayOutcome::Partial));
    }

    #[test]
    fn test_outcome_pending_while_awaiting() {
        assert_eq!(
            RelayOutcome::from_states([AckState::Confirmed, AckState::Awaiting]),
            None
        );
        assert_eq!(RelayOutcome::from_states([]), None);
    }
}
