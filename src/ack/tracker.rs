use crate::ack::error::{AckError, AckResult};
use crate::ack::types::{AckKey, AckState, AckStats, AckSummary, PendingAck, RelayOutcome};
use crate::clock::{to_chrono, SharedClock};
use crate::directory::NodeId;
use crate::dispatch::RequestId;
use crate::metrics::recorder;
use crate::transport::PacketId;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::oneshot;

/// Confirmations for packets nobody registered yet
const EARLY_BUFFER_CAPACITY: usize = 256;

/// Resolves once the chunk it was issued for reaches a terminal state
#[derive(Debug)]
pub struct AckWaiter {
    key: AckKey,
    rx: oneshot::Receiver<AckState>,
}

impl AckWaiter {
    pub fn key(&self) -> AckKey {
        self.key
    }

    /// Wait for the terminal state. A tracker that lets go of the chunk
    /// without resolving it counts as expiry.
    pub async fn resolved(self) -> AckState {
        self.rx.await.unwrap_or(AckState::Expired)
    }
}

struct RequestAcks {
    total_chunks: u32,
    acks: BTreeMap<u32, PendingAck>,
    waiters: HashMap<u32, oneshot::Sender<AckState>>,
}

struct EarlyConfirmation {
    packet_id: PacketId,
    from: Option<NodeId>,
    received_at: DateTime<Utc>,
}

#[derive(Default)]
struct TrackerState {
    requests: HashMap<RequestId, RequestAcks>,
    by_packet: HashMap<PacketId, AckKey>,
    early: VecDeque<EarlyConfirmation>,
    /// Packet ids of finalized or discarded requests, with the time they left
    retired: HashMap<PacketId, DateTime<Utc>>,
    stats: AckStats,
}

impl TrackerState {
    fn resolve(&mut self, key: AckKey, state: AckState, from: Option<NodeId>) -> bool {
        let Some(request) = self.requests.get_mut(&key.request_id) else {
            return false;
        };
        let Some(ack) = request.acks.get_mut(&key.sequence_index) else {
            return false;
        };
        if ack.state.is_terminal() {
            return false;
        }

        ack.state = state;
        if state == AckState::Confirmed {
            ack.confirmed_by = from;
            self.stats.confirmed += 1;
        } else {
            self.stats.expired += 1;
        }
        self.stats.awaiting = self.stats.awaiting.saturating_sub(1);

        if let Some(waiter) = request.waiters.remove(&key.sequence_index) {
            let _ = waiter.send(state);
        }
        recorder::record_ack_resolved(state);
        true
    }

    fn take_early(&mut self, packet_id: PacketId) -> Option<EarlyConfirmation> {
        let position = self.early.iter().position(|e| e.packet_id == packet_id)?;
        self.early.remove(position)
    }

    fn prune_early(&mut self, cutoff: DateTime<Utc>) {
        self.early.retain(|e| e.received_at > cutoff);
        self.retired.retain(|_, retired_at| *retired_at > cutoff);
    }

    fn retire(&mut self, request: &RequestAcks, now: DateTime<Utc>) {
        for packet_id in request.acks.values().filter_map(|ack| ack.packet_id) {
            self.by_packet.remove(&packet_id);
            self.retired.insert(packet_id, now);
        }
    }
}

/// Tracks one `PendingAck` per transmitted chunk.
///
/// Confirmations are matched by packet id. Deadlines are evaluated against
/// the injected clock whenever `expire_due` runs.
pub struct AckTracker {
    clock: SharedClock,
    ack_timeout: Duration,
    state: Mutex<TrackerState>,
}

impl AckTracker {
    pub fn new(clock: SharedClock, ack_timeout: std::time::Duration) -> Self {
        Self {
            clock,
            ack_timeout: to_chrono(ack_timeout),
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn ack_timeout(&self) -> std::time::Duration {
        self.ack_timeout.to_std().unwrap_or_default()
    }

    fn early_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.ack_timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Start tracking a transmitted chunk.
    ///
    /// `packet_id` is `None` when the radio never took the chunk; the ack is
    /// then created already expired.
    pub fn register(
        &self,
        request_id: RequestId,
        sequence_index: u32,
        total_chunks: u32,
        target_node_id: NodeId,
        packet_id: Option<PacketId>,
    ) -> AckResult<AckWaiter> {
        if sequence_index >= total_chunks {
            return Err(AckError::ChunkOutOfRange {
                sequence_index,
                total_chunks,
            });
        }

        let now = self.clock.now();
        let key = AckKey {
            request_id,
            sequence_index,
        };
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock();
        let request = state
            .requests
            .entry(request_id)
            .or_insert_with(|| RequestAcks {
                total_chunks,
                acks: BTreeMap::new(),
                waiters: HashMap::new(),
            });
        if request.acks.contains_key(&sequence_index) {
            return Err(AckError::AlreadyTracked {
                request_id,
                sequence_index,
            });
        }

        request.acks.insert(
            sequence_index,
            PendingAck {
                request_id,
                sequence_index,
                target_node_id,
                packet_id,
                deadline: now
                    .checked_add_signed(self.ack_timeout)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                state: AckState::Awaiting,
                confirmed_by: None,
            },
        );
        request.waiters.insert(sequence_index, tx);
        state.stats.registered += 1;
        state.stats.awaiting += 1;

        match packet_id {
            None => {
                state.resolve(key, AckState::Expired, None);
            }
            Some(packet_id) => {
                state.retired.remove(&packet_id);
                state.by_packet.insert(packet_id, key);
                if let Some(early) = state.take_early(packet_id) {
                    state.stats.early_confirmations += 1;
                    state.resolve(key, AckState::Confirmed, early.from);
                }
            }
        }

        tracing::debug!(
            request_id = %request_id,
            chunk = sequence_index,
            total = total_chunks,
            target = %target_node_id,
            packet = ?packet_id,
            "ack registered"
        );

        Ok(AckWaiter { key, rx })
    }

    /// Apply a confirmation from the radio. Returns true if it moved a chunk
    /// to `Confirmed`.
    pub fn confirm(&self, packet_id: PacketId, from: Option<NodeId>) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let cutoff = self.early_cutoff(now);
        let recently_retired = state
            .retired
            .get(&packet_id)
            .is_some_and(|retired_at| *retired_at > cutoff);
        if recently_retired && !state.by_packet.contains_key(&packet_id) {
            state.stats.late_confirmations += 1;
            recorder::record_late_ack();
            tracing::debug!(packet = %packet_id, "confirmation for a finished request ignored");
            return false;
        }

        let Some(key) = state.by_packet.get(&packet_id).copied() else {
            // The worker may not have registered the packet yet
            state.prune_early(cutoff);
            if state.early.len() >= EARLY_BUFFER_CAPACITY {
                state.early.pop_front();
            }
            state.early.push_back(EarlyConfirmation {
                packet_id,
                from,
                received_at: now,
            });
            return false;
        };

        if state.resolve(key, AckState::Confirmed, from) {
            tracing::debug!(
                request_id = %key.request_id,
                chunk = key.sequence_index,
                packet = %packet_id,
                from = ?from,
                "ack confirmed"
            );
            true
        } else {
            state.stats.late_confirmations += 1;
            recorder::record_late_ack();
            tracing::debug!(packet = %packet_id, "late confirmation ignored");
            false
        }
    }

    /// Expire every awaiting chunk whose deadline is at or before `now`
    pub fn expire_due(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();

        let overdue: Vec<AckKey> = state
            .requests
            .values()
            .flat_map(|request| request.acks.values())
            .filter(|ack| ack.is_overdue(now))
            .map(PendingAck::key)
            .collect();

        let mut expired = 0;
        for key in overdue {
            if state.resolve(key, AckState::Expired, None) {
                expired += 1;
                tracing::debug!(
                    request_id = %key.request_id,
                    chunk = key.sequence_index,
                    "ack expired"
                );
            }
        }

        state.prune_early(self.early_cutoff(now));
        expired
    }

    /// Expire one chunk regardless of its deadline
    pub fn force_expire(&self, key: AckKey) -> bool {
        self.state.lock().resolve(key, AckState::Expired, None)
    }

    pub fn state_of(&self, key: AckKey) -> Option<AckState> {
        let state = self.state.lock();
        state
            .requests
            .get(&key.request_id)
            .and_then(|request| request.acks.get(&key.sequence_index))
            .map(|ack| ack.state)
    }

    /// Snapshot of the acks held for a request, in chunk order
    pub fn pending_for(&self, request_id: &RequestId) -> Vec<PendingAck> {
        let state = self.state.lock();
        state
            .requests
            .get(request_id)
            .map(|request| request.acks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Compute the outcome of a request whose chunks are all terminal and
    /// drop its acks
    pub fn finalize(&self, request_id: RequestId) -> AckResult<AckSummary> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let request = state
            .requests
            .get(&request_id)
            .ok_or(AckError::UnknownRequest(request_id))?;

        let outstanding = request.total_chunks as usize
            - request
                .acks
                .values()
                .filter(|ack| ack.state.is_terminal())
                .count();
        let outcome = RelayOutcome::from_states(request.acks.values().map(|ack| ack.state));

        let outcome = match outcome {
            Some(outcome) if outstanding == 0 => outcome,
            _ => {
                return Err(AckError::NotFinished {
                    request_id,
                    outstanding,
                })
            }
        };

        let request = state
            .requests
            .remove(&request_id)
            .ok_or(AckError::UnknownRequest(request_id))?;
        state.retire(&request, now);

        let mut summary = AckSummary {
            request_id,
            outcome,
            total_chunks: request.total_chunks,
            confirmed: Vec::new(),
            expired: Vec::new(),
            acked_by: None,
        };
        for ack in request.acks.into_values() {
            match ack.state {
                AckState::Confirmed => {
                    summary.confirmed.push(ack.sequence_index);
                    summary.acked_by = summary.acked_by.or(ack.confirmed_by);
                }
                _ => summary.expired.push(ack.sequence_index),
            }
        }

        Ok(summary)
    }

    /// Drop every ack held for a request without computing an outcome.
    ///
    /// Used when a relay attempt fails part-way; waiters still pending
    /// resolve as expired. Returns the number of acks dropped.
    pub fn discard(&self, request_id: RequestId) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let Some(request) = state.requests.remove(&request_id) else {
            return 0;
        };
        state.retire(&request, now);

        let open = request
            .acks
            .values()
            .filter(|ack| !ack.state.is_terminal())
            .count();
        state.stats.awaiting = state.stats.awaiting.saturating_sub(open);

        tracing::debug!(
            request_id = %request_id,
            acks = request.acks.len(),
            open,
            "acks discarded"
        );
        request.acks.len()
    }

    pub fn stats(&self) -> AckStats {
        self.state.lock().stats.clone()
    }
}
