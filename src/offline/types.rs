//! Offline queue entry types

use crate::directory::NodeId;
use crate::dispatch::{RelayJob, RelayRequest, RequestId, RetryTicket};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A relay waiting for its recipient to come back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRelay {
    pub recipient_id: NodeId,
    pub request: RelayRequest,
    pub enqueued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts_remaining: u32,
}

impl QueuedRelay {
    pub fn new(
        recipient_id: NodeId,
        request: RelayRequest,
        now: DateTime<Utc>,
        hold_time: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            recipient_id,
            request,
            enqueued_at: now,
            expires_at: now.checked_add_signed(hold_time).unwrap_or(DateTime::<Utc>::MAX_UTC),
            attempts_remaining: max_attempts,
        }
    }

    /// Rebuild an entry for a request whose retry failed
    pub fn from_ticket(recipient_id: NodeId, request: RelayRequest, ticket: RetryTicket) -> Self {
        Self {
            recipient_id,
            request,
            enqueued_at: ticket.enqueued_at,
            expires_at: ticket.expires_at,
            attempts_remaining: ticket.attempts_remaining,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request.request_id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Spend one attempt and hand the request to the dispatcher
    pub fn into_retry_job(self) -> RelayJob {
        let ticket = RetryTicket {
            enqueued_at: self.enqueued_at,
            expires_at: self.expires_at,
            attempts_remaining: self.attempts_remaining.saturating_sub(1),
        };
        RelayJob::retry(self.request, self.recipient_id, ticket)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    Expired,
    AttemptsExhausted,
    OptedOut,
    /// Pushed out by a newer entry for the same recipient
    Evicted,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Expired => "expired",
            DropReason::AttemptsExhausted => "attempts_exhausted",
            DropReason::OptedOut => "opted_out",
            DropReason::Evicted => "evicted",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry that left the queue for good
#[derive(Debug, Clone)]
pub struct DroppedRelay {
    pub entry: QueuedRelay,
    pub reason: DropReason,
}

/// Result of a successful enqueue
#[derive(Debug, Clone, Default)]
pub struct EnqueueReceipt {
    /// Oldest entry pushed out to make room
    pub evicted: Option<QueuedRelay>,
    /// Entries now held for the recipient
    pub depth: usize,
}

/// Result of a re-delivery pass for one recipient
#[derive(Debug, Clone, Default)]
pub struct RedeliveryReport {
    pub resubmitted: Vec<RequestId>,
    pub dropped: Vec<DroppedRelay>,
    /// Entries left in place because the intake was full
    pub deferred: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfflineStats {
    pub queued: usize,
    pub recipients: usize,
    pub total_enqueued: u64,
    pub total_resubmitted: u64,
    pub total_evicted: u64,
    pub total_expired: u64,
    pub total_exhausted: u64,
    pub total_opted_out: u64,
}

impl fmt::Display for OfflineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Offline: {} queued for {} recipients, {} resubmitted, {} evicted, {} expired, {} exhausted",
            self.queued,
            self.recipients,
            self.total_resubmitted,
            self.total_evicted,
            self.total_expired,
            self.total_exhausted
        )
    }
}
