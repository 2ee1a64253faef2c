use crate::ack::RelayOutcome;
use crate::directory::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RequestId)
    }
}

/// A user message to be relayed to a named recipient. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub request_id: RequestId,
    /// Mesh node id (`!hex`) or an external sender handle
    pub sender_id: String,
    /// Shortname or literal node id as typed by the sender
    pub target: String,
    pub payload_text: String,
    pub submitted_at: DateTime<Utc>,
}

impl RelayRequest {
    pub fn new(
        sender_id: impl Into<String>,
        target: impl Into<String>,
        payload_text: impl Into<String>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: RequestId::new(),
            sender_id: sender_id.into(),
            target: target.into(),
            payload_text: payload_text.into(),
            submitted_at,
        }
    }
}

/// Why a submission was turned away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitRejection {
    UnknownTarget(String),
    RecipientOptedOut(NodeId),
    /// Intake at capacity; caller should retry later
    QueueFull,
    EmptyPayload,
    /// The same request is already waiting for or held by a worker
    DuplicateRequest(RequestId),
}

impl SubmitRejection {
    pub fn code(&self) -> &'static str {
        match self {
            SubmitRejection::UnknownTarget(_) => "UNKNOWN_TARGET",
            SubmitRejection::RecipientOptedOut(_) => "RECIPIENT_OPTED_OUT",
            SubmitRejection::QueueFull => "QUEUE_FULL",
            SubmitRejection::EmptyPayload => "EMPTY_PAYLOAD",
            SubmitRejection::DuplicateRequest(_) => "DUPLICATE_REQUEST",
        }
    }
}

impl fmt::Display for SubmitRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitRejection::UnknownTarget(target) => write!(f, "❌ Unknown node '{target}'"),
            SubmitRejection::RecipientOptedOut(_) => {
                write!(f, "🚫 Recipient is not accepting relayed messages")
            }
            SubmitRejection::QueueFull => write!(f, "⚠️ Relay queue full. Try again in a moment."),
            SubmitRejection::EmptyPayload => write!(f, "❌ Nothing to relay"),
            SubmitRejection::DuplicateRequest(_) => write!(f, "⏳ That message is already being relayed"),
        }
    }
}

impl std::error::Error for SubmitRejection {}

/// Receipt for an accepted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub request_id: RequestId,
    pub recipient: NodeId,
}

pub type SubmitResult = Result<Accepted, SubmitRejection>;

/// Remaining retry budget carried by a request coming back from the offline queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTicket {
    pub enqueued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Already decremented for the attempt this ticket rides on
    pub attempts_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrigin {
    Fresh,
    Retry(RetryTicket),
}

/// Unit of work on the intake queue. Owns its request.
#[derive(Debug, Clone)]
pub struct RelayJob {
    pub request: RelayRequest,
    pub recipient: NodeId,
    pub origin: JobOrigin,
}

impl RelayJob {
    pub fn fresh(request: RelayRequest, recipient: NodeId) -> Self {
        Self {
            request,
            recipient,
            origin: JobOrigin::Fresh,
        }
    }

    pub fn retry(request: RelayRequest, recipient: NodeId, ticket: RetryTicket) -> Self {
        Self {
            request,
            recipient,
            origin: JobOrigin::Retry(ticket),
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self.origin, JobOrigin::Retry(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeStatus {
    /// Every chunk confirmed
    Confirmed,
    /// Not confirmed and not queued
    NotConfirmed,
    /// Not confirmed, held for later delivery
    Queued,
    /// A queued relay was given up on
    Dropped,
}

/// Delivery report addressed to the original sender
#[derive(Debug, Clone)]
pub struct DeliveryNotice {
    pub request_id: RequestId,
    pub sender_id: String,
    pub recipient: NodeId,
    pub recipient_label: String,
    pub status: NoticeStatus,
    pub outcome: Option<RelayOutcome>,
    pub confirmed_chunks: Vec<u32>,
    pub total_chunks: u32,
    /// Whether this notice concerns a retry from the offline queue
    pub from_queue: bool,
    /// Rendered text for the sender
    pub text: String,
}

/// Dispatcher counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub accepted: u64,
    pub rejected: u64,
    pub retries_accepted: u64,
    pub delivered: u64,
    pub partial: u64,
    pub undelivered: u64,
    pub queued: u64,
    pub in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_roundtrip_text() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_rejection_codes() {
        assert_eq!(
            SubmitRejection::UnknownTarget("x".into()).code(),
            "UNKNOWN_TARGET"
        );
        assert_eq!(
            SubmitRejection::RecipientOptedOut(NodeId(1)).code(),
            "RECIPIENT_OPTED_OUT"
        );
        assert_eq!(SubmitRejection::QueueFull.code(), "QUEUE_FULL");
        assert!(SubmitRejection::QueueFull.to_string().contains("queue full"));
        assert_eq!(
            SubmitRejection::DuplicateRequest(RequestId::new()).code(),
            "DUPLICATE_REQUEST"
        );
    }
}
