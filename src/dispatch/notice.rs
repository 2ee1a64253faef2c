//! Text shown to senders and recipients

use crate::ack::{AckSummary, RelayOutcome};
use crate::directory::NodeId;
use crate::dispatch::types::{DeliveryNotice, NoticeStatus, RelayRequest};
use crate::offline::{DropReason, QueuedRelay};

/// Wrap a relayed message with its origin and a reply hint
pub fn frame_relay_text(sender_label: &str, text: &str) -> String {
    format!(
        "📨 Relay from {sender_label}:\n{text}\n\n💬 To reply: {} <your message>",
        sender_label.to_lowercase()
    )
}

pub fn render_confirmed(acker_label: &str, from_queue: bool) -> String {
    if from_queue {
        format!("✅ ACK by {acker_label} (delivered from offline queue)")
    } else {
        format!("✅ ACK by {acker_label}")
    }
}

/// `confirmed` holds zero-based chunk indexes
pub fn render_unconfirmed(
    recipient_label: &str,
    message: &str,
    confirmed: &[u32],
    total_chunks: u32,
    queued: bool,
) -> String {
    let mut text = if confirmed.is_empty() || total_chunks == 0 {
        format!("❌ No ACK from {recipient_label}")
    } else {
        let missing: Vec<u32> = (0..total_chunks).filter(|i| !confirmed.contains(i)).collect();
        format!(
            "⚠️ Partial ACK from {recipient_label}: parts {} of {total_chunks} confirmed, parts {} missing",
            one_based(confirmed),
            one_based(&missing)
        )
    };

    text.push_str(&format!("\n\nMessage: \"{message}\""));
    if queued {
        text.push_str(&format!(
            "\n\n📬 Queued for delivery when {recipient_label} is heard again."
        ));
    }
    text
}

pub fn render_dropped(recipient_label: &str, message: &str, reason: DropReason) -> String {
    let why = match reason {
        DropReason::Expired => "held too long",
        DropReason::AttemptsExhausted => "no ACK after every retry",
        DropReason::OptedOut => "recipient opted out",
        DropReason::Evicted => "queue full",
    };
    format!("🗑️ Gave up relaying to {recipient_label} ({why})\n\nMessage: \"{message}\"")
}

fn one_based(indexes: &[u32]) -> String {
    indexes
        .iter()
        .map(|i| (i + 1).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn confirmed_notice(
    request: &RelayRequest,
    recipient: NodeId,
    recipient_label: String,
    summary: &AckSummary,
    acker_label: &str,
    from_queue: bool,
) -> DeliveryNotice {
    DeliveryNotice {
        request_id: request.request_id,
        sender_id: request.sender_id.clone(),
        recipient,
        text: render_confirmed(acker_label, from_queue),
        recipient_label,
        status: NoticeStatus::Confirmed,
        outcome: Some(summary.outcome),
        confirmed_chunks: summary.confirmed.clone(),
        total_chunks: summary.total_chunks,
        from_queue,
    }
}

pub fn unconfirmed_notice(
    request: &RelayRequest,
    recipient: NodeId,
    recipient_label: String,
    summary: Option<&AckSummary>,
    queued: bool,
) -> DeliveryNotice {
    let confirmed = summary.map(|s| s.confirmed.clone()).unwrap_or_default();
    let total_chunks = summary.map(|s| s.total_chunks).unwrap_or(0);

    DeliveryNotice {
        request_id: request.request_id,
        sender_id: request.sender_id.clone(),
        recipient,
        text: render_unconfirmed(
            &recipient_label,
            &request.payload_text,
            &confirmed,
            total_chunks,
            queued,
        ),
        recipient_label,
        status: if queued {
            NoticeStatus::Queued
        } else {
            NoticeStatus::NotConfirmed
        },
        outcome: Some(summary.map(|s| s.outcome).unwrap_or(RelayOutcome::NoneConfirmed)),
        confirmed_chunks: confirmed,
        total_chunks,
        from_queue: false,
    }
}

pub fn dropped_notice(
    entry: &QueuedRelay,
    recipient_label: String,
    reason: DropReason,
) -> DeliveryNotice {
    DeliveryNotice {
        request_id: entry.request_id(),
        sender_id: entry.request.sender_id.clone(),
        recipient: entry.recipient_id,
        text: render_dropped(&recipient_label, &entry.request.payload_text, reason),
        recipient_label,
        status: NoticeStatus::Dropped,
        outcome: None,
        confirmed_chunks: Vec::new(),
        total_chunks: 0,
        from_queue: true,
    }
}
