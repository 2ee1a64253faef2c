//! Metrics recorder for relay operations
//!
//! Everything goes through the `metrics` facade; with no recorder installed
//! the calls are no-ops.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::ack::{AckState, RelayOutcome};
use crate::offline::DropReason;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    describe_metrics();
}

fn describe_metrics() {
    describe_counter!(
        "meshrelay_submissions_total",
        "Relay submissions by result code"
    );
    describe_counter!("meshrelay_chunks_sent_total", "Chunks handed to the radio");
    describe_counter!(
        "meshrelay_bytes_sent_total",
        "Chunk payload bytes handed to the radio"
    );
    describe_counter!(
        "meshrelay_transmit_failures_total",
        "Transmit calls that failed or timed out"
    );
    describe_counter!("meshrelay_acks_total", "Chunk acks by terminal state");
    describe_counter!(
        "meshrelay_late_acks_total",
        "Confirmations for chunks that had already expired"
    );
    describe_counter!("meshrelay_outcomes_total", "Relay outcomes by kind");
    describe_counter!(
        "meshrelay_offline_enqueued_total",
        "Relays moved to the offline queue"
    );
    describe_counter!(
        "meshrelay_offline_resubmitted_total",
        "Offline relays handed back to the dispatcher"
    );
    describe_counter!(
        "meshrelay_offline_dropped_total",
        "Offline relays dropped, by reason"
    );

    describe_gauge!("meshrelay_offline_depth", "Relays held in the offline queue");
    describe_gauge!("meshrelay_in_flight", "Relays currently owned by a worker");

    describe_histogram!(
        "meshrelay_relay_duration_seconds",
        "Time from pickup to outcome for one relay"
    );
}

// ============== Dispatch ==============

/// Record a submission result (`ACCEPTED` or a rejection code)
pub fn record_submission(code: &'static str) {
    counter!("meshrelay_submissions_total", "result" => code).increment(1);
}

pub fn record_chunk_sent(bytes: usize) {
    counter!("meshrelay_chunks_sent_total").increment(1);
    counter!("meshrelay_bytes_sent_total").increment(bytes as u64);
}

pub fn record_transmit_failure() {
    counter!("meshrelay_transmit_failures_total").increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!("meshrelay_in_flight").set(count as f64);
}

// ============== Acks ==============

pub fn record_ack_resolved(state: AckState) {
    counter!("meshrelay_acks_total", "state" => state.to_string()).increment(1);
}

pub fn record_late_ack() {
    counter!("meshrelay_late_acks_total").increment(1);
}

pub fn record_outcome(outcome: RelayOutcome, from_queue: bool) {
    let origin = if from_queue { "retry" } else { "fresh" };
    counter!("meshrelay_outcomes_total", "outcome" => outcome.as_str(), "origin" => origin)
        .increment(1);
}

// ============== Offline queue ==============

pub fn record_offline_enqueued() {
    counter!("meshrelay_offline_enqueued_total").increment(1);
}

pub fn record_offline_resubmitted(count: usize) {
    counter!("meshrelay_offline_resubmitted_total").increment(count as u64);
}

pub fn record_offline_dropped(reason: DropReason) {
    counter!("meshrelay_offline_dropped_total", "reason" => reason.as_str()).increment(1);
}

pub fn set_offline_depth(depth: usize) {
    gauge!("meshrelay_offline_depth").set(depth as f64);
}

/// Times one relay from worker pickup to outcome
pub struct RelayTimer {
    start_time: Instant,
}

impl RelayTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Stop timing and record the duration
    pub fn stop(self) -> Duration {
        let elapsed = self.start_time.elapsed();
        histogram!("meshrelay_relay_duration_seconds").record(elapsed.as_secs_f64());
        elapsed
    }
}
