//! Relay worker: takes one job at a time off the shared intake, sends it
//! chunk by chunk, and settles the outcome.

use crate::ack::{AckState, AckSummary, RelayOutcome};
use crate::chunk::Chunk;
use crate::directory::NodeId;
use crate::dispatch::dispatcher::{DispatchContext, InFlightRelay};
use crate::dispatch::error::DispatchResult;
use crate::dispatch::notice;
use crate::dispatch::types::{JobOrigin, RelayJob, RelayRequest, RetryTicket};
use crate::metrics::{recorder, RelayTimer};
use crate::offline::{DropReason, OfflineError, QueuedRelay};
use crate::transport::{PacketId, TransportError};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};

pub(crate) struct RelayWorker {
    id: usize,
    ctx: Arc<DispatchContext>,
    intake: Arc<Mutex<mpsc::Receiver<RelayJob>>>,
}

impl RelayWorker {
    pub fn new(
        id: usize,
        ctx: Arc<DispatchContext>,
        intake: Arc<Mutex<mpsc::Receiver<RelayJob>>>,
    ) -> Self {
        Self { id, ctx, intake }
    }

    /// Work the intake until shutdown. A relay still in progress at shutdown
    /// is abandoned.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let intake = self.intake.clone();
            let job = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(worker = self.id, "relay worker shutting down");
                    return;
                }
                job = async move { intake.lock().await.recv().await } => job,
            };

            let Some(job) = job else {
                tracing::info!(worker = self.id, "intake closed, relay worker exiting");
                return;
            };

            let request_id = job.request.request_id;
            let fresh = !job.is_retry();
            tokio::select! {
                _ = shutdown.recv() => {
                    self.ctx.in_flight.remove(&request_id);
                    if fresh {
                        self.ctx.claimed.remove(&request_id);
                    }
                    tracing::warn!(worker = self.id, request_id = %request_id, "relay abandoned at shutdown");
                    return;
                }
                _ = self.process(job) => {}
            }
        }
    }

    async fn process(&self, job: RelayJob) {
        let request_id = job.request.request_id;
        let fresh = !job.is_retry();
        let timer = RelayTimer::start();

        self.ctx.in_flight.insert(
            request_id,
            InFlightRelay {
                recipient: job.recipient,
                from_queue: !fresh,
                started: Instant::now(),
            },
        );
        recorder::set_in_flight(self.ctx.in_flight.len());
        if !fresh {
            self.ctx.stats.lock().retries_accepted += 1;
        }

        if let Err(e) = self.relay(job).await {
            tracing::error!(worker = self.id, request_id = %request_id, error = %e, "could not settle relay");
        }

        self.ctx.in_flight.remove(&request_id);
        if fresh {
            self.ctx.claimed.remove(&request_id);
        }
        recorder::set_in_flight(self.ctx.in_flight.len());
        let elapsed = timer.stop();
        tracing::debug!(worker = self.id, request_id = %request_id, ?elapsed, "relay settled");
    }

    async fn relay(&self, job: RelayJob) -> DispatchResult<()> {
        let RelayJob {
            request,
            recipient,
            origin,
        } = job;
        let recipient_label = self.ctx.directory.label_of(&recipient);

        // A failed attempt still settles, as if nothing was confirmed
        let summary = match self.deliver(&request, recipient, &origin).await {
            Ok(summary) => summary,
            Err(e) => {
                let dropped = self.ctx.tracker.discard(request.request_id);
                tracing::error!(
                    worker = self.id,
                    request_id = %request.request_id,
                    error = %e,
                    acks_dropped = dropped,
                    "relay attempt failed"
                );
                None
            }
        };

        match summary {
            Some(summary) if summary.outcome == RelayOutcome::AllConfirmed => {
                self.settle_confirmed(request, recipient, recipient_label, origin, &summary)
                    .await
            }
            summary => {
                self.settle_unconfirmed(request, recipient, recipient_label, origin, summary.as_ref())
                    .await
            }
        }
    }

    /// Send every chunk and collect the acks. `None` when nothing was sent.
    async fn deliver(
        &self,
        request: &RelayRequest,
        recipient: NodeId,
        origin: &JobOrigin,
    ) -> DispatchResult<Option<AckSummary>> {
        if self.ctx.privacy.is_opted_out(&recipient) {
            tracing::info!(request_id = %request.request_id, recipient = %recipient, "recipient opted out before send");
            return Ok(None);
        }

        let payload = if self.ctx.frame_payload {
            notice::frame_relay_text(
                &self.ctx.sender_label(&request.sender_id),
                &request.payload_text,
            )
        } else {
            request.payload_text.clone()
        };
        let chunks = self.ctx.chunker.split(request.request_id, &payload)?;
        if chunks.is_empty() {
            return Ok(None);
        }

        // Chunks go out strictly in order; each one is settled before the next
        for chunk in &chunks {
            self.send_chunk(chunk, recipient).await?;
        }

        let summary = self.ctx.tracker.finalize(request.request_id)?;
        recorder::record_outcome(summary.outcome, matches!(origin, JobOrigin::Retry(_)));
        tracing::info!(
            request_id = %request.request_id,
            recipient = %recipient,
            outcome = summary.outcome.as_str(),
            confirmed = summary.confirmed.len(),
            total = summary.total_chunks,
            "relay outcome"
        );
        Ok(Some(summary))
    }

    async fn send_chunk(&self, chunk: &Chunk, recipient: NodeId) -> DispatchResult<()> {
        self.ctx.pacer.wait_for_slot().await;

        let packet_id = match self.transmit(chunk, recipient).await {
            Ok(packet_id) => {
                recorder::record_chunk_sent(chunk.len());
                tracing::debug!(
                    request_id = %chunk.request_id,
                    chunk = chunk.sequence_index + 1,
                    total = chunk.total_chunks,
                    packet = %packet_id,
                    "relay chunk sent"
                );
                Some(packet_id)
            }
            Err(e) => {
                recorder::record_transmit_failure();
                tracing::warn!(
                    request_id = %chunk.request_id,
                    chunk = chunk.sequence_index + 1,
                    total = chunk.total_chunks,
                    error = %e,
                    "relay chunk transmit failed"
                );
                None
            }
        };

        let waiter = self.ctx.tracker.register(
            chunk.request_id,
            chunk.sequence_index,
            chunk.total_chunks,
            recipient,
            packet_id,
        )?;
        let key = waiter.key();

        match tokio::time::timeout(self.ctx.ack_backstop, waiter.resolved()).await {
            Ok(state) => {
                tracing::debug!(request_id = %chunk.request_id, chunk = chunk.sequence_index + 1, %state, "chunk settled");
            }
            Err(_) => {
                // Ticker never got to it
                self.ctx.tracker.force_expire(key);
                tracing::warn!(request_id = %chunk.request_id, chunk = chunk.sequence_index + 1, state = %AckState::Expired, "ack backstop reached");
            }
        }

        Ok(())
    }

    async fn transmit(&self, chunk: &Chunk, recipient: NodeId) -> Result<PacketId, TransportError> {
        let send = self.ctx.radio.transmit(&recipient, chunk.bytes.clone(), true);
        if self.ctx.transmit_timeout.is_zero() {
            return send.await;
        }
        tokio::time::timeout(self.ctx.transmit_timeout, send)
            .await
            .map_err(|_| TransportError::Timeout(self.ctx.transmit_timeout))?
    }

    async fn settle_confirmed(
        &self,
        request: RelayRequest,
        recipient: NodeId,
        recipient_label: String,
        origin: JobOrigin,
        summary: &AckSummary,
    ) -> DispatchResult<()> {
        let from_queue = matches!(origin, JobOrigin::Retry(_));
        self.ctx.stats.lock().delivered += 1;

        if from_queue {
            if let Err(e) = self.ctx.offline.complete_retry(request.request_id).await {
                tracing::error!(request_id = %request.request_id, error = %e, "could not clear delivered retry");
            }
        }

        let acker_label = summary
            .acked_by
            .map(|node_id| self.ctx.directory.label_of(&node_id))
            .unwrap_or_else(|| recipient_label.clone());

        self.ctx.notify(notice::confirmed_notice(
            &request,
            recipient,
            recipient_label,
            summary,
            &acker_label,
            from_queue,
        ));
        Ok(())
    }

    async fn settle_unconfirmed(
        &self,
        request: RelayRequest,
        recipient: NodeId,
        recipient_label: String,
        origin: JobOrigin,
        summary: Option<&AckSummary>,
    ) -> DispatchResult<()> {
        {
            let mut stats = self.ctx.stats.lock();
            match summary.map(|s| s.outcome) {
                Some(RelayOutcome::Partial) => stats.partial += 1,
                _ => stats.undelivered += 1,
            }
        }

        match origin {
            JobOrigin::Fresh => {
                self.settle_fresh_failure(request, recipient, recipient_label, summary)
                    .await
            }
            JobOrigin::Retry(ticket) => {
                self.settle_retry_failure(request, recipient, recipient_label, ticket)
                    .await
            }
        }
    }

    async fn settle_fresh_failure(
        &self,
        request: RelayRequest,
        recipient: NodeId,
        recipient_label: String,
        summary: Option<&AckSummary>,
    ) -> DispatchResult<()> {
        let queued = if self.ctx.privacy.is_opted_out(&recipient) {
            None
        } else {
            match self.ctx.offline.enqueue(recipient, request.clone()).await {
                Ok(receipt) => Some(receipt),
                Err(OfflineError::RecipientOptedOut(_)) => None,
                Err(e) => {
                    tracing::error!(request_id = %request.request_id, error = %e, "could not queue relay");
                    None
                }
            }
        };

        if queued.is_some() {
            self.ctx.stats.lock().queued += 1;
        }

        self.ctx.notify(notice::unconfirmed_notice(
            &request,
            recipient,
            recipient_label.clone(),
            summary,
            queued.is_some(),
        ));

        if let Some(evicted) = queued.and_then(|receipt| receipt.evicted) {
            self.notify_dropped(&evicted, recipient_label, DropReason::Evicted);
        }
        Ok(())
    }

    async fn settle_retry_failure(
        &self,
        request: RelayRequest,
        recipient: NodeId,
        recipient_label: String,
        ticket: RetryTicket,
    ) -> DispatchResult<()> {
        let entry = QueuedRelay::from_ticket(recipient, request, ticket);
        let now = self.ctx.clock.now();

        let reason = if self.ctx.privacy.is_opted_out(&recipient) {
            Some(DropReason::OptedOut)
        } else if entry.attempts_remaining == 0 {
            Some(DropReason::AttemptsExhausted)
        } else if entry.is_expired(now) {
            Some(DropReason::Expired)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                let dropped = self.ctx.offline.discard(entry, reason).await?;
                if reason != DropReason::OptedOut {
                    self.notify_dropped(&dropped.entry, recipient_label, reason);
                }
            }
            None => match self.ctx.offline.requeue(entry).await {
                Ok(receipt) => {
                    if let Some(evicted) = receipt.evicted {
                        self.notify_dropped(&evicted, recipient_label, DropReason::Evicted);
                    }
                }
                Err(OfflineError::RecipientOptedOut(_)) => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }

    fn notify_dropped(&self, entry: &QueuedRelay, recipient_label: String, reason: DropReason) {
        if self.ctx.notify_on_drop {
            self.ctx
                .notify(notice::dropped_notice(entry, recipient_label, reason));
        }
    }
}
