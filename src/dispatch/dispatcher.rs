use crate::ack::AckTracker;
use crate::chunk::MessageChunker;
use crate::clock::SharedClock;
use crate::config::RelayConfig;
use crate::directory::{NodeId, ShortnameDirectory};
use crate::dispatch::error::{DispatchError, DispatchResult};
use crate::dispatch::types::{
    Accepted, DeliveryNotice, DispatchStats, RelayJob, RelayRequest, RequestId, SubmitRejection,
    SubmitResult,
};
use crate::dispatch::worker::RelayWorker;
use crate::metrics::recorder;
use crate::offline::OfflineQueue;
use crate::privacy::PrivacyRegistry;
use crate::transport::{AirtimePacer, RadioTransport};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// A relay currently owned by a worker
#[derive(Debug, Clone, Copy)]
pub struct InFlightRelay {
    pub recipient: NodeId,
    pub from_queue: bool,
    pub started: Instant,
}

/// Collaborators the dispatcher drives
pub struct DispatcherParts {
    pub directory: Arc<ShortnameDirectory>,
    pub privacy: Arc<PrivacyRegistry>,
    pub offline: Arc<OfflineQueue>,
    pub tracker: Arc<AckTracker>,
    pub radio: Arc<dyn RadioTransport>,
    pub clock: SharedClock,
    pub notices: mpsc::UnboundedSender<DeliveryNotice>,
}

/// State shared by the dispatcher front end and its workers
pub(crate) struct DispatchContext {
    pub directory: Arc<ShortnameDirectory>,
    pub privacy: Arc<PrivacyRegistry>,
    pub offline: Arc<OfflineQueue>,
    pub tracker: Arc<AckTracker>,
    pub radio: Arc<dyn RadioTransport>,
    pub clock: SharedClock,
    pub notices: mpsc::UnboundedSender<DeliveryNotice>,
    pub chunker: MessageChunker,
    pub pacer: AirtimePacer,
    pub transmit_timeout: Duration,
    pub ack_backstop: Duration,
    pub frame_payload: bool,
    pub notify_on_drop: bool,
    pub in_flight: DashMap<RequestId, InFlightRelay>,
    /// Fresh requests accepted and not yet settled by a worker
    pub claimed: DashSet<RequestId>,
    pub stats: Mutex<DispatchStats>,
}

impl DispatchContext {
    pub fn notify(&self, notice: DeliveryNotice) {
        if self.notices.send(notice).is_err() {
            tracing::debug!("notice receiver dropped");
        }
    }

    /// Display name for a sender: shortname for mesh nodes we know, the raw
    /// handle otherwise
    pub fn sender_label(&self, sender_id: &str) -> String {
        match sender_id.parse::<NodeId>() {
            Ok(node_id) => self.directory.label_of(&node_id),
            Err(_) => sender_id.to_string(),
        }
    }
}

/// Bounded worker pool in front of the radio.
///
/// `submit` validates and enqueues without waiting; workers take jobs off the
/// shared intake, one message at a time each.
pub struct RelayDispatcher {
    ctx: Arc<DispatchContext>,
    workers: usize,
    intake: mpsc::Sender<RelayJob>,
    intake_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<RelayJob>>>,
}

impl RelayDispatcher {
    pub fn new(parts: DispatcherParts, config: &RelayConfig) -> DispatchResult<Self> {
        let dispatch = &config.dispatch;
        if dispatch.workers == 0 {
            return Err(DispatchError::InvalidConfig("workers must be > 0".into()));
        }
        if dispatch.intake_capacity == 0 {
            return Err(DispatchError::InvalidConfig(
                "intake_capacity must be > 0".into(),
            ));
        }

        let chunker = MessageChunker::new(config.chunking.max_chunk_bytes)?;
        let ack_backstop = dispatch.ack_timeout() + dispatch.ack_tick() * 2 + Duration::from_secs(1);

        let ctx = Arc::new(DispatchContext {
            directory: parts.directory,
            privacy: parts.privacy,
            offline: parts.offline,
            tracker: parts.tracker,
            radio: parts.radio,
            clock: parts.clock,
            notices: parts.notices,
            chunker,
            pacer: AirtimePacer::new(dispatch.chunk_interval()),
            transmit_timeout: dispatch.transmit_timeout(),
            ack_backstop,
            frame_payload: dispatch.frame_payload,
            notify_on_drop: config.offline.notify_on_drop,
            in_flight: DashMap::new(),
            claimed: DashSet::new(),
            stats: Mutex::new(DispatchStats::default()),
        });

        let (intake, intake_rx) = mpsc::channel(dispatch.intake_capacity);

        Ok(Self {
            ctx,
            workers: dispatch.workers,
            intake,
            intake_rx: Arc::new(tokio::sync::Mutex::new(intake_rx)),
        })
    }

    /// Start the worker pool. Workers stop on the shutdown signal.
    pub fn spawn_workers(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        tracing::info!(workers = self.workers, "starting relay workers");

        (0..self.workers)
            .map(|id| {
                let worker = RelayWorker::new(id, self.ctx.clone(), self.intake_rx.clone());
                tokio::spawn(worker.run(shutdown.subscribe()))
            })
            .collect()
    }

    /// Accept or reject a relay request. Never waits.
    pub fn submit(&self, request: RelayRequest) -> SubmitResult {
        let result = self.try_submit(request);

        match &result {
            Ok(accepted) => {
                self.ctx.stats.lock().accepted += 1;
                recorder::record_submission("ACCEPTED");
                tracing::info!(
                    request_id = %accepted.request_id,
                    recipient = %accepted.recipient,
                    "relay accepted"
                );
            }
            Err(rejection) => {
                self.ctx.stats.lock().rejected += 1;
                recorder::record_submission(rejection.code());
                tracing::info!(reason = rejection.code(), "relay rejected");
            }
        }

        result
    }

    fn try_submit(&self, request: RelayRequest) -> SubmitResult {
        if request.payload_text.trim().is_empty() {
            return Err(SubmitRejection::EmptyPayload);
        }

        let recipient = self
            .ctx
            .directory
            .resolve_target(&request.target)
            .map_err(|_| SubmitRejection::UnknownTarget(request.target.trim().to_string()))?;

        if self.ctx.privacy.is_opted_out(&recipient) {
            return Err(SubmitRejection::RecipientOptedOut(recipient));
        }

        let request_id = request.request_id;
        if self.ctx.in_flight.contains_key(&request_id) || !self.ctx.claimed.insert(request_id) {
            return Err(SubmitRejection::DuplicateRequest(request_id));
        }

        if self
            .intake
            .try_send(RelayJob::fresh(request, recipient))
            .is_err()
        {
            self.ctx.claimed.remove(&request_id);
            return Err(SubmitRejection::QueueFull);
        }

        Ok(Accepted {
            request_id,
            recipient,
        })
    }

    /// Sending side of the intake, for offline re-delivery
    pub fn intake(&self) -> &mpsc::Sender<RelayJob> {
        &self.intake
    }

    /// Jobs waiting for a worker
    pub fn intake_depth(&self) -> usize {
        self.intake.max_capacity() - self.intake.capacity()
    }

    pub fn in_flight(&self) -> Vec<(RequestId, InFlightRelay)> {
        self.ctx
            .in_flight
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    pub fn stats(&self) -> DispatchStats {
        let mut stats = self.ctx.stats.lock().clone();
        stats.in_flight = self.ctx.in_flight.len();
        stats
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }
}
