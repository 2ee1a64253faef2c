use crate::ack::{AckEvent, AckTracker};
use crate::clock::SharedClock;
use crate::config::RelayConfig;
use crate::coordinator::error::CoordinatorResult;
use crate::coordinator::types::CoreStats;
use crate::directory::{NodeId, NodeSource, ShortnameDirectory};
use crate::dispatch::notice;
use crate::dispatch::{
    DeliveryNotice, DispatcherParts, RelayDispatcher, RelayRequest, SubmitResult,
};
use crate::metrics::recorder;
use crate::offline::{DropReason, DroppedRelay, OfflineQueue, QueuedRelay, RedeliveryReport};
use crate::privacy::PrivacyRegistry;
use crate::store::RelayStore;
use crate::transport::RadioTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Everything the background tasks need
struct CoreInner {
    clock: SharedClock,
    source: Arc<dyn NodeSource>,
    directory: Arc<ShortnameDirectory>,
    privacy: Arc<PrivacyRegistry>,
    offline: Arc<OfflineQueue>,
    tracker: Arc<AckTracker>,
    dispatcher: RelayDispatcher,
    notices: mpsc::UnboundedSender<DeliveryNotice>,
    notify_on_drop: bool,
}

impl CoreInner {
    /// Rebuild the directory and re-deliver to every node that just became
    /// active
    async fn refresh_directory(&self) -> Vec<NodeId> {
        let newly_active = self
            .directory
            .rebuild(self.source.snapshot(), self.clock.now());

        for node_id in &newly_active {
            self.redeliver_to(*node_id).await;
        }
        newly_active
    }

    async fn redeliver_to(&self, node_id: NodeId) -> RedeliveryReport {
        match self.offline.redeliver(node_id, self.dispatcher.intake()).await {
            Ok(report) => {
                if !report.resubmitted.is_empty() || !report.dropped.is_empty() {
                    tracing::info!(
                        recipient = %node_id,
                        resubmitted = report.resubmitted.len(),
                        dropped = report.dropped.len(),
                        deferred = report.deferred,
                        "offline re-delivery"
                    );
                }
                self.announce_drops(&report.dropped);
                report
            }
            Err(e) => {
                tracing::error!(recipient = %node_id, error = %e, "offline re-delivery failed");
                RedeliveryReport::default()
            }
        }
    }

    fn announce_drops(&self, dropped: &[DroppedRelay]) {
        if !self.notify_on_drop {
            return;
        }
        for d in dropped.iter().filter(|d| d.reason != DropReason::OptedOut) {
            let label = self.directory.label_of(&d.entry.recipient_id);
            let _ = self
                .notices
                .send(notice::dropped_notice(&d.entry, label, d.reason));
        }
    }
}

/// The running relay subsystem.
///
/// Construct with [`RelayCore::start`]; delivery notices for senders arrive
/// on the returned receiver.
pub struct RelayCore {
    inner: Arc<CoreInner>,
    store: RelayStore,
    shutdown: broadcast::Sender<()>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl RelayCore {
    /// Open the configured database and start everything
    pub async fn start(
        config: RelayConfig,
        source: Arc<dyn NodeSource>,
        radio: Arc<dyn RadioTransport>,
        acks: mpsc::Receiver<AckEvent>,
        clock: SharedClock,
    ) -> CoordinatorResult<(Self, mpsc::UnboundedReceiver<DeliveryNotice>)> {
        config.validate()?;
        let store = RelayStore::connect(&config.storage.database_url).await?;
        Self::start_with_store(config, store, source, radio, acks, clock).await
    }

    /// Start on an already opened store
    pub async fn start_with_store(
        config: RelayConfig,
        store: RelayStore,
        source: Arc<dyn NodeSource>,
        radio: Arc<dyn RadioTransport>,
        acks: mpsc::Receiver<AckEvent>,
        clock: SharedClock,
    ) -> CoordinatorResult<(Self, mpsc::UnboundedReceiver<DeliveryNotice>)> {
        recorder::init_metrics();

        let privacy = Arc::new(PrivacyRegistry::load(store.clone(), clock.clone()).await?);
        let offline = Arc::new(
            OfflineQueue::load(store.clone(), privacy.clone(), clock.clone(), &config.offline)
                .await?,
        );
        let directory = Arc::new(ShortnameDirectory::new(config.directory.active_window()));
        let tracker = Arc::new(AckTracker::new(clock.clone(), config.dispatch.ack_timeout()));
        let (notices, notice_rx) = mpsc::unbounded_channel();

        let dispatcher = RelayDispatcher::new(
            DispatcherParts {
                directory: directory.clone(),
                privacy: privacy.clone(),
                offline: offline.clone(),
                tracker: tracker.clone(),
                radio,
                clock: clock.clone(),
                notices: notices.clone(),
            },
            &config,
        )?;

        let inner = Arc::new(CoreInner {
            clock,
            source,
            directory,
            privacy,
            offline,
            tracker,
            dispatcher,
            notices,
            notify_on_drop: config.offline.notify_on_drop,
        });

        let (shutdown, _) = broadcast::channel(4);
        let mut tasks = inner.dispatcher.spawn_workers(&shutdown);

        // Nodes already active at startup get their backlog straight away
        inner.refresh_directory().await;

        tasks.push(spawn_directory_refresh(
            inner.clone(),
            config.directory.refresh(),
            shutdown.subscribe(),
        ));
        tasks.push(spawn_ack_ticker(
            inner.clone(),
            config.dispatch.ack_tick(),
            shutdown.subscribe(),
        ));
        tasks.push(spawn_ack_pump(inner.clone(), acks, shutdown.subscribe()));
        tasks.push(spawn_expiry_sweep(
            inner.clone(),
            config.offline.expiry_sweep(),
            shutdown.subscribe(),
        ));

        tracing::info!(
            workers = inner.dispatcher.worker_count(),
            known_nodes = inner.directory.snapshot().len(),
            "relay core started"
        );

        Ok((
            Self {
                inner,
                store,
                shutdown,
                tasks: parking_lot::Mutex::new(tasks),
            },
            notice_rx,
        ))
    }

    /// Submit a relay on behalf of `sender_id`. Returns without waiting.
    pub fn submit_relay(
        &self,
        sender_id: impl Into<String>,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> SubmitResult {
        let request = RelayRequest::new(sender_id, target, text, self.inner.clock.now());
        self.inner.dispatcher.submit(request)
    }

    pub fn submit(&self, request: RelayRequest) -> SubmitResult {
        self.inner.dispatcher.submit(request)
    }

    /// Stop relaying to `node_id` and silently drop anything queued for it
    pub async fn opt_out(&self, node_id: NodeId) -> CoordinatorResult<()> {
        self.inner.privacy.set_opt_out(node_id, true).await?;
        let dropped = self.inner.offline.forget_recipient(node_id).await?;
        if !dropped.is_empty() {
            tracing::info!(node = %node_id, dropped = dropped.len(), "queued relays dropped on opt-out");
        }
        Ok(())
    }

    pub async fn opt_in(&self, node_id: NodeId) -> CoordinatorResult<()> {
        self.inner.privacy.set_opt_out(node_id, false).await?;
        Ok(())
    }

    pub fn is_opted_out(&self, node_id: &NodeId) -> bool {
        self.inner.privacy.is_opted_out(node_id)
    }

    /// Hook for transports that report traffic as it is heard
    pub async fn observe_node_heard(&self, node_id: NodeId) -> RedeliveryReport {
        self.inner.redeliver_to(node_id).await
    }

    /// Rebuild the directory now instead of waiting for the next refresh
    pub async fn refresh_directory_now(&self) -> Vec<NodeId> {
        self.inner.refresh_directory().await
    }

    pub fn resolve(&self, alias: &str) -> Option<NodeId> {
        self.inner.directory.resolve(alias)
    }

    pub fn directory(&self) -> &ShortnameDirectory {
        &self.inner.directory
    }

    pub async fn offline_pending(&self, node_id: &NodeId) -> Vec<QueuedRelay> {
        self.inner.offline.pending_for(node_id).await
    }

    pub async fn stats(&self) -> CoreStats {
        let snapshot = self.inner.directory.snapshot();
        CoreStats {
            dispatch: self.inner.dispatcher.stats(),
            acks: self.inner.tracker.stats(),
            offline: self.inner.offline.stats().await,
            intake_depth: self.inner.dispatcher.intake_depth(),
            known_nodes: snapshot.len(),
            active_nodes: snapshot.active_nodes().len(),
            opted_out: self.inner.privacy.opted_out_count(),
        }
    }

    pub fn store(&self) -> &RelayStore {
        &self.store
    }

    /// Stop background tasks and close the store. Relays in flight are
    /// abandoned; queued relays stay persisted.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        self.store.close().await;
        tracing::info!("relay core stopped");
    }
}

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn spawn_directory_refresh(
    inner: Arc<CoreInner>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        // The first tick fires immediately and startup already refreshed
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = interval.tick() => {
                    inner.refresh_directory().await;
                }
            }
        }
    })
}

fn spawn_ack_ticker(
    inner: Arc<CoreInner>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = interval.tick() => {
                    inner.tracker.expire_due(inner.clock.now());
                }
            }
        }
    })
}

fn spawn_ack_pump(
    inner: Arc<CoreInner>,
    mut acks: mpsc::Receiver<AckEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                event = acks.recv() => {
                    let Some(event) = event else {
                        tracing::info!("ack stream closed");
                        return;
                    };
                    inner.tracker.confirm(event.packet_id, event.from);
                }
            }
        }
    })
}

fn spawn_expiry_sweep(
    inner: Arc<CoreInner>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = interval.tick() => {
                    match inner.offline.expire_sweep(inner.clock.now()).await {
                        Ok(dropped) => inner.announce_drops(&dropped),
                        Err(e) => tracing::error!(error = %e, "offline expiry sweep failed"),
                    }
                }
            }
        }
    })
}
