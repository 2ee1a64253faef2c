use crate::clock::{to_chrono, SharedClock};
use crate::config::OfflineConfig;
use crate::directory::NodeId;
use crate::dispatch::{RelayJob, RelayRequest, RequestId};
use crate::metrics::recorder;
use crate::offline::error::{OfflineError, OfflineResult};
use crate::offline::types::{
    DropReason, DroppedRelay, EnqueueReceipt, OfflineStats, QueuedRelay, RedeliveryReport,
};
use crate::privacy::PrivacyRegistry;
use crate::store::{persist_with_backoff, write_backoff, RelayStore};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type Slot = Arc<Mutex<VecDeque<QueuedRelay>>>;

/// Per-recipient retry queue.
///
/// Each recipient's entries sit behind their own async mutex, held across the
/// matching store write, so memory and disk change together or not at all.
/// A slow write for one recipient never holds up another.
pub struct OfflineQueue {
    store: RelayStore,
    privacy: Arc<PrivacyRegistry>,
    clock: SharedClock,
    capacity: usize,
    max_attempts: u32,
    hold_time: Duration,
    slots: DashMap<NodeId, Slot>,
    depth: AtomicUsize,
    counters: parking_lot::Mutex<OfflineStats>,
}

impl OfflineQueue {
    /// Load persisted entries, discarding the ones that can no longer be
    /// delivered
    pub async fn load(
        store: RelayStore,
        privacy: Arc<PrivacyRegistry>,
        clock: SharedClock,
        config: &OfflineConfig,
    ) -> OfflineResult<Self> {
        let now = clock.now();
        let capacity = config.per_recipient_capacity.max(1);

        let mut entries: HashMap<NodeId, VecDeque<QueuedRelay>> = HashMap::new();
        let mut discarded = Vec::new();

        for entry in store.load_queue().await? {
            if entry.is_expired(now)
                || entry.attempts_remaining == 0
                || privacy.is_opted_out(&entry.recipient_id)
            {
                discarded.push(entry.request_id());
                continue;
            }
            entries.entry(entry.recipient_id).or_default().push_back(entry);
        }

        for queue in entries.values_mut() {
            queue.make_contiguous().sort_by_key(|e| e.enqueued_at);
            while queue.len() > capacity {
                if let Some(oldest) = queue.pop_front() {
                    discarded.push(oldest.request_id());
                }
            }
        }

        if !discarded.is_empty() {
            store.delete_queued(&discarded).await?;
        }

        let queued: usize = entries.values().map(VecDeque::len).sum();
        tracing::info!(
            queued,
            recipients = entries.len(),
            discarded = discarded.len(),
            "offline queue loaded"
        );
        recorder::set_offline_depth(queued);

        let slots = entries
            .into_iter()
            .map(|(recipient_id, queue)| (recipient_id, Arc::new(Mutex::new(queue))))
            .collect();

        Ok(Self {
            store,
            privacy,
            clock,
            capacity,
            max_attempts: config.max_attempts.max(1),
            hold_time: to_chrono(config.hold_time()),
            slots,
            depth: AtomicUsize::new(queued),
            counters: parking_lot::Mutex::new(OfflineStats::default()),
        })
    }

    fn slot(&self, recipient_id: NodeId) -> Slot {
        self.slots.entry(recipient_id).or_default().value().clone()
    }

    fn existing_slot(&self, recipient_id: &NodeId) -> Option<Slot> {
        self.slots.get(recipient_id).map(|slot| slot.value().clone())
    }

    fn all_slots(&self) -> Vec<(NodeId, Slot)> {
        self.slots
            .iter()
            .map(|slot| (*slot.key(), slot.value().clone()))
            .collect()
    }

    /// Record a change in one recipient's queue length
    fn resize(&self, before: usize, after: usize) {
        if after >= before {
            self.depth.fetch_add(after - before, Ordering::SeqCst);
        } else {
            self.depth.fetch_sub(before - after, Ordering::SeqCst);
        }
        recorder::set_offline_depth(self.depth.load(Ordering::SeqCst));
    }

    /// Hold a relay that was not confirmed. Evicts the recipient's oldest
    /// entry when full.
    pub async fn enqueue(
        &self,
        recipient_id: NodeId,
        request: RelayRequest,
    ) -> OfflineResult<EnqueueReceipt> {
        let slot = self.slot(recipient_id);
        let mut queue = slot.lock().await;

        if self.privacy.is_opted_out(&recipient_id) {
            return Err(OfflineError::RecipientOptedOut(recipient_id));
        }

        let entry = QueuedRelay::new(
            recipient_id,
            request,
            self.clock.now(),
            self.hold_time,
            self.max_attempts,
        );
        let request_id = entry.request_id();
        let receipt = self.insert_locked(&mut queue, entry).await?;

        self.counters.lock().total_enqueued += 1;
        recorder::record_offline_enqueued();
        tracing::info!(
            request_id = %request_id,
            recipient = %recipient_id,
            depth = receipt.depth,
            evicted = receipt.evicted.is_some(),
            "relay queued for offline delivery"
        );

        Ok(receipt)
    }

    /// Put back an entry whose retry went unconfirmed. It keeps its original
    /// timestamps, so it is not necessarily the newest.
    pub async fn requeue(&self, entry: QueuedRelay) -> OfflineResult<EnqueueReceipt> {
        let slot = self.slot(entry.recipient_id);
        let mut queue = slot.lock().await;

        if self.privacy.is_opted_out(&entry.recipient_id) {
            let recipient_id = entry.recipient_id;
            self.delete_rows(&[entry.request_id()]).await?;
            self.note_dropped(&entry, DropReason::OptedOut);
            return Err(OfflineError::RecipientOptedOut(recipient_id));
        }

        let request_id = entry.request_id();
        let attempts = entry.attempts_remaining;
        let receipt = self.insert_locked(&mut queue, entry).await?;

        tracing::info!(
            request_id = %request_id,
            attempts_remaining = attempts,
            depth = receipt.depth,
            "relay returned to offline queue"
        );
        Ok(receipt)
    }

    async fn insert_locked(
        &self,
        queue: &mut VecDeque<QueuedRelay>,
        entry: QueuedRelay,
    ) -> OfflineResult<EnqueueReceipt> {
        let request_id = entry.request_id();

        let mut next = queue.clone();
        next.retain(|e| e.request_id() != request_id);
        let position = next.partition_point(|e| e.enqueued_at <= entry.enqueued_at);
        next.insert(position, entry.clone());

        let mut evicted = Vec::new();
        while next.len() > self.capacity {
            if let Some(oldest) = next.pop_front() {
                evicted.push(oldest);
            }
        }
        let evicted_ids: Vec<RequestId> = evicted.iter().map(QueuedRelay::request_id).collect();

        if evicted_ids.contains(&request_id) {
            // Older than everything already held for a full recipient
            let store = &self.store;
            persist_with_backoff("delete_queued", write_backoff(), || {
                store.delete_queued(&evicted_ids)
            })
            .await?;
        } else {
            let store = &self.store;
            let entry = &entry;
            persist_with_backoff("put_queued", write_backoff(), || {
                store.put_queued(entry, &evicted_ids)
            })
            .await?;
        }

        for dropped in &evicted {
            self.note_dropped(dropped, DropReason::Evicted);
        }

        let before = queue.len();
        *queue = next;
        self.resize(before, queue.len());

        Ok(EnqueueReceipt {
            evicted: evicted.into_iter().next(),
            depth: queue.len(),
        })
    }

    /// Hand every entry held for `recipient_id` back to the dispatcher.
    ///
    /// Each resubmission reserves an intake slot first; once the intake is
    /// full the remaining entries stay queued untouched. Resubmitted entries
    /// keep their row, with one attempt spent, until the retry finishes.
    pub async fn redeliver(
        &self,
        recipient_id: NodeId,
        intake: &mpsc::Sender<RelayJob>,
    ) -> OfflineResult<RedeliveryReport> {
        let mut report = RedeliveryReport::default();
        let Some(slot) = self.existing_slot(&recipient_id) else {
            return Ok(report);
        };
        let mut queue = slot.lock().await;
        if queue.is_empty() {
            return Ok(report);
        }

        let now = self.clock.now();
        let opted_out = self.privacy.is_opted_out(&recipient_id);
        let before = queue.len();

        let mut live = VecDeque::with_capacity(queue.len());
        for entry in queue.iter().cloned() {
            let reason = if opted_out {
                Some(DropReason::OptedOut)
            } else if entry.is_expired(now) {
                Some(DropReason::Expired)
            } else if entry.attempts_remaining == 0 {
                Some(DropReason::AttemptsExhausted)
            } else {
                None
            };
            match reason {
                Some(reason) => report.dropped.push(DroppedRelay { entry, reason }),
                None => live.push_back(entry),
            }
        }

        if !report.dropped.is_empty() {
            let ids: Vec<RequestId> = report.dropped.iter().map(|d| d.entry.request_id()).collect();
            self.delete_rows(&ids).await?;
            for dropped in &report.dropped {
                self.note_dropped(&dropped.entry, dropped.reason);
            }
        }

        while let Some(entry) = live.pop_front() {
            let permit = match intake.try_reserve() {
                Ok(permit) => permit,
                Err(_) => {
                    live.push_front(entry);
                    break;
                }
            };

            let request_id = entry.request_id();
            let spent = entry.attempts_remaining.saturating_sub(1);
            let store = &self.store;
            let persisted = persist_with_backoff("set_attempts", write_backoff(), || {
                store.set_attempts(request_id, spent)
            })
            .await;

            if let Err(e) = persisted {
                tracing::error!(request_id = %request_id, error = %e, "could not record retry attempt");
                live.push_front(entry);
                break;
            }

            tracing::debug!(
                request_id = %request_id,
                recipient = %recipient_id,
                attempts_remaining = spent,
                "resubmitting queued relay"
            );
            permit.send(entry.into_retry_job());
            report.resubmitted.push(request_id);
        }

        report.deferred = live.len();
        *queue = live;
        self.resize(before, queue.len());

        if !report.resubmitted.is_empty() {
            self.counters.lock().total_resubmitted += report.resubmitted.len() as u64;
            recorder::record_offline_resubmitted(report.resubmitted.len());
        }

        if report.deferred > 0 {
            tracing::warn!(
                recipient = %recipient_id,
                deferred = report.deferred,
                "intake full, queued relays deferred"
            );
        }

        Ok(report)
    }

    /// A retried relay was delivered; forget its row
    pub async fn complete_retry(&self, request_id: RequestId) -> OfflineResult<()> {
        self.delete_rows(&[request_id]).await
    }

    /// Give up on a retried relay for good
    pub async fn discard(&self, entry: QueuedRelay, reason: DropReason) -> OfflineResult<DroppedRelay> {
        let slot = self.slot(entry.recipient_id);
        let _queue = slot.lock().await;
        self.delete_rows(&[entry.request_id()]).await?;
        self.note_dropped(&entry, reason);
        Ok(DroppedRelay { entry, reason })
    }

    /// Drop every entry whose hold time has passed
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> OfflineResult<Vec<DroppedRelay>> {
        let mut dropped = Vec::new();

        for (_, slot) in self.all_slots() {
            let mut queue = slot.lock().await;

            let expired: Vec<RequestId> = queue
                .iter()
                .filter(|e| e.is_expired(now))
                .map(QueuedRelay::request_id)
                .collect();
            if expired.is_empty() {
                continue;
            }
            self.delete_rows(&expired).await?;

            let before = queue.len();
            let (gone, kept): (VecDeque<_>, VecDeque<_>) =
                queue.drain(..).partition(|e| e.is_expired(now));
            *queue = kept;
            self.resize(before, queue.len());

            for entry in gone {
                self.note_dropped(&entry, DropReason::Expired);
                dropped.push(DroppedRelay {
                    entry,
                    reason: DropReason::Expired,
                });
            }
        }

        if !dropped.is_empty() {
            tracing::info!(expired = dropped.len(), "offline expiry sweep");
        }
        Ok(dropped)
    }

    /// Silently drop everything held for a recipient who opted out
    pub async fn forget_recipient(&self, recipient_id: NodeId) -> OfflineResult<Vec<DroppedRelay>> {
        let Some(slot) = self.existing_slot(&recipient_id) else {
            return Ok(Vec::new());
        };
        let mut queue = slot.lock().await;

        let ids: Vec<RequestId> = queue.iter().map(QueuedRelay::request_id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.delete_rows(&ids).await?;

        let before = queue.len();
        let dropped: Vec<DroppedRelay> = queue
            .drain(..)
            .map(|entry| DroppedRelay {
                entry,
                reason: DropReason::OptedOut,
            })
            .collect();
        self.resize(before, 0);

        for d in &dropped {
            self.note_dropped(&d.entry, d.reason);
        }

        Ok(dropped)
    }

    /// Entries held for a recipient, oldest first
    pub async fn pending_for(&self, recipient_id: &NodeId) -> Vec<QueuedRelay> {
        match self.existing_slot(recipient_id) {
            Some(slot) => slot.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Recipients with at least one entry held
    pub async fn recipients(&self) -> Vec<NodeId> {
        let mut recipients = Vec::new();
        for (recipient_id, slot) in self.all_slots() {
            if !slot.lock().await.is_empty() {
                recipients.push(recipient_id);
            }
        }
        recipients.sort();
        recipients
    }

    pub async fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> OfflineStats {
        let recipients = self.recipients().await.len();
        let mut stats = self.counters.lock().clone();
        stats.queued = self.depth.load(Ordering::SeqCst);
        stats.recipients = recipients;
        stats
    }

    async fn delete_rows(&self, ids: &[RequestId]) -> OfflineResult<()> {
        let store = &self.store;
        persist_with_backoff("delete_queued", write_backoff(), || store.delete_queued(ids)).await?;
        Ok(())
    }

    fn note_dropped(&self, entry: &QueuedRelay, reason: DropReason) {
        {
            let mut counters = self.counters.lock();
            match reason {
                DropReason::Expired => counters.total_expired += 1,
                DropReason::AttemptsExhausted => counters.total_exhausted += 1,
                DropReason::OptedOut => counters.total_opted_out += 1,
                DropReason::Evicted => counters.total_evicted += 1,
            }
        }
        recorder::record_offline_dropped(reason);
        tracing::info!(
            request_id = %entry.request_id(),
            recipient = %entry.recipient_id,
            %reason,
            "queued relay dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::dispatch::JobOrigin;

    struct Fixture {
        store: RelayStore,
        privacy: Arc<PrivacyRegistry>,
        clock: ManualClock,
        queue: OfflineQueue,
    }

    async fn fixture() -> Fixture {
        let store = RelayStore::new_in_memory().await.unwrap();
        let clock = ManualClock::default();
        let shared: SharedClock = Arc::new(clock.clone());
        let privacy = Arc::new(PrivacyRegistry::load(store.clone(), shared.clone()).await.unwrap());
        let queue = OfflineQueue::load(
            store.clone(),
            privacy.clone(),
            shared,
            &OfflineConfig::default(),
        )
        .await
        .unwrap();
        Fixture {
            store,
            privacy,
            clock,
            queue,
        }
    }

    fn request(text: &str, at: DateTime<Utc>) -> RelayRequest {
        RelayRequest::new("!00000001", "snmo", text, at)
    }

    #[tokio::test]
    async fn test_enqueue_persists() {
        let f = fixture().await;
        let receipt = f
            .queue
            .enqueue(NodeId(0x10), request("hi", f.clock.now()))
            .await
            .unwrap();

        assert_eq!(receipt.depth, 1);
        assert!(receipt.evicted.is_none());
        assert_eq!(f.store.count_queued().await.unwrap(), 1);

        let pending = f.queue.pending_for(&NodeId(0x10)).await;
        assert_eq!(pending[0].attempts_remaining, 3);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let f = fixture().await;
        let mut first = None;
        for i in 0..11 {
            f.clock.advance(Duration::seconds(1));
            let req = request(&format!("msg {i}"), f.clock.now());
            if i == 0 {
                first = Some(req.request_id);
            }
            let receipt = f.queue.enqueue(NodeId(0x10), req).await.unwrap();
            if i == 10 {
                assert_eq!(receipt.evicted.map(|e| e.request_id()), first);
            }
        }

        let pending = f.queue.pending_for(&NodeId(0x10)).await;
        assert_eq!(pending.len(), 10);
        assert_eq!(pending[0].request.payload_text, "msg 1");
        assert_eq!(f.store.count_queued().await.unwrap(), 10);
        assert_eq!(f.queue.stats().await.total_evicted, 1);
    }

    #[tokio::test]
    async fn test_opted_out_recipient_refused() {
        let f = fixture().await;
        f.privacy.set_opt_out(NodeId(0x10), true).await.unwrap();

        let result = f.queue.enqueue(NodeId(0x10), request("hi", f.clock.now())).await;
        assert!(matches!(result, Err(OfflineError::RecipientOptedOut(_))));
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_redeliver_spends_one_attempt() {
        let f = fixture().await;
        f.queue.enqueue(NodeId(0x10), request("hi", f.clock.now())).await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);

        let report = f.queue.redeliver(NodeId(0x10), &tx).await.unwrap();
        assert_eq!(report.resubmitted.len(), 1);
        assert_eq!(report.deferred, 0);

        let job = rx.recv().await.unwrap();
        let JobOrigin::Retry(ticket) = job.origin else {
            panic!("expected a retry job");
        };
        assert_eq!(ticket.attempts_remaining, 2);

        // Out of memory, but the row stays until the retry finishes
        assert!(f.queue.is_empty().await);
        assert_eq!(
            f.store.queued_attempts(report.resubmitted[0]).await.unwrap(),
            Some(2)
        );

        f.queue.complete_retry(report.resubmitted[0]).await.unwrap();
        assert_eq!(f.store.count_queued().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_redeliver_defers_when_intake_full() {
        let f = fixture().await;
        for i in 0..3 {
            f.clock.advance(Duration::seconds(1));
            f.queue
                .enqueue(NodeId(0x10), request(&format!("m{i}"), f.clock.now()))
                .await
                .unwrap();
        }
        let (tx, _rx) = mpsc::channel(1);

        let report = f.queue.redeliver(NodeId(0x10), &tx).await.unwrap();
        assert_eq!(report.resubmitted.len(), 1);
        assert_eq!(report.deferred, 2);

        let pending = f.queue.pending_for(&NodeId(0x10)).await;
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|e| e.attempts_remaining == 3));
    }

    #[tokio::test]
    async fn test_redeliver_drops_expired() {
        let f = fixture().await;
        f.queue.enqueue(NodeId(0x10), request("stale", f.clock.now())).await.unwrap();
        f.clock.advance(Duration::hours(25));
        let (tx, _rx) = mpsc::channel(4);

        let report = f.queue.redeliver(NodeId(0x10), &tx).await.unwrap();
        assert!(report.resubmitted.is_empty());
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].reason, DropReason::Expired);
        assert_eq!(f.store.count_queued().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_requeue_keeps_original_position() {
        let f = fixture().await;
        let start = f.clock.now();
        f.queue.enqueue(NodeId(0x10), request("old", start)).await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        f.queue.redeliver(NodeId(0x10), &tx).await.unwrap();
        let job = rx.recv().await.unwrap();

        f.clock.advance(Duration::minutes(5));
        f.queue.enqueue(NodeId(0x10), request("new", f.clock.now())).await.unwrap();

        let JobOrigin::Retry(ticket) = job.origin else {
            panic!("expected a retry job");
        };
        let back = QueuedRelay::from_ticket(job.recipient, job.request, ticket);
        f.queue.requeue(back).await.unwrap();

        let pending = f.queue.pending_for(&NodeId(0x10)).await;
        assert_eq!(pending[0].request.payload_text, "old");
        assert_eq!(pending[0].attempts_remaining, 2);
        assert_eq!(pending[0].enqueued_at, start);
        assert_eq!(pending[1].request.payload_text, "new");
    }

    #[tokio::test]
    async fn test_expire_sweep() {
        let f = fixture().await;
        f.queue.enqueue(NodeId(0x10), request("a", f.clock.now())).await.unwrap();
        f.clock.advance(Duration::hours(23));
        f.queue.enqueue(NodeId(0x20), request("b", f.clock.now())).await.unwrap();

        f.clock.advance(Duration::hours(1));
        let dropped = f.queue.expire_sweep(f.clock.now()).await.unwrap();

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].entry.recipient_id, NodeId(0x10));
        assert_eq!(f.queue.recipients().await, vec![NodeId(0x20)]);
        assert_eq!(f.store.count_queued().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forget_recipient() {
        let f = fixture().await;
        f.queue.enqueue(NodeId(0x10), request("a", f.clock.now())).await.unwrap();
        f.queue.enqueue(NodeId(0x10), request("b", f.clock.now())).await.unwrap();

        let dropped = f.queue.forget_recipient(NodeId(0x10)).await.unwrap();
        assert_eq!(dropped.len(), 2);
        assert!(dropped.iter().all(|d| d.reason == DropReason::OptedOut));
        assert_eq!(f.store.count_queued().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recipients_do_not_wait_on_each_other() {
        let f = fixture().await;
        f.queue.enqueue(NodeId(0x10), request("a", f.clock.now())).await.unwrap();

        // Another task is mid-write for 0x10
        let slot = f.queue.slot(NodeId(0x10));
        let held = slot.lock().await;

        let other = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            f.queue.enqueue(NodeId(0x20), request("b", f.clock.now())),
        )
        .await;
        assert!(other.is_ok(), "enqueue for 0x20 waited on 0x10");

        let same = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            f.queue.enqueue(NodeId(0x10), request("c", f.clock.now())),
        )
        .await;
        assert!(same.is_err());

        drop(held);
        assert_eq!(f.queue.len().await, 2);
        assert_eq!(f.queue.recipients().await, vec![NodeId(0x10), NodeId(0x20)]);
    }

    #[tokio::test]
    async fn test_depth_tracks_every_change() {
        let f = fixture().await;
        for i in 0..3 {
            f.queue
                .enqueue(NodeId(0x10), request(&format!("m{i}"), f.clock.now()))
                .await
                .unwrap();
        }
        f.queue.enqueue(NodeId(0x20), request("x", f.clock.now())).await.unwrap();
        assert_eq!(f.queue.len().await, 4);

        let (tx, _rx) = mpsc::channel(2);
        f.queue.redeliver(NodeId(0x10), &tx).await.unwrap();
        assert_eq!(f.queue.len().await, 2);

        f.queue.forget_recipient(NodeId(0x20)).await.unwrap();
        let stats = f.queue.stats().await;
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.recipients, 1);
    }

    #[tokio::test]
    async fn test_load_discards_dead_rows() {
        let f = fixture().await;
        let now = f.clock.now();

        let live = QueuedRelay::new(NodeId(0x10), request("live", now), now, Duration::hours(24), 2);
        let stale = QueuedRelay::new(
            NodeId(0x10),
            request("stale", now),
            now - Duration::hours(30),
            Duration::hours(24),
            3,
        );
        let spent = QueuedRelay::new(NodeId(0x20), request("spent", now), now, Duration::hours(24), 0);
        for entry in [&live, &stale, &spent] {
            f.store.put_queued(entry, &[]).await.unwrap();
        }

        let reloaded = OfflineQueue::load(
            f.store.clone(),
            f.privacy.clone(),
            Arc::new(f.clock.clone()),
            &OfflineConfig::default(),
        )
        .await
        .unwrap();

        let pending = reloaded.pending_for(&NodeId(0x10)).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request.payload_text, "live");
        assert_eq!(pending[0].attempts_remaining, 2);
        assert_eq!(f.store.count_queued().await.unwrap(), 1);
    }
}
