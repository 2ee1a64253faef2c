use chrono::Duration as ChronoDuration;
use meshrelay::store::RelayStore;
use meshrelay::{
    Clock, DeliveryNotice, LinkBehaviour, ManualClock, NodeId, NodeInfo, NodeTable, NoticeStatus,
    RelayConfig, RelayCore, RelayOutcome, RelayRequest, SimulatedRadio, SubmitRejection,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

const SENDER: NodeId = NodeId(0x0000_0001);
/// Active, confirms everything
const SNMO: NodeId = NodeId(0xa1b2_c3d4);
/// Active, never confirms
const RIDG: NodeId = NodeId(0x0bad_cafe);
/// Known but not heard for two hours, never confirms
const CAMP: NodeId = NodeId(0x00c0_ffee);

const TWO_CHUNK_MESSAGE: &str =
    "The ridge trail is washed out past the second bridge, take the valley road.";

struct Mesh {
    core: RelayCore,
    notices: mpsc::UnboundedReceiver<DeliveryNotice>,
    radio: Arc<SimulatedRadio>,
    table: Arc<NodeTable>,
    clock: ManualClock,
}

fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.dispatch.ack_tick_ms = 10;
    config.dispatch.chunk_interval_ms = 0;
    config.dispatch.transmit_timeout_ms = 500;
    config.dispatch.frame_payload = false;
    config.chunking.max_chunk_bytes = 40;
    config.directory.refresh_secs = 3600;
    config.offline.expiry_sweep_secs = 3600;
    config
}

fn seed(table: &NodeTable, radio: &SimulatedRadio, clock: &ManualClock) {
    let now = clock.now();
    table.upsert(NodeInfo::new(SENDER, "Base").heard_at(now));
    table.upsert(NodeInfo::new(SNMO, "SnMo").heard_at(now));
    table.upsert(NodeInfo::new(RIDG, "Ridg").heard_at(now));
    table.upsert(NodeInfo::new(CAMP, "Camp").heard_at(now - ChronoDuration::hours(2)));

    radio.set_link(SNMO, LinkBehaviour::confirm());
    radio.set_link(RIDG, LinkBehaviour::Silent);
    radio.set_link(CAMP, LinkBehaviour::Silent);
}

async fn mesh_with(config: RelayConfig) -> Mesh {
    let clock = ManualClock::default();
    let table = Arc::new(NodeTable::new());
    let (radio, acks) = SimulatedRadio::new();
    seed(&table, &radio, &clock);

    let store = RelayStore::new_in_memory().await.unwrap();
    let (core, notices) = RelayCore::start_with_store(
        config,
        store,
        table.clone(),
        radio.clone(),
        acks,
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();

    Mesh {
        core,
        notices,
        radio,
        table,
        clock,
    }
}

async fn mesh() -> Mesh {
    mesh_with(test_config()).await
}

/// Wait for a notice without moving the clock
async fn next_notice(mesh: &mut Mesh) -> DeliveryNotice {
    timeout(Duration::from_secs(5), mesh.notices.recv())
        .await
        .expect("timed out waiting for a delivery notice")
        .expect("notice channel closed")
}

/// Push the clock past the ack timeout whenever chunks are waiting, until a
/// notice arrives. Nothing is expired before `min_transmissions` packets have
/// gone out.
async fn expire_until_notice(mesh: &mut Mesh, min_transmissions: usize) -> DeliveryNotice {
    for _ in 0..500 {
        if let Ok(Some(notice)) = timeout(Duration::from_millis(20), mesh.notices.recv()).await {
            return notice;
        }
        if mesh.radio.transmission_count() >= min_transmissions
            && mesh.core.stats().await.acks.awaiting > 0
        {
            mesh.clock.advance(ChronoDuration::seconds(21));
        }
    }
    panic!("no delivery notice");
}

/// Make a node heard again and rebuild the directory so its backlog is
/// re-delivered
async fn hear(mesh: &Mesh, node_id: NodeId) -> Vec<NodeId> {
    mesh.table.mark_heard(node_id, mesh.clock.now());
    mesh.core.refresh_directory_now().await
}

/// Queued relays dropped for good, whatever the reason
async fn dropped_total(mesh: &Mesh) -> u64 {
    let offline = mesh.core.stats().await.offline;
    offline.total_expired + offline.total_exhausted + offline.total_opted_out
}

/// Drive a resubmitted relay to its end, moving the clock by `step` whenever
/// chunks are waiting. Returns the attempts left if the entry came back to
/// the queue, `None` if it was dropped.
async fn settle_retry(mesh: &Mesh, node_id: NodeId, step: ChronoDuration) -> Option<u32> {
    let dropped_before = dropped_total(mesh).await;
    for _ in 0..500 {
        if let Some(entry) = mesh.core.offline_pending(&node_id).await.first() {
            return Some(entry.attempts_remaining);
        }
        if dropped_total(mesh).await > dropped_before {
            return None;
        }
        if mesh.core.stats().await.acks.awaiting > 0 {
            mesh.clock.advance(step);
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("retry to {node_id} never settled");
}

#[tokio::test]
async fn test_two_chunk_relay_confirmed() {
    let mut mesh = mesh().await;

    let accepted = mesh
        .core
        .submit_relay(SENDER.to_string(), "snmo", TWO_CHUNK_MESSAGE)
        .unwrap();
    assert_eq!(accepted.recipient, SNMO);

    let notice = next_notice(&mut mesh).await;
    assert_eq!(notice.request_id, accepted.request_id);
    assert_eq!(notice.sender_id, SENDER.to_string());
    assert_eq!(notice.status, NoticeStatus::Confirmed);
    assert_eq!(notice.outcome, Some(RelayOutcome::AllConfirmed));
    assert_eq!(notice.total_chunks, 2);
    assert_eq!(notice.confirmed_chunks, vec![0, 1]);
    assert_eq!(notice.text, "✅ ACK by SnMo");

    // One packet and one confirmation per chunk, in order
    let sent = mesh.radio.transmissions_to(&SNMO);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|t| t.want_ack));
    let rejoined: String = sent.iter().map(|t| t.text()).collect();
    assert_eq!(rejoined, TWO_CHUNK_MESSAGE);

    let stats = mesh.core.stats().await;
    assert_eq!(stats.acks.registered, 2);
    assert_eq!(stats.acks.confirmed, 2);
    assert_eq!(stats.dispatch.delivered, 1);
    assert!(mesh.core.offline_pending(&SNMO).await.is_empty());

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_silent_recipient_is_queued() {
    let mut mesh = mesh().await;

    let accepted = mesh
        .core
        .submit_relay(SENDER.to_string(), "Ridg", "water cache is empty")
        .unwrap();

    let notice = expire_until_notice(&mut mesh, 1).await;
    assert_eq!(notice.status, NoticeStatus::Queued);
    assert_eq!(notice.outcome, Some(RelayOutcome::NoneConfirmed));
    assert!(notice.text.starts_with("❌ No ACK from Ridg"));
    assert!(notice.text.contains("Message: \"water cache is empty\""));
    assert!(notice.text.contains("📬 Queued for delivery when Ridg is heard again."));

    let pending = mesh.core.offline_pending(&RIDG).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id(), accepted.request_id);
    assert_eq!(pending[0].attempts_remaining, 3);
    assert_eq!(mesh.core.store().count_queued().await.unwrap(), 1);

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_partial_ack_names_missing_parts() {
    let mut mesh = mesh().await;
    mesh.radio.set_link(RIDG, LinkBehaviour::ConfirmFirst(1));

    mesh.core
        .submit_relay(SENDER.to_string(), "ridg", TWO_CHUNK_MESSAGE)
        .unwrap();

    let notice = expire_until_notice(&mut mesh, 2).await;
    assert_eq!(notice.outcome, Some(RelayOutcome::Partial));
    assert_eq!(notice.confirmed_chunks, vec![0]);
    assert!(notice
        .text
        .starts_with("⚠️ Partial ACK from Ridg: parts 1 of 2 confirmed, parts 2 missing"));

    // The whole request is held, not just the missing part
    let pending = mesh.core.offline_pending(&RIDG).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request.payload_text, TWO_CHUNK_MESSAGE);

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_unknown_target_rejected() {
    let mesh = mesh().await;

    let result = mesh.core.submit_relay(SENDER.to_string(), "nobody", "hello?");
    assert_eq!(
        result,
        Err(SubmitRejection::UnknownTarget("nobody".to_string()))
    );

    let empty = mesh.core.submit_relay(SENDER.to_string(), "snmo", "   ");
    assert_eq!(empty, Err(SubmitRejection::EmptyPayload));

    sleep(Duration::from_millis(50)).await;
    assert_eq!(mesh.radio.transmission_count(), 0);
    assert_eq!(mesh.core.stats().await.dispatch.rejected, 2);

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_literal_node_id_target() {
    let mut mesh = mesh().await;

    let accepted = mesh
        .core
        .submit_relay(SENDER.to_string(), "!a1b2c3d4", "by id")
        .unwrap();
    assert_eq!(accepted.recipient, SNMO);
    assert_eq!(next_notice(&mut mesh).await.status, NoticeStatus::Confirmed);

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_opted_out_recipient_never_transmitted() {
    let mut mesh = mesh().await;

    mesh.core
        .submit_relay(SENDER.to_string(), "ridg", "first")
        .unwrap();
    expire_until_notice(&mut mesh, 1).await;
    assert_eq!(mesh.core.offline_pending(&RIDG).await.len(), 1);
    let sent_before = mesh.radio.transmission_count();

    mesh.core.opt_out(RIDG).await.unwrap();
    assert!(mesh.core.is_opted_out(&RIDG));
    assert!(mesh.core.offline_pending(&RIDG).await.is_empty());
    assert_eq!(mesh.core.store().count_queued().await.unwrap(), 0);

    let result = mesh.core.submit_relay(SENDER.to_string(), "ridg", "second");
    assert_eq!(result, Err(SubmitRejection::RecipientOptedOut(RIDG)));

    // Hearing the node again must not resurrect anything
    hear(&mesh, RIDG).await;
    mesh.core.observe_node_heard(RIDG).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(mesh.radio.transmission_count(), sent_before);
    assert!(mesh.notices.try_recv().is_err());

    mesh.core.opt_in(RIDG).await.unwrap();
    assert!(mesh
        .core
        .submit_relay(SENDER.to_string(), "ridg", "third")
        .is_ok());

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_failed_retry_spends_an_attempt() {
    let mut mesh = mesh().await;

    let accepted = mesh
        .core
        .submit_relay(SENDER.to_string(), "camp", "are you back?")
        .unwrap();
    let notice = expire_until_notice(&mut mesh, 1).await;
    assert_eq!(notice.status, NoticeStatus::Queued);

    let revived = hear(&mesh, CAMP).await;
    assert_eq!(revived, vec![CAMP]);

    // The retry goes unconfirmed and the entry comes back with one attempt spent
    let mut attempts = None;
    for _ in 0..500 {
        let pending = mesh.core.offline_pending(&CAMP).await;
        if let Some(entry) = pending.first() {
            attempts = Some(entry.attempts_remaining);
            break;
        }
        if mesh.core.stats().await.acks.awaiting > 0 {
            mesh.clock.advance(ChronoDuration::seconds(21));
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(attempts, Some(2));
    assert_eq!(
        mesh.core
            .store()
            .queued_attempts(accepted.request_id)
            .await
            .unwrap(),
        Some(2)
    );
    assert_eq!(mesh.radio.transmissions_to(&CAMP).len(), 2);

    // Unconfirmed retries stay quiet towards the sender
    assert!(mesh.notices.try_recv().is_err());

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_successful_retry_sends_followup_notice() {
    let mut mesh = mesh().await;

    let accepted = mesh
        .core
        .submit_relay(SENDER.to_string(), "camp", "are you back?")
        .unwrap();
    expire_until_notice(&mut mesh, 1).await;

    mesh.radio.set_link(CAMP, LinkBehaviour::confirm());
    hear(&mesh, CAMP).await;

    let notice = next_notice(&mut mesh).await;
    assert_eq!(notice.request_id, accepted.request_id);
    assert_eq!(notice.status, NoticeStatus::Confirmed);
    assert!(notice.from_queue);
    assert_eq!(notice.text, "✅ ACK by Camp (delivered from offline queue)");

    sleep(Duration::from_millis(50)).await;
    assert!(mesh.core.offline_pending(&CAMP).await.is_empty());
    assert_eq!(mesh.core.store().count_queued().await.unwrap(), 0);

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_entry_removed_after_every_retry_fails() {
    let mut mesh = mesh().await;

    let accepted = mesh
        .core
        .submit_relay(SENDER.to_string(), "camp", "are you back?")
        .unwrap();
    assert_eq!(expire_until_notice(&mut mesh, 1).await.status, NoticeStatus::Queued);

    let mut attempts = Vec::new();
    for _ in 0..3 {
        let report = mesh.core.observe_node_heard(CAMP).await;
        assert_eq!(report.resubmitted, vec![accepted.request_id]);
        attempts.push(settle_retry(&mesh, CAMP, ChronoDuration::seconds(21)).await);
    }
    assert_eq!(attempts, vec![Some(2), Some(1), None]);

    assert!(mesh.core.offline_pending(&CAMP).await.is_empty());
    assert_eq!(
        mesh.core
            .store()
            .queued_attempts(accepted.request_id)
            .await
            .unwrap(),
        None
    );
    // The first send plus three retries
    assert_eq!(mesh.radio.transmissions_to(&CAMP).len(), 4);
    assert_eq!(mesh.core.stats().await.offline.total_exhausted, 1);

    // Drop notices are off by default
    sleep(Duration::from_millis(50)).await;
    assert!(mesh.notices.try_recv().is_err());
    assert!(mesh.core.observe_node_heard(CAMP).await.resubmitted.is_empty());

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_retry_past_hold_time_is_dropped_with_notice() {
    let mut config = test_config();
    config.offline.hold_time_secs = 60;
    config.offline.notify_on_drop = true;
    let mut mesh = mesh_with(config).await;

    let accepted = mesh
        .core
        .submit_relay(SENDER.to_string(), "camp", "meet at the trailhead")
        .unwrap();
    assert_eq!(expire_until_notice(&mut mesh, 1).await.status, NoticeStatus::Queued);

    let report = mesh.core.observe_node_heard(CAMP).await;
    assert_eq!(report.resubmitted, vec![accepted.request_id]);

    // The retry is still waiting on its ack when the hold time runs out
    let attempts = settle_retry(&mesh, CAMP, ChronoDuration::minutes(2)).await;
    assert_eq!(attempts, None);

    let notice = next_notice(&mut mesh).await;
    assert_eq!(notice.request_id, accepted.request_id);
    assert_eq!(notice.status, NoticeStatus::Dropped);
    assert!(notice.from_queue);
    assert_eq!(
        notice.text,
        "🗑️ Gave up relaying to Camp (held too long)\n\nMessage: \"meet at the trailhead\""
    );

    let stats = mesh.core.stats().await;
    assert_eq!(stats.offline.total_expired, 1);
    assert_eq!(stats.offline.total_exhausted, 0);
    assert_eq!(mesh.core.store().count_queued().await.unwrap(), 0);

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_opt_out_during_retry_drops_silently() {
    let mut config = test_config();
    config.offline.notify_on_drop = true;
    let mut mesh = mesh_with(config).await;

    mesh.core
        .submit_relay(SENDER.to_string(), "camp", "are you back?")
        .unwrap();
    assert_eq!(expire_until_notice(&mut mesh, 1).await.status, NoticeStatus::Queued);

    assert_eq!(mesh.core.observe_node_heard(CAMP).await.resubmitted.len(), 1);
    for _ in 0..100 {
        if mesh.core.stats().await.acks.awaiting > 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(mesh.radio.transmissions_to(&CAMP).len(), 2);

    // The entry is out with a worker, so only its row is left to clean up
    mesh.core.opt_out(CAMP).await.unwrap();
    assert_eq!(mesh.core.store().count_queued().await.unwrap(), 1);

    let attempts = settle_retry(&mesh, CAMP, ChronoDuration::seconds(21)).await;
    assert_eq!(attempts, None);

    let stats = mesh.core.stats().await;
    assert_eq!(stats.offline.total_opted_out, 1);
    assert_eq!(stats.offline.total_exhausted, 0);
    assert_eq!(mesh.core.store().count_queued().await.unwrap(), 0);
    assert!(mesh.core.offline_pending(&CAMP).await.is_empty());

    // Opted-out drops never produce a notice
    sleep(Duration::from_millis(50)).await;
    assert!(mesh.notices.try_recv().is_err());

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_same_request_submitted_twice_relays_once() {
    let mut mesh = mesh().await;
    let request = RelayRequest::new(
        SENDER.to_string(),
        "ridg",
        "water cache is empty",
        mesh.clock.now(),
    );

    assert!(mesh.core.submit(request.clone()).is_ok());
    assert_eq!(
        mesh.core.submit(request.clone()),
        Err(SubmitRejection::DuplicateRequest(request.request_id))
    );

    let notice = expire_until_notice(&mut mesh, 1).await;
    assert_eq!(notice.request_id, request.request_id);
    assert_eq!(notice.status, NoticeStatus::Queued);

    sleep(Duration::from_millis(50)).await;
    assert!(mesh.notices.try_recv().is_err());
    assert_eq!(mesh.radio.transmissions_to(&RIDG).len(), 1);
    assert_eq!(mesh.core.offline_pending(&RIDG).await.len(), 1);

    let stats = mesh.core.stats().await;
    assert_eq!(stats.dispatch.accepted, 1);
    assert_eq!(stats.dispatch.rejected, 1);

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_intake_full_rejects_without_waiting() {
    let mut config = test_config();
    config.dispatch.workers = 1;
    config.dispatch.intake_capacity = 1;
    config.dispatch.transmit_timeout_ms = 0;
    let mesh = mesh_with(config).await;
    mesh.radio.set_link(RIDG, LinkBehaviour::Stall);

    mesh.core
        .submit_relay(SENDER.to_string(), "ridg", "one")
        .unwrap();
    for _ in 0..100 {
        if mesh.core.stats().await.dispatch.in_flight == 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    mesh.core
        .submit_relay(SENDER.to_string(), "ridg", "two")
        .unwrap();
    let third = mesh.core.submit_relay(SENDER.to_string(), "ridg", "three");
    assert_eq!(third, Err(SubmitRejection::QueueFull));
    assert_eq!(mesh.core.stats().await.intake_depth, 1);

    // Shutdown abandons the stalled relay instead of hanging on it
    timeout(Duration::from_secs(5), mesh.core.shutdown())
        .await
        .expect("shutdown hung on a stalled transmit");
}

#[tokio::test]
async fn test_concurrent_relays_each_get_a_notice() {
    let mut mesh = mesh().await;

    let mut expected = Vec::new();
    for i in 0..6 {
        let accepted = mesh
            .core
            .submit_relay(SENDER.to_string(), "snmo", format!("status {i}"))
            .unwrap();
        expected.push(accepted.request_id);
    }

    let mut seen = Vec::new();
    for _ in 0..expected.len() {
        let notice = next_notice(&mut mesh).await;
        assert_eq!(notice.status, NoticeStatus::Confirmed);
        seen.push(notice.request_id);
    }
    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
    assert_eq!(mesh.radio.transmissions_to(&SNMO).len(), 6);

    mesh.core.shutdown().await;
}

#[tokio::test]
async fn test_queue_and_privacy_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.storage.database_url = format!("sqlite://{}", temp_dir.path().join("relay.db").display());

    let clock = ManualClock::default();
    let table = Arc::new(NodeTable::new());
    let (radio, acks) = SimulatedRadio::new();
    seed(&table, &radio, &clock);

    let (core, mut notices) = RelayCore::start(
        config.clone(),
        table.clone(),
        radio.clone(),
        acks,
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();

    let accepted = core
        .submit_relay(SENDER.to_string(), "camp", "hold this for me")
        .unwrap();
    let notice = loop {
        if let Ok(Some(notice)) = timeout(Duration::from_millis(20), notices.recv()).await {
            break notice;
        }
        if core.stats().await.acks.awaiting > 0 {
            clock.advance(ChronoDuration::seconds(21));
        }
    };
    assert_eq!(notice.status, NoticeStatus::Queued);
    core.opt_out(RIDG).await.unwrap();
    core.shutdown().await;
    println!("✓ First run queued {} and opted out {}", accepted.request_id, RIDG);

    let (radio, acks) = SimulatedRadio::new();
    let (core, _notices) = RelayCore::start(
        config,
        table.clone(),
        radio.clone(),
        acks,
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();

    let pending = core.offline_pending(&CAMP).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id(), accepted.request_id);
    assert_eq!(pending[0].request.payload_text, "hold this for me");
    assert_eq!(pending[0].attempts_remaining, 3);
    assert!(core.is_opted_out(&RIDG));
    assert_eq!(radio.transmission_count(), 0);

    core.shutdown().await;
}

#[tokio::test]
async fn test_expired_entries_dropped_on_restart() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.storage.database_url = format!("sqlite://{}", temp_dir.path().join("relay.db").display());

    let clock = ManualClock::default();
    let table = Arc::new(NodeTable::new());
    let (radio, acks) = SimulatedRadio::new();
    seed(&table, &radio, &clock);

    let (core, mut notices) = RelayCore::start(
        config.clone(),
        table.clone(),
        radio,
        acks,
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();

    core.submit_relay(SENDER.to_string(), "camp", "stale soon")
        .unwrap();
    loop {
        if let Ok(Some(_)) = timeout(Duration::from_millis(20), notices.recv()).await {
            break;
        }
        if core.stats().await.acks.awaiting > 0 {
            clock.advance(ChronoDuration::seconds(21));
        }
    }
    core.shutdown().await;

    clock.advance(ChronoDuration::hours(25));

    let (radio, acks) = SimulatedRadio::new();
    let (core, _notices) =
        RelayCore::start(config, table, radio, acks, Arc::new(clock.clone()))
            .await
            .unwrap();
    assert!(core.offline_pending(&CAMP).await.is_empty());
    assert_eq!(core.store().count_queued().await.unwrap(), 0);

    core.shutdown().await;
}
