//! Engine-level integration tests against the in-memory backend.
//!
//! These cover the consistency guarantees the engine must uphold:
//! idempotent cycles, last-writer-wins determinism, single-flight
//! coalescing, self-echo suppression, first-upload bootstrap, and the
//! failure transitions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as Delta, Utc};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use taskmatrix::config::SyncConfig;
use taskmatrix::document::{Payload, Task};
use taskmatrix::error::SyncError;
use taskmatrix::remote::memory::MemoryRemote;
use taskmatrix::remote::{OwnerId, RemoteStore, WorkspaceId};
use taskmatrix::store::LocalStore;
use taskmatrix::sync::state::SyncPhase;
use taskmatrix::sync::SyncEngine;

struct Harness {
    engine: Arc<SyncEngine>,
    remote: Arc<MemoryRemote>,
    store: Arc<LocalStore>,
    owner: OwnerId,
    workspace: WorkspaceId,
}

fn test_config() -> SyncConfig {
    SyncConfig {
        remote_url: Some("memory://".to_string()),
        auto_sync: false,
        remote_timeout: Duration::from_secs(2),
        ..SyncConfig::default()
    }
}

/// Spin up a signed-in, connected engine over an in-memory backend
async fn connected() -> Harness {
    let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
    let remote = Arc::new(MemoryRemote::new());
    let session = remote.sign_in("alice@example.com").await;

    let remote_dyn: Arc<dyn RemoteStore> = remote.clone();
    let engine = SyncEngine::new(test_config(), Arc::clone(&store), Some(remote_dyn));
    engine.start().await.unwrap();
    assert_eq!(engine.status().await.phase, SyncPhase::Idle);

    let workspace = remote
        .resolve_or_create_workspace(session.owner_id)
        .await
        .unwrap();

    Harness {
        engine,
        remote,
        store,
        owner: session.owner_id,
        workspace,
    }
}

fn payload_with_tasks(count: usize) -> Payload {
    let mut payload = Payload::default();
    let tasks = (0..count)
        .map(|i| Task::new(format!("task-{}", i)))
        .collect();
    payload.tasks.insert("proj:US".to_string(), tasks);
    payload
}

fn task_count(payload: &Payload) -> usize {
    payload.tasks.values().map(|v| v.len()).sum()
}

#[tokio::test]
async fn no_record_bootstrap_creates_revision_one() {
    let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
    store
        .save(&taskmatrix::Document {
            payload: payload_with_tasks(2),
            ..Default::default()
        })
        .await
        .unwrap();

    let remote = Arc::new(MemoryRemote::new());
    let session = remote.sign_in("bob@example.com").await;

    let remote_dyn: Arc<dyn RemoteStore> = remote.clone();
    let engine = SyncEngine::new(test_config(), store, Some(remote_dyn));
    engine.start().await.unwrap();

    let workspace = remote
        .resolve_or_create_workspace(session.owner_id)
        .await
        .unwrap();
    let record = remote.record(workspace, session.owner_id).await.unwrap();
    assert_eq!(record.stored_revision, 1);
    assert_eq!(task_count(&record.payload), 2);
}

#[tokio::test]
async fn second_cycle_is_equal_and_performs_no_io() {
    let h = connected().await;

    let uploads_before = h.remote.upsert_calls();
    let local_before = h.store.load().await;

    h.engine.trigger_sync().await.unwrap();

    assert_eq!(h.remote.upsert_calls(), uploads_before);
    let local_after = h.store.load().await;
    assert_eq!(local_after, local_before);
    assert_eq!(h.engine.status().await.phase, SyncPhase::Idle);
}

#[tokio::test]
async fn remote_newer_wins_and_no_upload_occurs() {
    let h = connected().await;

    let t: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();

    // Remote has 5 tasks at T+1s, written by a peer device
    let peer = Uuid::new_v4();
    h.remote
        .write_record_as(
            h.workspace,
            h.owner,
            peer,
            payload_with_tasks(5),
            t + Delta::seconds(1),
        )
        .await;

    // Local has 3 tasks at T
    h.store
        .save(&taskmatrix::Document {
            payload: payload_with_tasks(3),
            ..Default::default()
        })
        .await
        .unwrap();
    h.store.align_saved_at(t).await.unwrap();

    let uploads_before = h.remote.upsert_calls();
    h.engine.trigger_sync().await.unwrap();

    let local = h.store.load().await;
    assert_eq!(task_count(&local.payload), 5);
    assert_eq!(local.last_saved_at, t + Delta::seconds(1));
    assert_eq!(h.remote.upsert_calls(), uploads_before);
}

#[tokio::test]
async fn local_newer_wins_and_is_uploaded() {
    let h = connected().await;

    let t: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();

    h.remote
        .write_record_as(h.workspace, h.owner, h.owner, payload_with_tasks(1), t)
        .await;
    let revision_before = h
        .remote
        .record(h.workspace, h.owner)
        .await
        .unwrap()
        .stored_revision;

    h.store
        .save(&taskmatrix::Document {
            payload: payload_with_tasks(4),
            ..Default::default()
        })
        .await
        .unwrap();
    h.store.align_saved_at(t + Delta::seconds(1)).await.unwrap();

    h.engine.trigger_sync().await.unwrap();

    let record = h.remote.record(h.workspace, h.owner).await.unwrap();
    assert_eq!(task_count(&record.payload), 4);
    assert_eq!(record.stored_revision, revision_before + 1);

    // Local timestamp is aligned to the server's, so the next cycle is a no-op
    let local = h.store.load().await;
    assert_eq!(local.last_saved_at, record.updated_at);
}

#[tokio::test]
async fn equal_timestamps_touch_neither_side() {
    let h = connected().await;

    let t: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
    h.remote
        .write_record_as(h.workspace, h.owner, h.owner, payload_with_tasks(2), t)
        .await;
    h.store
        .save(&taskmatrix::Document {
            payload: payload_with_tasks(3),
            ..Default::default()
        })
        .await
        .unwrap();
    h.store.align_saved_at(t).await.unwrap();

    let uploads_before = h.remote.upsert_calls();
    h.engine.trigger_sync().await.unwrap();

    // Both sides keep their payloads
    let local = h.store.load().await;
    assert_eq!(task_count(&local.payload), 3);
    let record = h.remote.record(h.workspace, h.owner).await.unwrap();
    assert_eq!(task_count(&record.payload), 2);
    assert_eq!(h.remote.upsert_calls(), uploads_before);
}

#[tokio::test]
async fn upload_only_cycle_never_downloads() {
    use taskmatrix::sync::CycleMode;

    let h = connected().await;

    // Remote is strictly newer, but an upload-only cycle must not pull it
    let t: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
    h.remote
        .write_record_as(
            h.workspace,
            h.owner,
            h.owner,
            payload_with_tasks(6),
            t + Delta::seconds(10),
        )
        .await;
    h.store
        .save(&taskmatrix::Document {
            payload: payload_with_tasks(1),
            ..Default::default()
        })
        .await
        .unwrap();
    h.store.align_saved_at(t).await.unwrap();

    h.engine.trigger(CycleMode::UploadOnly).await.unwrap();

    let local = h.store.load().await;
    assert_eq!(task_count(&local.payload), 1);
    let record = h.remote.record(h.workspace, h.owner).await.unwrap();
    assert_eq!(task_count(&record.payload), 6);
}

#[tokio::test]
async fn concurrent_triggers_run_exactly_one_cycle() {
    let h = connected().await;

    h.remote.set_latency(Duration::from_millis(100)).await;
    let fetches_before = h.remote.fetch_calls();

    let e = &h.engine;
    let (r1, r2, r3, r4, r5) = tokio::join!(
        e.trigger_sync(),
        e.trigger_sync(),
        e.trigger_sync(),
        e.trigger_sync(),
        e.trigger_sync(),
    );
    for result in [r1, r2, r3, r4, r5] {
        result.unwrap();
    }

    assert_eq!(h.remote.fetch_calls(), fetches_before + 1);
    assert_eq!(h.engine.status().await.phase, SyncPhase::Idle);
}

#[tokio::test]
async fn self_echo_notifications_never_trigger_a_download() {
    let h = connected().await;

    let fetches_before = h.remote.fetch_calls();
    let local_before = h.store.load().await;

    // A write whose notification carries this session's own identity
    h.remote
        .write_record_as(
            h.workspace,
            h.owner,
            h.owner,
            payload_with_tasks(9),
            Utc::now() + Delta::seconds(30),
        )
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.remote.fetch_calls(), fetches_before);
    assert_eq!(h.store.load().await, local_before);
    assert_eq!(h.engine.status().await.phase, SyncPhase::Idle);
}

#[tokio::test]
async fn peer_push_runs_a_receiving_download() {
    let h = connected().await;

    let phases = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&phases);
    let _sub = h.engine.add_listener(Box::new(move |status| {
        seen.lock().unwrap().push(status.phase);
    }));

    let peer = Uuid::new_v4();
    h.remote
        .write_record_as(
            h.workspace,
            h.owner,
            peer,
            payload_with_tasks(7),
            Utc::now() + Delta::seconds(30),
        )
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let local = h.store.load().await;
    assert_eq!(task_count(&local.payload), 7);

    let phases = phases.lock().unwrap().clone();
    assert_eq!(phases, vec![SyncPhase::Receiving, SyncPhase::Idle]);
}

#[tokio::test]
async fn malformed_remote_record_is_skipped_without_overwriting_local() {
    let h = connected().await;

    let local_before = h.store.load().await;
    h.remote.set_malformed(true);

    h.engine.trigger_sync().await.unwrap();

    assert_eq!(h.store.load().await, local_before);
    assert_eq!(h.engine.status().await.phase, SyncPhase::Idle);
}

#[tokio::test]
async fn outage_transitions_to_error_and_recovers_on_next_trigger() {
    let h = connected().await;

    h.remote.set_offline(true);
    let result = h.engine.trigger_sync().await;
    assert!(matches!(result, Err(SyncError::RemoteUnavailable { .. })));

    let status = h.engine.status().await;
    assert_eq!(status.phase, SyncPhase::Error);
    assert!(status.error.is_some());

    h.remote.set_offline(false);
    h.engine.trigger_sync().await.unwrap();

    let status = h.engine.status().await;
    assert_eq!(status.phase, SyncPhase::Idle);
    assert!(status.error.is_none());
    assert!(status.last_sync.is_some());
}

#[tokio::test]
async fn slow_remote_operations_time_out_as_unavailable() {
    let h = connected().await;

    h.remote.set_latency(Duration::from_secs(5)).await;
    let config_timeout = Duration::from_secs(2);
    let started = std::time::Instant::now();

    let result = h.engine.trigger_sync().await;
    assert!(matches!(result, Err(SyncError::RemoteUnavailable { .. })));
    assert!(started.elapsed() < config_timeout + Duration::from_secs(1));
    assert_eq!(h.engine.status().await.phase, SyncPhase::Error);
}

#[tokio::test]
async fn network_loss_and_recovery_round_trip() {
    let h = connected().await;

    h.engine.network_lost().await;
    assert_eq!(h.engine.status().await.phase, SyncPhase::Offline);

    // Triggers are silent no-ops while offline
    let fetches_before = h.remote.fetch_calls();
    h.engine.trigger_sync().await.unwrap();
    assert_eq!(h.remote.fetch_calls(), fetches_before);

    h.engine.network_online().await;
    assert_eq!(h.engine.status().await.phase, SyncPhase::Idle);
}

#[tokio::test]
async fn network_loss_during_cycle_stays_offline_and_reconnects() {
    let h = connected().await;

    // A slow cycle is in flight when the network drops
    h.remote.set_latency(Duration::from_millis(300)).await;
    let engine = Arc::clone(&h.engine);
    let cycle = tokio::spawn(async move { engine.trigger_sync().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.engine.network_lost().await;

    // The in-flight cycle's terminal transition must not clobber Offline
    cycle.await.unwrap().unwrap();
    assert_eq!(h.engine.status().await.phase, SyncPhase::Offline);

    h.remote.set_latency(Duration::ZERO).await;
    h.engine.network_online().await;
    assert_eq!(h.engine.status().await.phase, SyncPhase::Idle);

    h.engine.trigger_sync().await.unwrap();
    assert_eq!(h.engine.status().await.phase, SyncPhase::Idle);
}

#[tokio::test]
async fn connect_publishes_syncing_then_idle() {
    let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
    let remote = Arc::new(MemoryRemote::new());
    remote.sign_in("carol@example.com").await;

    let remote_dyn: Arc<dyn RemoteStore> = remote;
    let engine = SyncEngine::new(test_config(), store, Some(remote_dyn));

    let phases = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&phases);
    let _sub = engine.add_listener(Box::new(move |status| {
        seen.lock().unwrap().push(status.phase);
    }));

    engine.connect().await.unwrap();

    let phases = phases.lock().unwrap().clone();
    assert_eq!(phases, vec![SyncPhase::Syncing, SyncPhase::Idle]);
}
