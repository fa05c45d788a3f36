//! # Sync Engine
//!
//! Orchestrates synchronization cycles between the local store and the
//! remote store. Owns the state machine, applies the whole-document
//! last-writer-wins policy, coalesces triggers, and publishes status to
//! registered observers.
//!
//! ## State Machine
//!
//! - `Disabled` — no remote capability configured; permanent for the process
//! - `Offline` — remote configured, but no network or no session
//! - `Idle` — ready, not currently syncing
//! - `Syncing` — a cycle is in flight
//! - `Receiving` — a peer push arrived and a download is about to run
//! - `Error` — the last cycle failed; retained until the next success
//!
//! ## Single Flight
//!
//! At most one cycle runs at a time. Any trigger arriving while a cycle is
//! in flight is dropped, not queued: the in-flight cycle already reflects
//! the most recent local state at the moment it started.
//!
//! ## Triggers
//!
//! Startup, explicit connect, manual sync, the periodic timer, a regained
//! network, and peer push notifications all funnel into the same guarded
//! cycle path. Push notifications are pure triggers; the engine re-derives
//! everything from current timestamps and ignores its own echoes.
//!
//! ## Failure Semantics
//!
//! A failed cycle leaves both the local document and the remote record
//! untouched. The engine transitions to `Error` and is immediately eligible
//! for another trigger; transient failures are not retried internally.

pub mod debounce;
pub mod observer;
pub mod session;
pub mod state;

use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::document::{compare, SyncOutcome};
use crate::error::{Result, SyncError};
use crate::remote::{ChangeNotice, RemoteStore};
use crate::store::LocalStore;
use crate::sync::observer::{Disposer, ObserverRegistry, StatusListener};
use crate::sync::session::SyncSession;
use crate::sync::state::{SyncPhase, SyncStatus};

/// Direction of one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// Compare both sides and reconcile in whichever direction is stale
    Bidirectional,
    /// Only ever pull the remote payload down (peer push handling)
    DownloadOnly,
    /// Only ever push the local payload up
    UploadOnly,
}

impl CycleMode {
    fn uploads(self) -> bool {
        matches!(self, Self::Bidirectional | Self::UploadOnly)
    }

    fn downloads(self) -> bool {
        matches!(self, Self::Bidirectional | Self::DownloadOnly)
    }
}

/// The sync state machine. Constructed once and shared behind an [`Arc`].
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    session: RwLock<Option<SyncSession>>,
    status: RwLock<SyncStatus>,
    /// Single-flight guard over sync cycles
    busy: AtomicBool,
    observers: ObserverRegistry,
    periodic: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("remote_configured", &self.remote.is_some())
            .field("busy", &self.busy.load(Ordering::SeqCst))
            .finish()
    }
}

impl SyncEngine {
    /// Create an engine over a local store and an optional remote capability.
    ///
    /// With no remote the engine starts (and stays) `Disabled`; with a
    /// remote it starts `Offline` until [`SyncEngine::start`] or
    /// [`SyncEngine::connect`] establishes a session.
    pub fn new(
        config: SyncConfig,
        store: Arc<LocalStore>,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Arc<Self> {
        let initial_phase = if remote.is_some() {
            SyncPhase::Offline
        } else {
            SyncPhase::Disabled
        };
        Arc::new(Self {
            config,
            store,
            remote,
            session: RwLock::new(None),
            status: RwLock::new(SyncStatus {
                phase: initial_phase,
                last_sync: None,
                error: None,
            }),
            busy: AtomicBool::new(false),
            observers: ObserverRegistry::new(),
            periodic: StdMutex::new(None),
        })
    }

    /// Register a status listener; fires on every state transition
    pub fn add_listener(&self, listener: StatusListener) -> Disposer {
        self.observers.add_listener(listener)
    }

    /// Snapshot of the current status
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Local store backing this engine
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Startup trigger. With no remote this settles in `Disabled`; with a
    /// remote but no session (or an unreachable backend) it settles in
    /// `Offline`. An authenticated session runs the full connect sequence.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.remote.is_none() {
            tracing::info!("no remote backend configured; sync disabled");
            self.publish(SyncPhase::Disabled, None).await;
            return Ok(());
        }
        match self.connect().await {
            Ok(()) => Ok(()),
            Err(SyncError::Unauthenticated) => {
                tracing::info!("no active session; starting offline");
                Ok(())
            }
            Err(SyncError::RemoteUnavailable { message }) => {
                tracing::info!("backend unreachable at startup ({}); starting offline", message);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Explicit connect action: resolve the session and workspace, subscribe
    /// to push notifications, and run one full bidirectional cycle.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let Some(remote) = self.remote.clone() else {
            self.publish(SyncPhase::Disabled, None).await;
            return Err(SyncError::NotConfigured);
        };

        let session = match self.bounded(remote.get_session()).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                self.publish(SyncPhase::Offline, None).await;
                return Err(SyncError::Unauthenticated);
            }
            Err(e) => {
                self.publish(SyncPhase::Offline, None).await;
                return Err(e);
            }
        };

        let workspace = match self
            .bounded(remote.resolve_or_create_workspace(session.owner_id))
            .await
        {
            Ok(workspace) => workspace,
            Err(e) => {
                self.publish(SyncPhase::Offline, None).await;
                return Err(e);
            }
        };

        let feed = match self.bounded(remote.subscribe(workspace)).await {
            Ok(feed) => feed,
            Err(e) => {
                self.publish(SyncPhase::Offline, None).await;
                return Err(e);
            }
        };

        let mut sync_session = SyncSession::new(session.owner_id, workspace);
        let engine = Arc::downgrade(self);
        let drain = tokio::spawn(async move {
            let mut feed = feed;
            while let Some(notice) = feed.recv().await {
                let Some(engine) = engine.upgrade() else { break };
                engine.handle_push(notice).await;
            }
        });
        sync_session.attach_feed(drain);

        {
            let mut slot = self.session.write().await;
            if let Some(mut old) = slot.take() {
                old.teardown();
            }
            *slot = Some(sync_session);
        }
        tracing::info!(%workspace, owner = %session.owner_id, "session established");

        self.run_guarded(SyncPhase::Syncing, CycleMode::Bidirectional)
            .await
    }

    /// Manual sync trigger. Silently a no-op while `Disabled` or `Offline`,
    /// dropped while a cycle is already in flight.
    pub async fn trigger_sync(&self) -> Result<()> {
        self.trigger(CycleMode::Bidirectional).await
    }

    /// Trigger a cycle with an explicit direction
    pub async fn trigger(&self, mode: CycleMode) -> Result<()> {
        let phase = self.status.read().await.phase;
        match phase {
            SyncPhase::Disabled | SyncPhase::Offline => {
                tracing::debug!(?phase, "sync trigger ignored");
                Ok(())
            }
            SyncPhase::Syncing | SyncPhase::Receiving => {
                tracing::debug!("sync trigger dropped; cycle in flight");
                Ok(())
            }
            SyncPhase::Idle | SyncPhase::Error => {
                self.run_guarded(SyncPhase::Syncing, mode).await
            }
        }
    }

    /// Network-regained trigger: re-run the startup sequence whenever no
    /// session is held, or run an ordinary cycle from `Idle`/`Error`.
    pub async fn network_online(self: &Arc<Self>) {
        if self.remote.is_none() {
            return;
        }
        let connected = self.session.read().await.is_some();
        if !connected {
            if let Err(e) = self.start().await {
                tracing::warn!("reconnect attempt failed: {}", e);
            }
            return;
        }
        let phase = self.status.read().await.phase;
        if matches!(phase, SyncPhase::Idle | SyncPhase::Error) {
            let _ = self.trigger_sync().await;
        }
    }

    /// Network-loss trigger: tear down the session and settle in `Offline`
    pub async fn network_lost(&self) {
        if let Some(mut session) = self.session.write().await.take() {
            session.teardown();
        }
        let phase = self.status.read().await.phase;
        if phase != SyncPhase::Disabled {
            self.publish(SyncPhase::Offline, None).await;
        }
    }

    /// Tear down the session and any background tasks (sign-out path)
    pub async fn disconnect(&self) {
        if let Some(mut session) = self.session.write().await.take() {
            session.teardown();
        }
        if let Ok(mut periodic) = self.periodic.lock() {
            if let Some(task) = periodic.take() {
                task.abort();
            }
        }
        let phase = self.status.read().await.phase;
        if phase != SyncPhase::Disabled {
            self.publish(SyncPhase::Offline, None).await;
        }
    }

    /// Spawn the periodic trigger loop. Aborted when the engine drops.
    pub fn start_periodic(self: &Arc<Self>) {
        if !self.config.auto_sync {
            return;
        }
        let engine = Arc::downgrade(self);
        let interval = self.config.sync_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else { break };
                let _ = engine.trigger_sync().await;
            }
        });
        if let Ok(mut periodic) = self.periodic.lock() {
            if let Some(old) = periodic.replace(handle) {
                old.abort();
            }
        }
    }

    /// Peer push handling: ignore self-echoes, drop while busy, otherwise
    /// run a download-only cycle under the `Receiving` tag.
    async fn handle_push(&self, notice: ChangeNotice) {
        let session_owner = self.session.read().await.as_ref().map(|s| s.owner_id);
        let Some(owner) = session_owner else {
            return;
        };
        if notice.writer == owner {
            tracing::debug!("ignoring self-echo notification");
            return;
        }
        let phase = self.status.read().await.phase;
        if phase != SyncPhase::Idle {
            tracing::debug!(?phase, "push notification dropped");
            return;
        }
        tracing::info!(writer = %notice.writer, "peer change received");
        let _ = self
            .run_guarded(SyncPhase::Receiving, CycleMode::DownloadOnly)
            .await;
    }

    /// Run one cycle under the single-flight guard, publishing the entry
    /// phase first and the terminal phase after.
    async fn run_guarded(&self, entry: SyncPhase, mode: CycleMode) -> Result<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            tracing::debug!("sync trigger dropped; cycle in flight");
            return Ok(());
        }
        self.publish(entry, None).await;

        let result = self.run_cycle(mode).await;

        // network_lost (or disconnect) may have fired mid-cycle; the
        // Offline/Disabled phase it published stands, the cycle's terminal
        // transition does not
        let interrupted = matches!(
            self.status.read().await.phase,
            SyncPhase::Offline | SyncPhase::Disabled
        );
        if interrupted {
            tracing::debug!("cycle finished after going offline; outcome not published");
            self.busy.store(false, Ordering::SeqCst);
            return result;
        }

        match &result {
            Ok(()) => {
                self.status.write().await.last_sync = Some(Utc::now());
                self.publish(SyncPhase::Idle, None).await;
            }
            Err(e) => {
                tracing::warn!("sync cycle failed: {}", e);
                self.publish(SyncPhase::Error, Some(e.to_string())).await;
            }
        }
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    /// One comparison-and-reconciliation pass between the local document
    /// and the remote record.
    async fn run_cycle(&self, mode: CycleMode) -> Result<()> {
        let remote = self.remote.clone().ok_or(SyncError::NotConfigured)?;
        let (workspace, owner) = {
            let session = self.session.read().await;
            let session = session.as_ref().ok_or(SyncError::Unauthenticated)?;
            (session.workspace_id, session.owner_id)
        };

        let local = self.store.load().await;

        let record = match self.bounded(remote.fetch_record(workspace, owner)).await {
            Ok(record) => record,
            Err(SyncError::MalformedDocument { message }) => {
                // Never overwrite local state with garbage; skip the cycle
                tracing::warn!("remote record malformed, keeping local document: {}", message);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Some(record) = record else {
            if mode.uploads() {
                let outcome = self
                    .bounded(remote.upsert_record(workspace, owner, &local.payload))
                    .await?;
                self.store.align_saved_at(outcome.updated_at).await?;
                tracing::info!(revision = outcome.stored_revision, "created remote record");
            }
            return Ok(());
        };

        match compare(local.last_saved_at, record.updated_at) {
            SyncOutcome::LocalWins => {
                if mode.uploads() {
                    let outcome = self
                        .bounded(remote.upsert_record(workspace, owner, &local.payload))
                        .await?;
                    self.store.align_saved_at(outcome.updated_at).await?;
                    tracing::info!(revision = outcome.stored_revision, "uploaded local document");
                } else {
                    tracing::debug!("local is newer but cycle is download-only");
                }
            }
            SyncOutcome::RemoteWins => {
                if mode.downloads() {
                    self.store
                        .adopt_remote(record.payload, record.updated_at)
                        .await?;
                    tracing::info!(revision = record.stored_revision, "adopted remote document");
                } else {
                    tracing::debug!("remote is newer but cycle is upload-only");
                }
            }
            SyncOutcome::Equal => {
                tracing::debug!("documents are in sync; no I/O");
            }
        }
        Ok(())
    }

    /// Apply the configured bound to a remote operation
    async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.remote_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::remote("operation timed out")),
        }
    }

    /// Update the status and notify every observer, synchronously
    async fn publish(&self, phase: SyncPhase, error: Option<String>) {
        let snapshot = {
            let mut status = self.status.write().await;
            status.phase = phase;
            status.error = error;
            status.clone()
        };
        self.observers.notify(&snapshot);
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Ok(mut periodic) = self.periodic.lock() {
            if let Some(task) = periodic.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryRemote;

    async fn engine_without_remote() -> Arc<SyncEngine> {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        SyncEngine::new(SyncConfig::new(), store, None)
    }

    #[tokio::test]
    async fn test_no_remote_means_disabled() {
        let engine = engine_without_remote().await;
        engine.start().await.unwrap();
        assert_eq!(engine.status().await.phase, SyncPhase::Disabled);
    }

    #[tokio::test]
    async fn test_triggers_are_noops_while_disabled() {
        let engine = engine_without_remote().await;
        engine.start().await.unwrap();
        engine.trigger_sync().await.unwrap();
        assert_eq!(engine.status().await.phase, SyncPhase::Disabled);
    }

    #[tokio::test]
    async fn test_no_session_means_offline() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(SyncConfig::new(), store, Some(remote));
        engine.start().await.unwrap();
        assert_eq!(engine.status().await.phase, SyncPhase::Offline);
    }

    #[tokio::test]
    async fn test_connect_without_session_is_unauthenticated() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(SyncConfig::new(), store, Some(remote));
        let result = engine.connect().await;
        assert!(matches!(result, Err(SyncError::Unauthenticated)));
    }
}
