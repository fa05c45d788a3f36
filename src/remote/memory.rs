//! In-memory remote backend.
//!
//! Implements the full [`RemoteStore`] contract against process-local state,
//! with hooks to simulate the situations the engine has to survive: outages,
//! peer writes from another device, injected latency, and malformed records.
//! Integration tests drive the engine against this backend; it is also handy
//! as a scratch backend for demos.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::document::Payload;
use crate::error::{Result, SyncError};
use crate::remote::{
    ChangeFeed, ChangeNotice, OwnerId, RemoteRecord, RemoteStore, Session, UpsertOutcome,
    WorkspaceId,
};

#[derive(Debug, Default)]
struct State {
    session: Option<Session>,
    workspaces: HashMap<OwnerId, WorkspaceId>,
    members: HashMap<WorkspaceId, Vec<OwnerId>>,
    records: HashMap<(WorkspaceId, OwnerId), RemoteRecord>,
}

/// Process-local backend implementing [`RemoteStore`]
#[derive(Debug)]
pub struct MemoryRemote {
    state: Arc<RwLock<State>>,
    changes: broadcast::Sender<ChangeNotice>,
    offline: AtomicBool,
    malformed: AtomicBool,
    latency: RwLock<Duration>,
    fetch_calls: AtomicU64,
    upsert_calls: AtomicU64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            changes,
            offline: AtomicBool::new(false),
            malformed: AtomicBool::new(false),
            latency: RwLock::new(Duration::ZERO),
            fetch_calls: AtomicU64::new(0),
            upsert_calls: AtomicU64::new(0),
        }
    }

    /// Establish an authenticated session for a fresh owner
    pub async fn sign_in(&self, email: &str) -> Session {
        let session = Session {
            owner_id: Uuid::new_v4(),
            email: Some(email.to_string()),
        };
        self.state.write().await.session = Some(session.clone());
        session
    }

    /// Drop the authenticated session
    pub async fn sign_out(&self) {
        self.state.write().await.session = None;
    }

    /// Simulate losing or regaining backend reachability
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every subsequent fetch report a malformed record
    pub fn set_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }

    /// Inject latency into every operation, so tests can overlap cycles
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    /// Number of fetch_record calls observed
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of upsert_record calls observed
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Direct record access for assertions
    pub async fn record(&self, workspace: WorkspaceId, owner: OwnerId) -> Option<RemoteRecord> {
        self.state.read().await.records.get(&(workspace, owner)).cloned()
    }

    /// Write a record on behalf of an arbitrary writer identity and
    /// broadcast the change notice, at an explicit server timestamp.
    ///
    /// `record_owner` selects whose record is written; `writer` is the
    /// identity carried by the notification. They differ when simulating
    /// a peer device updating a shared record.
    pub async fn write_record_as(
        &self,
        workspace: WorkspaceId,
        record_owner: OwnerId,
        writer: OwnerId,
        payload: Payload,
        updated_at: DateTime<Utc>,
    ) -> RemoteRecord {
        let record = {
            let mut state = self.state.write().await;
            let entry = state
                .records
                .entry((workspace, record_owner))
                .and_modify(|r| {
                    r.stored_revision += 1;
                    r.updated_at = updated_at;
                    r.payload = payload.clone();
                })
                .or_insert_with(|| RemoteRecord {
                    workspace_id: workspace,
                    owner_id: record_owner,
                    stored_revision: 1,
                    updated_at,
                    payload,
                });
            entry.clone()
        };
        let _ = self.changes.send(ChangeNotice {
            workspace_id: workspace,
            writer,
        });
        record
    }

    /// Write a record as a peer owner at an explicit server timestamp
    pub async fn peer_write_at(
        &self,
        workspace: WorkspaceId,
        writer: OwnerId,
        payload: Payload,
        updated_at: DateTime<Utc>,
    ) -> RemoteRecord {
        self.write_record_as(workspace, writer, writer, payload, updated_at)
            .await
    }

    /// Write a record as a peer, stamped with the current time
    pub async fn peer_write(
        &self,
        workspace: WorkspaceId,
        writer: OwnerId,
        payload: Payload,
    ) -> RemoteRecord {
        self.peer_write_at(workspace, writer, payload, Utc::now()).await
    }

    /// Overwrite a record's server timestamp, for deterministic comparisons
    pub async fn backdate_record(
        &self,
        workspace: WorkspaceId,
        owner: OwnerId,
        updated_at: DateTime<Utc>,
    ) {
        if let Some(record) = self
            .state
            .write()
            .await
            .records
            .get_mut(&(workspace, owner))
        {
            record.updated_at = updated_at;
        }
    }

    async fn gate(&self) -> Result<()> {
        let latency = *self.latency.read().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::remote("backend unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get_session(&self) -> Result<Option<Session>> {
        self.gate().await?;
        Ok(self.state.read().await.session.clone())
    }

    async fn resolve_or_create_workspace(&self, owner: OwnerId) -> Result<WorkspaceId> {
        self.gate().await?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.workspaces.get(&owner) {
            return Ok(*existing);
        }
        let workspace = Uuid::new_v4();
        state.workspaces.insert(owner, workspace);
        state.members.entry(workspace).or_default().push(owner);
        Ok(workspace)
    }

    async fn fetch_record(
        &self,
        workspace: WorkspaceId,
        owner: OwnerId,
    ) -> Result<Option<RemoteRecord>> {
        self.gate().await?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.malformed.load(Ordering::SeqCst) {
            return Err(SyncError::malformed("record payload failed to parse"));
        }
        Ok(self.state.read().await.records.get(&(workspace, owner)).cloned())
    }

    async fn upsert_record(
        &self,
        workspace: WorkspaceId,
        owner: OwnerId,
        payload: &Payload,
    ) -> Result<UpsertOutcome> {
        self.gate().await?;
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let outcome = {
            let mut state = self.state.write().await;
            let entry = state
                .records
                .entry((workspace, owner))
                .and_modify(|r| {
                    r.stored_revision += 1;
                    r.updated_at = now;
                    r.payload = payload.clone();
                })
                .or_insert_with(|| RemoteRecord {
                    workspace_id: workspace,
                    owner_id: owner,
                    stored_revision: 1,
                    updated_at: now,
                    payload: payload.clone(),
                });
            UpsertOutcome {
                stored_revision: entry.stored_revision,
                updated_at: entry.updated_at,
            }
        };
        let _ = self.changes.send(ChangeNotice {
            workspace_id: workspace,
            writer: owner,
        });
        Ok(outcome)
    }

    async fn subscribe(&self, workspace: WorkspaceId) -> Result<ChangeFeed> {
        self.gate().await?;
        let mut rx = self.changes.subscribe();
        let (tx, notices) = mpsc::channel(16);
        let driver = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notice) if notice.workspace_id == workspace => {
                        if tx.send(notice).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("change feed lagged, skipped {} notices", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(ChangeFeed::new(notices, driver))
    }
}
