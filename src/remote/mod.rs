//! # Remote Store Client
//!
//! Capability boundary for the cloud backend: authentication session,
//! workspace resolution, record upload/download, and the change feed.
//!
//! The engine only ever talks to [`RemoteStore`], so any backend offering
//! row storage, auth, and change notification can sit behind it — a managed
//! Postgres-with-realtime service, a plain REST API with polling
//! ([`rest::RestRemote`]), or the in-memory backend used by tests
//! ([`memory::MemoryRemote`]).
//!
//! All operations resolve to a tagged [`SyncError::RemoteUnavailable`]
//! when the network or backend is unreachable; they never panic and never
//! crash the caller.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::document::Payload;
use crate::error::Result;

/// Identity of a workspace, the sharing scope for a remote record
pub type WorkspaceId = Uuid;

/// Identity of a record owner, assigned by the identity provider
pub type OwnerId = Uuid;

/// An authenticated session from the opaque identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub owner_id: OwnerId,
    pub email: Option<String>,
}

/// The cloud-side representation of one document for one (workspace, owner) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub workspace_id: WorkspaceId,
    pub owner_id: OwnerId,
    /// Server-side write counter; incremented on every accepted write,
    /// independent from the local document revision. Never decreases.
    pub stored_revision: i64,
    /// Server-assigned timestamp of the last accepted write
    pub updated_at: DateTime<Utc>,
    pub payload: Payload,
}

/// Result of an accepted upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The record's new server-side write counter
    pub stored_revision: i64,
    /// The server-assigned write timestamp, echoed back so the caller can
    /// align its local save timestamp and avoid a self-inflicted conflict
    /// on the next cycle
    pub updated_at: DateTime<Utc>,
}

/// A change notification delivered by the backend.
///
/// Notices are pure triggers ("something changed, re-check"), never carriers
/// of authoritative state; the engine re-derives everything from current
/// timestamps. The writer identity lets the engine drop self-echoes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub workspace_id: WorkspaceId,
    /// Owner identity of whoever performed the write
    pub writer: OwnerId,
}

/// An open subscription to workspace changes.
///
/// Dropping the feed tears down the underlying subscription.
#[derive(Debug)]
pub struct ChangeFeed {
    notices: mpsc::Receiver<ChangeNotice>,
    _guard: FeedGuard,
}

impl ChangeFeed {
    /// Assemble a feed from a notice channel and the task driving it
    pub fn new(notices: mpsc::Receiver<ChangeNotice>, driver: JoinHandle<()>) -> Self {
        Self {
            notices,
            _guard: FeedGuard {
                driver: Some(driver),
            },
        }
    }

    /// Receive the next change notice; `None` once the subscription closes
    pub async fn recv(&mut self) -> Option<ChangeNotice> {
        self.notices.recv().await
    }
}

/// Aborts the feed's driver task when the feed is dropped
#[derive(Debug)]
struct FeedGuard {
    driver: Option<JoinHandle<()>>,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
    }
}

/// Capability interface for the cloud backend
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current authenticated session, if any
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Find the owner's existing workspace or create one plus a membership
    /// record. Idempotent per owner.
    async fn resolve_or_create_workspace(&self, owner: OwnerId) -> Result<WorkspaceId>;

    /// Fetch the record for a (workspace, owner) pair, if one exists
    async fn fetch_record(
        &self,
        workspace: WorkspaceId,
        owner: OwnerId,
    ) -> Result<Option<RemoteRecord>>;

    /// Create the record with `stored_revision = 1`, or increment the
    /// counter and overwrite the payload if it already exists
    async fn upsert_record(
        &self,
        workspace: WorkspaceId,
        owner: OwnerId,
        payload: &Payload,
    ) -> Result<UpsertOutcome>;

    /// Open a change feed for every record in the workspace
    async fn subscribe(&self, workspace: WorkspaceId) -> Result<ChangeFeed>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_guard_aborts_driver_on_drop() {
        let (tx, rx) = mpsc::channel(4);
        let driver = tokio::spawn(async move {
            // Keeps the sender alive until aborted
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        let feed = ChangeFeed::new(rx, driver);

        let probe = feed._guard.driver.as_ref().unwrap().abort_handle();
        drop(feed);
        for _ in 0..50 {
            if probe.is_finished() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("feed driver task was not aborted");
    }

    #[tokio::test]
    async fn test_feed_delivers_notices() {
        let (tx, rx) = mpsc::channel(4);
        let workspace_id = Uuid::new_v4();
        let writer = Uuid::new_v4();
        let notice = ChangeNotice {
            workspace_id,
            writer,
        };
        let sent = notice.clone();
        let driver = tokio::spawn(async move {
            let _ = tx.send(sent).await;
        });

        let mut feed = ChangeFeed::new(rx, driver);
        assert_eq!(feed.recv().await, Some(notice));
    }
}
