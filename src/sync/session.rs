//! Explicit sync session lifecycle.
//!
//! One [`SyncSession`] exists per authenticated connection. It owns the
//! resolved workspace, the owner identity, and the task draining the push
//! feed; tearing the session down (or dropping it) stops the feed.

use tokio::task::JoinHandle;

use crate::remote::{OwnerId, WorkspaceId};

/// Connectivity of the session's realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Per-connection sync state, constructed once per authenticated connection
#[derive(Debug)]
pub struct SyncSession {
    pub owner_id: OwnerId,
    pub workspace_id: WorkspaceId,
    connection: ConnectionState,
    /// Task consuming the change feed; aborted on teardown
    feed_task: Option<JoinHandle<()>>,
}

impl SyncSession {
    /// Create a session for a resolved workspace, not yet subscribed
    pub fn new(owner_id: OwnerId, workspace_id: WorkspaceId) -> Self {
        Self {
            owner_id,
            workspace_id,
            connection: ConnectionState::Disconnected,
            feed_task: None,
        }
    }

    /// Attach the running feed-drain task and mark the channel connected
    pub fn attach_feed(&mut self, task: JoinHandle<()>) {
        self.teardown();
        self.feed_task = Some(task);
        self.connection = ConnectionState::Connected;
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Stop the feed and mark the channel disconnected
    pub fn teardown(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
        self.connection = ConnectionState::Disconnected;
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
