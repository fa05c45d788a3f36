//! Sync state tags and the status event published to observers.

use chrono::{DateTime, Utc};

/// Where the engine currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No remote capability configured; permanent until reconfigured
    Disabled,
    /// Remote configured but no network or no authenticated session
    Offline,
    /// Ready, not currently syncing
    Idle,
    /// A sync cycle is in flight
    Syncing,
    /// A peer-originated push arrived and a download is about to run
    Receiving,
    /// The last cycle failed; retained until the next successful cycle
    Error,
}

/// Status event delivered to every registered observer on each transition
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Timestamp of the last successful cycle, if any
    pub last_sync: Option<DateTime<Utc>>,
    /// Detail of the last failure, present while in [`SyncPhase::Error`]
    pub error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Disabled,
            last_sync: None,
            error: None,
        }
    }
}
