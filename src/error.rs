//! Sync Error Types
//!
//! This module defines the error taxonomy shared by the local store, the
//! remote store client, and the sync engine.
//!
//! # Error Categories
//!
//! - `NotConfigured` - no remote backend is wired up; the engine stays disabled
//! - `Unauthenticated` - remote configured but no valid session
//! - `RemoteUnavailable` - network or backend reachability failure
//! - `StorageFailure` - local persistence failed (e.g. quota, locked database)
//! - `MalformedDocument` - a stored or downloaded payload failed to parse
//!
//! # Usage
//!
//! ```rust
//! use taskmatrix::error::SyncError;
//!
//! // Create a remote availability error
//! let error = SyncError::remote("connection refused");
//! ```
//!
//! # Thread Safety
//!
//! All error types are `Send + Sync` and can be safely shared across thread boundaries.
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the sync core
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    /// No remote backend is configured; sync is permanently disabled
    /// until the process is restarted with a remote capability.
    #[error("no remote backend configured")]
    NotConfigured,

    /// Remote is configured but there is no authenticated session
    #[error("no authenticated session")]
    Unauthenticated,

    /// Network or backend reachability failure; recoverable on next trigger
    #[error("remote unavailable: {message}")]
    RemoteUnavailable {
        /// Human-readable error message
        message: String,
    },

    /// Local persistence failed
    #[error("local storage failure: {message}")]
    StorageFailure {
        /// Human-readable error message
        message: String,
    },

    /// Deserialization of a stored or downloaded payload failed
    #[error("malformed document: {message}")]
    MalformedDocument {
        /// Human-readable error message
        message: String,
    },
}

impl SyncError {
    /// Create a new remote availability error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
        }
    }

    /// Create a new storage failure error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure {
            message: message.into(),
        }
    }

    /// Create a new malformed document error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(format!("database error: {}", err))
    }
}
