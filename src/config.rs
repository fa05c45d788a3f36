//! Engine configuration.
//!
//! Defaults come from environment variables where that makes sense for a
//! desktop deployment; everything can also be set programmatically.

use std::time::Duration;

/// Default periodic sync interval
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Default bound on any single remote operation
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

/// Default quiet window for debounced local saves
const DEFAULT_DEBOUNCE_MILLIS: u64 = 400;

/// Default polling interval for the degraded (poll-based) change feed
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote backend, if one is configured
    pub remote_url: Option<String>,
    /// Enable the periodic background trigger
    pub auto_sync: bool,
    /// Interval between periodic sync triggers
    pub sync_interval: Duration,
    /// Bounded timeout applied to every remote operation
    pub remote_timeout: Duration,
    /// Quiet window for coalescing rapid local saves
    pub debounce_window: Duration,
    /// Interval for the polling change feed
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let remote_url = std::env::var("TASKMATRIX_REMOTE_URL").ok();
        Self {
            remote_url,
            auto_sync: true,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            debounce_window: Duration::from_millis(DEFAULT_DEBOUNCE_MILLIS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl SyncConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration pointed at an explicit remote backend
    pub fn with_remote(url: impl Into<String>) -> Self {
        Self {
            remote_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Whether a remote backend is configured at all
    pub fn remote_configured(&self) -> bool {
        self.remote_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig {
            remote_url: None,
            ..SyncConfig::default()
        };
        assert!(config.auto_sync);
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.remote_timeout, Duration::from_secs(10));
        assert!(config.debounce_window <= Duration::from_millis(1000));
        assert!(!config.remote_configured());
    }

    #[test]
    fn test_with_remote() {
        let config = SyncConfig::with_remote("http://127.0.0.1:3000");
        assert!(config.remote_configured());
        assert_eq!(config.remote_url.as_deref(), Some("http://127.0.0.1:3000"));
    }
}
