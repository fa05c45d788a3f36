//! Debounced local persistence.
//!
//! Rapid successive document mutations coalesce into a single store write
//! after a quiet window. The window is bounded (hundreds of milliseconds)
//! so a concurrently running sync cycle never reads a badly stale document.
//! Only the latest pending snapshot is kept; earlier ones are superseded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::document::Document;
use crate::error::Result;
use crate::store::LocalStore;

/// Coalesces rapid saves into one write per quiet window
#[derive(Debug)]
pub struct DebouncedSaver {
    store: Arc<LocalStore>,
    window: Duration,
    pending: Arc<Mutex<Option<Document>>>,
    /// True while a flusher task is alive. The flusher clears it under the
    /// pending lock, so a schedule that stores a snapshot and still reads
    /// `true` is guaranteed another drain pass.
    running: Arc<AtomicBool>,
}

impl DebouncedSaver {
    pub fn new(store: Arc<LocalStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            pending: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a document snapshot for persistence after the quiet window.
    ///
    /// A snapshot queued while an earlier one is still waiting replaces it;
    /// the eventual write always persists the most recent state. The flusher
    /// keeps draining until nothing is pending, so a snapshot that lands
    /// while a write is in progress is picked up on the next pass.
    pub async fn schedule(&self, doc: Document) {
        {
            let mut pending = self.pending.lock().await;
            *pending = Some(doc);
            if self.running.swap(true, Ordering::SeqCst) {
                return;
            }
        }

        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending);
        let running = Arc::clone(&self.running);
        let window = self.window;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(window).await;
                let snapshot = {
                    let mut pending = pending.lock().await;
                    match pending.take() {
                        Some(doc) => doc,
                        None => {
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                };
                if let Err(e) = store.save(&snapshot).await {
                    tracing::warn!("debounced save failed: {}", e);
                }
            }
        });
    }

    /// Persist any pending snapshot immediately
    pub async fn flush(&self) -> Result<Option<Document>> {
        let snapshot = self.pending.lock().await.take();
        match snapshot {
            Some(doc) => Ok(Some(self.store.save(&doc).await?)),
            None => Ok(None),
        }
    }

    /// Whether a snapshot is waiting for the quiet window to elapse
    pub async fn has_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }
}
