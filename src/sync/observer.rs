//! Status observer registry.
//!
//! Listeners subscribe with [`ObserverRegistry::add_listener`] and get back
//! a [`Disposer`]; notification is synchronous and a panicking listener is
//! caught and logged so it can never abort the engine or starve the other
//! listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::sync::state::SyncStatus;

/// Callback invoked with every published status event
pub type StatusListener = Box<dyn Fn(&SyncStatus) + Send + Sync>;

type SharedListener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

type ListenerSlot = (u64, SharedListener);

/// Registry of status listeners with per-listener fault isolation
#[derive(Default)]
pub struct ObserverRegistry {
    listeners: Arc<Mutex<Vec<ListenerSlot>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.listeners.lock().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("ObserverRegistry")
            .field("listeners", &count)
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the returned disposer removes it again
    pub fn add_listener(&self, listener: StatusListener) -> Disposer {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let listener: SharedListener = Arc::from(listener);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, listener));
        }
        Disposer {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Deliver a status event to every listener, synchronously.
    ///
    /// The registry lock is released before any callback runs, so a listener
    /// may dispose itself or register new listeners without deadlocking.
    pub fn notify(&self, status: &SyncStatus) {
        let snapshot: Vec<ListenerSlot> = {
            let Ok(listeners) = self.listeners.lock() else {
                return;
            };
            listeners
                .iter()
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect()
        };
        for (id, listener) in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| listener(status)));
            if result.is_err() {
                tracing::warn!("status listener {} panicked; continuing fan-out", id);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Removes one listener from the registry it came from
#[derive(Debug)]
pub struct Disposer {
    listeners: Weak<Mutex<Vec<ListenerSlot>>>,
    id: u64,
}

impl Disposer {
    /// Unsubscribe the listener. Dropping the disposer without calling this
    /// leaves the listener registered for the registry's lifetime.
    pub fn dispose(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::state::SyncPhase;
    use std::sync::atomic::AtomicUsize;

    fn status() -> SyncStatus {
        SyncStatus {
            phase: SyncPhase::Idle,
            last_sync: None,
            error: None,
        }
    }

    #[test]
    fn test_notify_reaches_all_listeners() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        let _d1 = registry.add_listener(Box::new(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        let c2 = Arc::clone(&count);
        let _d2 = registry.add_listener(Box::new(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));

        registry.notify(&status());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispose_removes_listener() {
        let registry = ObserverRegistry::new();
        let disposer = registry.add_listener(Box::new(|_| {}));
        assert_eq!(registry.len(), 1);

        disposer.dispose();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself_during_notification() {
        let registry = ObserverRegistry::new();
        let slot: Arc<Mutex<Option<Disposer>>> = Arc::new(Mutex::new(None));

        let held = Arc::clone(&slot);
        let disposer = registry.add_listener(Box::new(move |_| {
            if let Some(disposer) = held.lock().unwrap().take() {
                disposer.dispose();
            }
        }));
        *slot.lock().unwrap() = Some(disposer);

        registry.notify(&status());
        assert_eq!(registry.len(), 0);

        // A second event delivers to nobody and still returns
        registry.notify(&status());
    }

    #[test]
    fn test_listener_may_register_another_during_notification() {
        let registry = Arc::new(ObserverRegistry::new());
        let reg = Arc::clone(&registry);

        let _d = registry.add_listener(Box::new(move |_| {
            let added = reg.add_listener(Box::new(|_| {}));
            added.dispose();
        }));

        registry.notify(&status());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_break_fan_out() {
        let registry = ObserverRegistry::new();
        let reached = Arc::new(AtomicUsize::new(0));

        let _d1 = registry.add_listener(Box::new(|_| {
            panic!("faulty observer");
        }));
        let r = Arc::clone(&reached);
        let _d2 = registry.add_listener(Box::new(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        registry.notify(&status());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
