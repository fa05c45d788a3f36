//! TaskMatrix - Sync Core
//!
//! Offline-first synchronization core for a task-tracking matrix
//! (projects x regions) with local persistence and optional multi-device
//! cloud synchronization.
//!
//! # Overview
//!
//! The crate provides:
//! - A versioned, timestamped [`document::Document`] holding the entire
//!   application state as one aggregate
//! - A SQLite-backed [`store::LocalStore`] with corrupt-tolerant loads and
//!   debounced writes
//! - A mockable [`remote::RemoteStore`] capability boundary with a REST
//!   implementation and an in-memory backend
//! - The [`sync::SyncEngine`] state machine applying whole-document
//!   last-writer-wins conflict resolution under single-flight coalescing
//!
//! # Module Structure
//!
//! - **`document`** - the document model, payload types, and the
//!   last-writer-wins comparison
//! - **`store`** - durable local persistence (load/save/adopt/export/import)
//! - **`remote`** - the cloud capability trait plus REST and in-memory
//!   implementations
//! - **`sync`** - the engine, its state machine, observers, the session
//!   lifecycle, and the debounced saver
//! - **`config`** / **`error`** - tuning knobs and the error taxonomy
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskmatrix::config::SyncConfig;
//! use taskmatrix::remote::rest::RestRemote;
//! use taskmatrix::store::LocalStore;
//! use taskmatrix::sync::SyncEngine;
//!
//! # async fn example() -> taskmatrix::error::Result<()> {
//! let config = SyncConfig::with_remote("https://backend.example");
//! let store = Arc::new(LocalStore::open().await?);
//! let remote = Arc::new(RestRemote::new(
//!     config.remote_url.clone().unwrap(),
//!     config.remote_timeout,
//!     config.poll_interval,
//! )?);
//!
//! let engine = SyncEngine::new(config, store, Some(remote));
//! let _sub = engine.add_listener(Box::new(|status| {
//!     println!("sync: {:?}", status.phase);
//! }));
//!
//! engine.start().await?;
//! engine.start_periodic();
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! All sync operations are cooperative async tasks; a single in-process
//! busy flag guarantees at most one cycle in flight, and concurrent
//! triggers are coalesced rather than queued. There is no cancellation of
//! an in-flight cycle, but every remote operation carries a bounded
//! timeout so a cycle cannot hang indefinitely.
//!
//! # Error Handling
//!
//! Errors inside a cycle are caught at the cycle boundary and converted to
//! an `Error` status event; they are never thrown across the observer
//! boundary, and no failure path discards data that was already durable.

pub mod config;
pub mod document;
pub mod error;
pub mod remote;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use document::{compare, Document, Payload, SyncOutcome};
pub use error::{Result, SyncError};
pub use store::LocalStore;
pub use sync::state::{SyncPhase, SyncStatus};
pub use sync::{CycleMode, SyncEngine};
