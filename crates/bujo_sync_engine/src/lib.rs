//! # Bujo Sync Engine
//!
//! Offline-first synchronization between a local journal store and a
//! remote backend.
//!
//! This crate provides:
//! - Local store seams with an atomic entity-plus-outbox write
//! - In-memory and SQLite stores
//! - Push of the outbox in dependency order
//! - Paged, cursor-based pull with per-field last-write-wins resolution
//! - Exponential backoff with a single retry slot
//! - An observable status state machine and diagnostic event log
//! - HTTP and in-memory transports
//!
//! ## Architecture
//!
//! Every cycle is **push-then-pull**:
//! 1. Push pending mutations, standalone kinds before association kinds
//! 2. Pull each kind page by page from its stored revision cursor
//! 3. Record the outcome as a status and schedule a retry on failure
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time
//! - A local write and its outbox entry are recorded together or not at all
//! - Cursors are persisted only with the page they cover, and never move back
//! - No error escapes the engine; callers observe status and events

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod config;
mod engine;
mod environment;
mod error;
mod events;
mod http;
mod policy;
mod sqlite;
mod status;
mod store;
mod transport;

pub use backoff::{BackoffScheduler, ScheduledRetry};
pub use config::{
    RemoteConfig, RetryConfig, SyncConfig, DEFAULT_EVENT_LOG_CAPACITY, DEFAULT_PAGE_SIZE,
};
pub use engine::{CycleReport, SyncEngine, SyncStats, TriggerOutcome};
pub use environment::{
    AppLifecycle, AuthProvider, LifecycleEvent, NetworkMonitor, StaticAuth, SyncEnvironment,
};
pub use error::{SyncError, SyncResult};
pub use events::{EventLevel, EventLog, SyncEvent, SyncEventKind};
pub use http::HttpTransport;
pub use policy::{DebugPolicy, NoopPolicy, SyncPolicy};
pub use sqlite::SqliteStore;
pub use status::{StatusMachine, SyncStatus};
pub use store::{
    CursorStore, EntityChange, EntityStore, LocalStore, LocalWriter, MemoryStore, MutationStore,
};
pub use transport::{FetchCall, MergeCall, MockFailure, MockTransport, SyncTransport};
