//! Versioned response cache and pending-sync-queue persistence.
//!
//! This module provides the two persistent stores the worker relies on:
//! - named, versioned cache stores of (request identity -> response
//!   snapshot) pairs, created and deleted only by the lifecycle handlers
//! - the pending offline-data queue drained by the background sync agent

mod storage;
mod types;

pub use storage::{CacheStorage, MemoryStorage, SqliteStorage, SyncQueueStorage};
pub use types::{
  FetchRequest, PendingSyncRecord, RequestIdentity, RequestMode, ResponseKind, ResponseSnapshot,
  StoreInfo,
};
