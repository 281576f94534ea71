//! Swap record storage.
//!
//! Every backend implements [`SwapStore`]. A record past its deadline is never
//! returned or modified: reads and writes that reach one fail with
//! [`StoreError::Expired`], while ids with no row at all are
//! [`StoreError::NotFound`]. [`SwapStore::update`] is a compare-and-set on the
//! target slot.

pub mod json_file;
pub mod memory;
pub mod postgrest;
pub mod sqlite;

#[cfg(test)]
mod conformance;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileswap_types::{Slot, SwapRecord, SwapUpdate, UpdateRejected};
use thiserror::Error;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Swap not found: {0}")]
    NotFound(String),

    #[error("Swap expired: {0}")]
    Expired(String),

    #[error("Swap id already in use: {0}")]
    Conflict(String),

    #[error("Swap {id}: {slot} is already attached")]
    SlotOccupied { id: String, slot: Slot },

    #[error("Swap {0}: file2 offered before file1")]
    OutOfOrder(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StoreError {
    pub(crate) fn rejected(id: &str, rejection: UpdateRejected) -> Self {
        match rejection {
            UpdateRejected::SlotOccupied(slot) => Self::SlotOccupied {
                id: id.to_string(),
                slot,
            },
            UpdateRejected::OutOfOrder => Self::OutOfOrder(id.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage contract shared by all backends.
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if a live record already
    /// uses the id.
    async fn put(&self, record: SwapRecord) -> StoreResult<()>;

    /// Fetch a live record.
    ///
    /// A stored record past `expires_at` is `Expired`; map-backed stores
    /// evict it on that read, so later reads see `NotFound`.
    async fn get(&self, id: &str) -> StoreResult<SwapRecord>;

    /// Attach a file to one slot and return the updated record.
    ///
    /// The slot check and the write happen as one step: of two racing
    /// attachments to the same slot exactly one succeeds.
    async fn update(&self, id: &str, update: SwapUpdate) -> StoreResult<SwapRecord>;

    /// Remove a record. Succeeds whether or not it exists.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Remove every expired record and return what was removed.
    async fn sweep_expired(&self) -> StoreResult<Vec<SwapRecord>>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Explain why a guarded update matched nothing, given the row as it is now.
pub(crate) fn diagnose_update(
    id: &str,
    current: Option<SwapRecord>,
    update: &SwapUpdate,
    now: DateTime<Utc>,
) -> StoreError {
    match current {
        Some(record) if record.is_expired_at(now) => StoreError::Expired(id.to_string()),
        Some(mut record) => match record.apply(update) {
            Err(rejection) => StoreError::rejected(id, rejection),
            Ok(()) => StoreError::Backend(format!("update of swap {} matched no rows", id)),
        },
        None => StoreError::NotFound(id.to_string()),
    }
}
