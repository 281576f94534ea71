use std::sync::Arc;

use fileswap_db::{StoreError, SwapStore};
use fileswap_types::{
    Clock, FileDescriptor, Slot, SwapRecord, SwapStatus, SwapUpdate,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Fresh ids are retried this many times on collision before giving up.
const MAX_ID_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Swap not found: {0}")]
    NotFound(String),

    #[error("Swap {id}: {slot} is already attached")]
    AlreadyAttached { id: String, slot: Slot },

    #[error("Swap {id} is {status}")]
    InvalidState { id: String, status: SwapStatus },

    #[error("Could not allocate a unique swap id")]
    Conflict,

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for SwapError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) | StoreError::Expired(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

/// Swap lifecycle: creation, the two attachments, status derivation and
/// expiry eviction. The id is the only capability needed to read or write a
/// swap.
pub struct SwapEngine {
    store: Arc<dyn SwapStore>,
    clock: Arc<dyn Clock>,
}

impl SwapEngine {
    pub fn new(store: Arc<dyn SwapStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Opaque, unguessable swap id (UUIDv4, 32 hex chars).
    pub fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Create an empty swap and return its id.
    pub async fn create_swap(&self) -> Result<String, SwapError> {
        let record = self.insert_fresh(None).await?;
        Ok(record.id)
    }

    /// Create a swap with `file1` already attached, in one store write.
    pub async fn open_swap(&self, file1: FileDescriptor) -> Result<SwapRecord, SwapError> {
        self.insert_fresh(Some(file1)).await
    }

    async fn insert_fresh(&self, file1: Option<FileDescriptor>) -> Result<SwapRecord, SwapError> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let mut record = SwapRecord::new(Self::new_id(), self.clock.now());
            record.file1 = file1.clone();

            match self.store.put(record.clone()).await {
                Ok(()) => {
                    info!(
                        "Swap {} created (expires {})",
                        record.id,
                        record.expires_at.to_rfc3339()
                    );
                    return Ok(record);
                }
                Err(StoreError::Conflict(id)) => {
                    warn!("Swap id {} already taken (attempt {})", id, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SwapError::Conflict)
    }

    pub async fn attach_file1(
        &self,
        id: &str,
        file: FileDescriptor,
    ) -> Result<SwapRecord, SwapError> {
        let record = self
            .store
            .update(id, SwapUpdate::AttachFile1(file))
            .await
            .map_err(|e| match e {
                StoreError::SlotOccupied { id, slot } => SwapError::AlreadyAttached { id, slot },
                other => other.into(),
            })?;
        info!("Swap {}: file1 attached", id);
        Ok(record)
    }

    /// Attach the second file. Only a swap that is exactly
    /// `waiting_for_file2` accepts it.
    pub async fn attach_file2(
        &self,
        id: &str,
        file: FileDescriptor,
    ) -> Result<SwapRecord, SwapError> {
        let current = self.store.get(id).await?;
        let status = self.status(&current);
        if status != SwapStatus::WaitingForFile2 {
            return Err(SwapError::InvalidState {
                id: id.to_string(),
                status,
            });
        }

        // Lost races surface from the store's slot guard.
        let record = self
            .store
            .update(id, SwapUpdate::AttachFile2(file))
            .await
            .map_err(|e| match e {
                StoreError::SlotOccupied { id, .. } => SwapError::InvalidState {
                    id,
                    status: SwapStatus::Completed,
                },
                StoreError::OutOfOrder(id) => SwapError::InvalidState {
                    id,
                    status: SwapStatus::WaitingForFile1,
                },
                other => other.into(),
            })?;
        info!("Swap {}: file2 attached, swap completed", id);
        Ok(record)
    }

    pub async fn get_swap(&self, id: &str) -> Result<SwapRecord, SwapError> {
        Ok(self.store.get(id).await?)
    }

    /// Status of a swap by id. A record that is still stored but past its
    /// deadline reports `expired`; only ids with no record are `NotFound`.
    pub async fn swap_status(&self, id: &str) -> Result<SwapStatus, SwapError> {
        match self.store.get(id).await {
            Ok(record) => Ok(self.status(&record)),
            Err(StoreError::Expired(_)) => Ok(SwapStatus::Expired),
            Err(e) => Err(e.into()),
        }
    }

    pub fn status(&self, record: &SwapRecord) -> SwapStatus {
        record.status_at(self.clock.now())
    }

    pub async fn delete_swap(&self, id: &str) -> Result<(), SwapError> {
        self.store.delete(id).await?;
        info!("Swap {} deleted", id);
        Ok(())
    }

    pub async fn sweep_expired(&self) -> Result<Vec<SwapRecord>, SwapError> {
        Ok(self.store.sweep_expired().await?)
    }
}
