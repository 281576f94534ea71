use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileswap_types::{Clock, SwapRecord, SwapRow, SwapUpdate};
use tracing::debug;

use crate::{StoreError, StoreResult, SwapStore};

/// Keyed swap records plus the expiry rules every map-backed store shares.
#[derive(Debug, Clone, Default)]
pub(crate) struct SwapMap {
    swaps: HashMap<String, SwapRecord>,
}

impl SwapMap {
    pub(crate) fn from_rows(rows: BTreeMap<String, SwapRow>) -> Self {
        let swaps = rows
            .into_iter()
            .map(|(id, row)| (id, SwapRecord::from(row)))
            .collect();
        Self { swaps }
    }

    pub(crate) fn to_rows(&self) -> BTreeMap<String, SwapRow> {
        self.swaps
            .iter()
            .map(|(id, record)| (id.clone(), SwapRow::from(record.clone())))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.swaps.len()
    }

    /// Live record only; expired entries read as absent.
    pub(crate) fn get(&self, id: &str, now: DateTime<Utc>) -> Option<&SwapRecord> {
        self.swaps.get(id).filter(|r| !r.is_expired_at(now))
    }

    /// Drop `id` if it is stored but expired. Returns whether anything went.
    pub(crate) fn evict(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let expired = self.swaps.get(id).is_some_and(|r| r.is_expired_at(now));
        if expired {
            self.swaps.remove(id);
            debug!("Evicted expired swap {}", id);
        }
        expired
    }

    pub(crate) fn insert(&mut self, record: SwapRecord, now: DateTime<Utc>) -> StoreResult<()> {
        if self.get(&record.id, now).is_some() {
            return Err(StoreError::Conflict(record.id));
        }
        self.swaps.insert(record.id.clone(), record);
        Ok(())
    }

    pub(crate) fn update(
        &mut self,
        id: &str,
        update: &SwapUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<SwapRecord> {
        if self.evict(id, now) {
            return Err(StoreError::Expired(id.to_string()));
        }
        let record = self
            .swaps
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record
            .apply(update)
            .map_err(|rejection| StoreError::rejected(id, rejection))?;
        Ok(record.clone())
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<SwapRecord> {
        self.swaps.remove(id)
    }

    pub(crate) fn sweep(&mut self, now: DateTime<Utc>) -> Vec<SwapRecord> {
        let expired: Vec<String> = self
            .swaps
            .values()
            .filter(|r| r.is_expired_at(now))
            .map(|r| r.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| self.swaps.remove(id))
            .collect()
    }
}

/// Volatile store: one map per process, gone on restart.
pub struct MemoryStore {
    swaps: RwLock<SwapMap>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            swaps: RwLock::new(SwapMap::default()),
            clock,
        }
    }

    /// Number of physically stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, SwapMap>> {
        self.swaps
            .read()
            .map_err(|e| StoreError::Backend(format!("Swap map lock poisoned: {}", e)))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, SwapMap>> {
        self.swaps
            .write()
            .map_err(|e| StoreError::Backend(format!("Swap map lock poisoned: {}", e)))
    }
}

#[async_trait]
impl SwapStore for MemoryStore {
    async fn put(&self, record: SwapRecord) -> StoreResult<()> {
        let now = self.clock.now();
        self.write()?.insert(record, now)
    }

    async fn get(&self, id: &str) -> StoreResult<SwapRecord> {
        let now = self.clock.now();
        if let Some(record) = self.read()?.get(id, now) {
            return Ok(record.clone());
        }
        if self.write()?.evict(id, now) {
            return Err(StoreError::Expired(id.to_string()));
        }
        Err(StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, id: &str, update: SwapUpdate) -> StoreResult<SwapRecord> {
        let now = self.clock.now();
        self.write()?.update(id, &update, now)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.write()?.remove(id);
        Ok(())
    }

    async fn sweep_expired(&self) -> StoreResult<Vec<SwapRecord>> {
        let now = self.clock.now();
        Ok(self.write()?.sweep(now))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
