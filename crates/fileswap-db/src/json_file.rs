use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fileswap_types::{Clock, SwapRecord, SwapRow, SwapUpdate};
use tokio::fs;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::memory::SwapMap;
use crate::{StoreError, StoreResult, SwapStore};

/// File-backed store.
///
/// The whole snapshot (`{ "<swap_id>": <row>, ... }`) is read into memory on
/// first use and rewritten on every mutation. Writes go to a sibling temp
/// file that is then renamed over the snapshot, and the in-memory map only
/// changes once the rewrite succeeded.
pub struct JsonFileStore {
    path: PathBuf,
    swaps: OnceCell<Mutex<SwapMap>>,
    clock: Arc<dyn Clock>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            swaps: OnceCell::new(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn map(&self) -> StoreResult<&Mutex<SwapMap>> {
        self.swaps
            .get_or_try_init(|| async { Ok::<_, StoreError>(Mutex::new(self.load().await?)) })
            .await
    }

    async fn load(&self) -> StoreResult<SwapMap> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No swap snapshot at {}, starting empty", self.path.display());
                return Ok(SwapMap::default());
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(SwapMap::default());
        }

        let rows: BTreeMap<String, SwapRow> = serde_json::from_slice(&bytes)?;
        info!(
            "Loaded {} swaps from {}",
            rows.len(),
            self.path.display()
        );
        Ok(SwapMap::from_rows(rows))
    }

    async fn persist(&self, map: &SwapMap) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(&map.to_rows())?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {} swaps to {}", map.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl SwapStore for JsonFileStore {
    async fn put(&self, record: SwapRecord) -> StoreResult<()> {
        let now = self.clock.now();
        let mut map = self.map().await?.lock().await;
        let mut next = map.clone();
        next.insert(record, now)?;
        self.persist(&next).await?;
        *map = next;
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<SwapRecord> {
        let now = self.clock.now();
        let mut map = self.map().await?.lock().await;
        if let Some(record) = map.get(id, now) {
            return Ok(record.clone());
        }

        let mut next = map.clone();
        if !next.evict(id, now) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        // A failed eviction write leaves the record for a later read or the sweep.
        match self.persist(&next).await {
            Ok(()) => *map = next,
            Err(e) => warn!("Failed to persist eviction of swap {}: {}", id, e),
        }
        Err(StoreError::Expired(id.to_string()))
    }

    async fn update(&self, id: &str, update: SwapUpdate) -> StoreResult<SwapRecord> {
        let now = self.clock.now();
        let mut map = self.map().await?.lock().await;
        let mut next = map.clone();
        let updated = next.update(id, &update, now)?;
        self.persist(&next).await?;
        *map = next;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut map = self.map().await?.lock().await;
        let mut next = map.clone();
        if next.remove(id).is_some() {
            self.persist(&next).await?;
            *map = next;
        }
        Ok(())
    }

    async fn sweep_expired(&self) -> StoreResult<Vec<SwapRecord>> {
        let now = self.clock.now();
        let mut map = self.map().await?.lock().await;
        let mut next = map.clone();
        let removed = next.sweep(now);
        if !removed.is_empty() {
            self.persist(&next).await?;
            *map = next;
        }
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::{self, desc};
    use fileswap_types::ManualClock;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::default())
    }

    #[tokio::test]
    async fn conforms_to_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let store = JsonFileStore::new(dir.path().join("swaps.json"), clock.clone());
        conformance::run_all(&store, clock.now()).await;
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swaps.json");
        let clock = clock();

        let store = JsonFileStore::new(&path, clock.clone());
        store.put(SwapRecord::new("kept", clock.now())).await.unwrap();
        store
            .update("kept", SwapUpdate::AttachFile1(desc("a.txt", 100)))
            .await
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::new(&path, clock.clone());
        let record = reopened.get("kept").await.unwrap();
        assert_eq!(record.file1, Some(desc("a.txt", 100)));
        assert!(record.file2.is_none());
    }

    #[tokio::test]
    async fn snapshot_is_one_object_keyed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swaps.json");
        let clock = clock();

        let store = JsonFileStore::new(&path, clock.clone());
        store.put(SwapRecord::new("one", clock.now())).await.unwrap();
        store.put(SwapRecord::new("two", clock.now())).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["one"]["swap_id"], "one");
        assert!(obj["two"]["expires_at"].is_string());
    }

    #[tokio::test]
    async fn missing_or_empty_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swaps.json");
        std::fs::write(&path, "  \n").unwrap();

        let store = JsonFileStore::new(&path, clock());
        assert!(matches!(store.get("x").await, Err(StoreError::NotFound(_))));

        let nested = JsonFileStore::new(dir.path().join("a/b/swaps.json"), clock());
        assert!(nested.sweep_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_read_is_evicted_from_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swaps.json");
        let clock = clock();

        let store = JsonFileStore::new(&path, clock.clone());
        store.put(SwapRecord::new("old", clock.now())).await.unwrap();
        clock.advance(chrono::Duration::hours(25));

        assert!(matches!(store.get("old").await, Err(StoreError::Expired(_))));
        assert!(matches!(store.get("old").await, Err(StoreError::NotFound(_))));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.trim(), "{}");
    }

    #[tokio::test]
    async fn failed_eviction_write_still_answers_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swaps.json");
        let clock = clock();

        let store = JsonFileStore::new(&path, clock.clone());
        store.put(SwapRecord::new("old", clock.now())).await.unwrap();
        clock.advance(chrono::Duration::hours(25));

        // A directory where the temp file should go makes every rewrite fail.
        std::fs::create_dir(dir.path().join("swaps.json.tmp")).unwrap();

        assert!(matches!(store.get("old").await, Err(StoreError::Expired(_))));
        // Nothing was written, so the record is still there to be evicted.
        assert!(matches!(store.get("old").await, Err(StoreError::Expired(_))));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"old\""));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swaps.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path, clock());
        assert!(matches!(store.get("x").await, Err(StoreError::Json(_))));
    }
}
