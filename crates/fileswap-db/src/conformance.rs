//! Behaviour every `SwapStore` backend must share.
//!
//! Each check uses its own ids, and expired records are created already in
//! the past, so all checks can run against one store with a fixed clock.

use chrono::{DateTime, Duration, Utc};
use fileswap_types::{FileDescriptor, Slot, SwapRecord, SwapStatus, SwapUpdate};

use crate::{StoreError, SwapStore};

pub(crate) fn desc(name: &str, size: u64) -> FileDescriptor {
    FileDescriptor {
        locator: format!("/uploads/{}", name),
        display_name: name.to_string(),
        size_bytes: size,
    }
}

/// A record whose deadline passed one second before `now`.
pub(crate) fn expired_record(id: &str, now: DateTime<Utc>) -> SwapRecord {
    SwapRecord::new(id, now - Duration::hours(24) - Duration::seconds(1))
}

pub(crate) async fn run_all(store: &dyn SwapStore, now: DateTime<Utc>) {
    put_then_get(store, now).await;
    duplicate_put_conflicts(store, now).await;
    unknown_id_is_not_found(store).await;
    expired_record_reads_as_expired(store, now).await;
    attach_in_order(store, now).await;
    file2_before_file1_is_rejected(store, now).await;
    slot_is_single_use(store, now).await;
    attach_to_expired_is_expired(store, now).await;
    delete_is_idempotent(store, now).await;
    sweep_removes_only_expired(store, now).await;
}

async fn put_then_get(store: &dyn SwapStore, now: DateTime<Utc>) {
    let record = SwapRecord::new("put-get", now);
    store.put(record.clone()).await.unwrap();

    let fetched = store.get("put-get").await.unwrap();
    assert_eq!(fetched.id, record.id);
    assert_eq!(
        fetched.expires_at.timestamp_micros(),
        record.expires_at.timestamp_micros()
    );
    assert_eq!(fetched.status_at(now), SwapStatus::WaitingForFile1);
}

async fn duplicate_put_conflicts(store: &dyn SwapStore, now: DateTime<Utc>) {
    store.put(SwapRecord::new("dup", now)).await.unwrap();
    let err = store.put(SwapRecord::new("dup", now)).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(id) if id == "dup"));
}

async fn unknown_id_is_not_found(store: &dyn SwapStore) {
    let err = store.get("nope").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

async fn expired_record_reads_as_expired(store: &dyn SwapStore, now: DateTime<Utc>) {
    store.put(expired_record("stale", now)).await.unwrap();
    let err = store.get("stale").await.unwrap_err();
    assert!(matches!(err, StoreError::Expired(id) if id == "stale"));
}

async fn attach_in_order(store: &dyn SwapStore, now: DateTime<Utc>) {
    store.put(SwapRecord::new("ordered", now)).await.unwrap();

    let after1 = store
        .update("ordered", SwapUpdate::AttachFile1(desc("a.txt", 100)))
        .await
        .unwrap();
    assert_eq!(after1.status_at(now), SwapStatus::WaitingForFile2);

    let after2 = store
        .update("ordered", SwapUpdate::AttachFile2(desc("b.txt", 200)))
        .await
        .unwrap();
    assert_eq!(after2.status_at(now), SwapStatus::Completed);

    let stored = store.get("ordered").await.unwrap();
    assert_eq!(stored.file1, Some(desc("a.txt", 100)));
    assert_eq!(stored.file2, Some(desc("b.txt", 200)));
}

async fn file2_before_file1_is_rejected(store: &dyn SwapStore, now: DateTime<Utc>) {
    store.put(SwapRecord::new("early", now)).await.unwrap();
    let err = store
        .update("early", SwapUpdate::AttachFile2(desc("b.txt", 2)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::OutOfOrder(_)));
    assert!(store.get("early").await.unwrap().file2.is_none());
}

async fn slot_is_single_use(store: &dyn SwapStore, now: DateTime<Utc>) {
    store.put(SwapRecord::new("once", now)).await.unwrap();
    store
        .update("once", SwapUpdate::AttachFile1(desc("a.txt", 100)))
        .await
        .unwrap();

    let err = store
        .update("once", SwapUpdate::AttachFile1(desc("c.txt", 3)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SlotOccupied { slot: Slot::File1, .. }));
    assert_eq!(store.get("once").await.unwrap().file1, Some(desc("a.txt", 100)));

    store
        .update("once", SwapUpdate::AttachFile2(desc("b.txt", 200)))
        .await
        .unwrap();
    let err = store
        .update("once", SwapUpdate::AttachFile2(desc("d.txt", 4)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SlotOccupied { slot: Slot::File2, .. }));
}

async fn attach_to_expired_is_expired(store: &dyn SwapStore, now: DateTime<Utc>) {
    store.put(expired_record("late", now)).await.unwrap();
    let err = store
        .update("late", SwapUpdate::AttachFile1(desc("a.txt", 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Expired(_)));
}

async fn delete_is_idempotent(store: &dyn SwapStore, now: DateTime<Utc>) {
    store.put(SwapRecord::new("gone", now)).await.unwrap();
    store.delete("gone").await.unwrap();
    assert!(matches!(
        store.get("gone").await,
        Err(StoreError::NotFound(_))
    ));
    store.delete("gone").await.unwrap();
    store.delete("never-existed").await.unwrap();
}

async fn sweep_removes_only_expired(store: &dyn SwapStore, now: DateTime<Utc>) {
    store.put(SwapRecord::new("fresh", now)).await.unwrap();
    store.put(expired_record("swept", now)).await.unwrap();

    let removed = store.sweep_expired().await.unwrap();
    let ids: Vec<&str> = removed.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&"swept"));
    assert!(!ids.contains(&"fresh"));
    assert!(store.get("fresh").await.is_ok());

    assert!(store.sweep_expired().await.unwrap().is_empty());
}
