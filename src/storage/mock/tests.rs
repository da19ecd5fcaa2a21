use chrono::{Duration, Utc};

use super::*;
use crate::event::AccountCreated;

fn pending_record(aggregate: &str) -> OutboxRecord {
    OutboxRecord::pending(&AccountCreated::event(aggregate, "Ada", "ada@example.com", "123")).unwrap()
}

#[tokio::test]
async fn test_mock_store_save_visible_after_commit() {
    let store = MockOutboxStore::new();
    let record = pending_record("a1");

    let mut tx = store.begin().await.unwrap();
    store.save(&mut tx, &record).await.unwrap();
    assert!(store.record(&record.event_id).await.is_none());
    assert!(store.get(&mut tx, &record.event_id).await.unwrap().is_some());

    store.commit(tx).await.unwrap();
    assert_eq!(store.record(&record.event_id).await, Some(record));
}

#[tokio::test]
async fn test_mock_store_dropped_tx_discards_writes() {
    let store = MockOutboxStore::new();
    let record = pending_record("a1");

    {
        let mut tx = store.begin().await.unwrap();
        store.save(&mut tx, &record).await.unwrap();
    }

    assert!(store.records().await.is_empty());
}

#[tokio::test]
async fn test_mock_store_duplicate_event_id() {
    let store = MockOutboxStore::new();
    let record = pending_record("a1");

    let mut tx = store.begin().await.unwrap();
    store.save(&mut tx, &record).await.unwrap();
    let result = store.save(&mut tx, &record).await;

    assert!(matches!(result, Err(StorageError::Duplicate { .. })));
}

#[tokio::test]
async fn test_mock_store_find_pending_oldest_first_with_limit() {
    let store = MockOutboxStore::new();
    let now = Utc::now();

    let mut tx = store.begin().await.unwrap();
    for (i, offset) in [30, 10, 20].iter().enumerate() {
        let mut record = pending_record(&format!("a{}", i));
        record.occurred_on = now - Duration::seconds(*offset);
        store.save(&mut tx, &record).await.unwrap();
    }
    store.commit(tx).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let pending = store.find_pending(&mut tx, 2).await.unwrap();

    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].aggregate_id, "a0");
    assert_eq!(pending[1].aggregate_id, "a2");
}

#[tokio::test]
async fn test_mock_store_update_status_missing_record_is_noop() {
    let store = MockOutboxStore::new();

    let mut tx = store.begin().await.unwrap();
    store
        .update_status(&mut tx, "missing", &StatusChange::sent(Utc::now()))
        .await
        .unwrap();
    store.commit(tx).await.unwrap();

    assert!(store.records().await.is_empty());
}

#[tokio::test]
async fn test_mock_store_fail_on_save() {
    let store = MockOutboxStore::new();
    store.set_fail_on_save(true).await;

    let mut tx = store.begin().await.unwrap();
    let result = store.save(&mut tx, &pending_record("a1")).await;

    assert!(matches!(result, Err(StorageError::Injected(_))));
}

#[tokio::test]
async fn test_mock_store_count_by_status() {
    let store = MockOutboxStore::new();
    let sent = pending_record("a1");
    let waiting = pending_record("a2");

    let mut tx = store.begin().await.unwrap();
    store.save(&mut tx, &sent).await.unwrap();
    store.save(&mut tx, &waiting).await.unwrap();
    store
        .update_status(&mut tx, &sent.event_id, &StatusChange::sent(Utc::now()))
        .await
        .unwrap();
    store.commit(tx).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert_eq!(store.count_by_status(&mut tx, OutboxStatus::Pending).await.unwrap(), 1);
    assert_eq!(store.count_by_status(&mut tx, OutboxStatus::Sent).await.unwrap(), 1);
    assert_eq!(store.count_by_status(&mut tx, OutboxStatus::Failed).await.unwrap(), 0);
}
