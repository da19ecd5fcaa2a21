//! OutboxStore interface tests.
//!
//! These tests verify the contract of the OutboxStore trait.
//! Each storage implementation should run these tests.

use chrono::{DateTime, Duration, Utc};

use courier::event::AccountCreated;
use courier::storage::{
    OutboxRecord, OutboxStatus, OutboxStore, StatusChange, StorageError, MAX_ERROR_MESSAGE_LEN,
};

/// Current time at microsecond precision, the finest every backend keeps.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

pub fn record_at(aggregate_id: &str, occurred_on: DateTime<Utc>) -> OutboxRecord {
    let event = AccountCreated::event(aggregate_id, "Ada", "ada@example.com", "12345678909");
    let mut record = OutboxRecord::pending(&event).expect("event should serialize");
    record.occurred_on = occurred_on;
    record
}

async fn save_committed<S: OutboxStore>(store: &S, records: &[OutboxRecord]) {
    let mut tx = store.begin().await.expect("begin should succeed");
    for record in records {
        store.save(&mut tx, record).await.expect("save should succeed");
    }
    store.commit(tx).await.expect("commit should succeed");
}

async fn get_committed<S: OutboxStore>(store: &S, event_id: &str) -> Option<OutboxRecord> {
    let mut tx = store.begin().await.unwrap();
    let record = store.get(&mut tx, event_id).await.expect("get should succeed");
    store.commit(tx).await.unwrap();
    record
}

async fn update_committed<S: OutboxStore>(store: &S, event_id: &str, change: &StatusChange) {
    let mut tx = store.begin().await.unwrap();
    store
        .update_status(&mut tx, event_id, change)
        .await
        .expect("update_status should succeed");
    store.commit(tx).await.unwrap();
}

// =============================================================================
// OutboxStore::save tests
// =============================================================================

pub async fn test_save_and_get<S: OutboxStore>(store: &S) {
    let record = record_at("a1", now_micros());
    save_committed(store, std::slice::from_ref(&record)).await;

    let stored = get_committed(store, &record.event_id)
        .await
        .expect("record should exist");

    assert_eq!(stored, record, "stored record should round-trip");
    assert_eq!(stored.status, OutboxStatus::Pending);
}

pub async fn test_save_duplicate_rejected<S: OutboxStore>(store: &S) {
    let record = record_at("a1", now_micros());
    save_committed(store, std::slice::from_ref(&record)).await;

    let mut tx = store.begin().await.unwrap();
    let result = store.save(&mut tx, &record).await;
    store.rollback(tx).await.unwrap();

    assert!(
        matches!(result, Err(StorageError::Duplicate { ref event_id }) if *event_id == record.event_id),
        "duplicate event id should be rejected, got {:?}",
        result
    );
}

pub async fn test_rollback_discards_save<S: OutboxStore>(store: &S) {
    let record = record_at("a1", now_micros());

    let mut tx = store.begin().await.unwrap();
    store.save(&mut tx, &record).await.unwrap();
    store.rollback(tx).await.unwrap();

    assert!(get_committed(store, &record.event_id).await.is_none());
}

pub async fn test_dropped_tx_discards_save<S: OutboxStore>(store: &S) {
    let record = record_at("a1", now_micros());

    {
        let mut tx = store.begin().await.unwrap();
        store.save(&mut tx, &record).await.unwrap();
    }

    assert!(get_committed(store, &record.event_id).await.is_none());
}

// =============================================================================
// OutboxStore::find_pending tests
// =============================================================================

pub async fn test_find_pending_oldest_first<S: OutboxStore>(store: &S) {
    let base = now_micros();
    let newest = record_at("a3", base);
    let oldest = record_at("a1", base - Duration::seconds(20));
    let middle = record_at("a2", base - Duration::seconds(10));
    save_committed(store, &[newest.clone(), oldest.clone(), middle.clone()]).await;

    let mut tx = store.begin().await.unwrap();
    let pending = store.find_pending(&mut tx, 100).await.unwrap();
    store.commit(tx).await.unwrap();

    let ids: Vec<&str> = pending.iter().map(|r| r.event_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            oldest.event_id.as_str(),
            middle.event_id.as_str(),
            newest.event_id.as_str()
        ]
    );
}

pub async fn test_find_pending_respects_limit<S: OutboxStore>(store: &S) {
    let base = now_micros();
    let records: Vec<OutboxRecord> = (0..5)
        .map(|i| record_at(&format!("a{}", i), base + Duration::seconds(i)))
        .collect();
    save_committed(store, &records).await;

    let mut tx = store.begin().await.unwrap();
    let pending = store.find_pending(&mut tx, 2).await.unwrap();
    store.commit(tx).await.unwrap();

    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].event_id, records[0].event_id);
    assert_eq!(pending[1].event_id, records[1].event_id);
}

pub async fn test_find_pending_skips_sent_and_failed<S: OutboxStore>(store: &S) {
    let base = now_micros();
    let sent = record_at("a1", base - Duration::seconds(3));
    let failed = record_at("a2", base - Duration::seconds(2));
    let pending = record_at("a3", base - Duration::seconds(1));
    save_committed(store, &[sent.clone(), failed.clone(), pending.clone()]).await;

    update_committed(store, &sent.event_id, &StatusChange::sent(base)).await;
    update_committed(store, &failed.event_id, &StatusChange::failed("down")).await;

    let mut tx = store.begin().await.unwrap();
    let found = store.find_pending(&mut tx, 100).await.unwrap();
    store.commit(tx).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].event_id, pending.event_id);
}

// =============================================================================
// OutboxStore::update_status tests
// =============================================================================

pub async fn test_update_sent<S: OutboxStore>(store: &S) {
    let record = record_at("a1", now_micros());
    save_committed(store, std::slice::from_ref(&record)).await;
    let sent_at = now_micros();

    update_committed(store, &record.event_id, &StatusChange::sent(sent_at)).await;

    let stored = get_committed(store, &record.event_id).await.unwrap();
    assert_eq!(stored.status, OutboxStatus::Sent);
    assert_eq!(stored.sent_at, Some(sent_at));
    assert!(stored.error_message.is_none());
}

pub async fn test_update_failed_truncates_message<S: OutboxStore>(store: &S) {
    let record = record_at("a1", now_micros());
    save_committed(store, std::slice::from_ref(&record)).await;
    let long_message = "é".repeat(MAX_ERROR_MESSAGE_LEN + 100);

    update_committed(store, &record.event_id, &StatusChange::failed(&long_message)).await;

    let stored = get_committed(store, &record.event_id).await.unwrap();
    assert_eq!(stored.status, OutboxStatus::Failed);
    assert!(stored.sent_at.is_none());
    let message = stored.error_message.expect("failed record should carry a message");
    assert_eq!(message.chars().count(), MAX_ERROR_MESSAGE_LEN);
}

pub async fn test_update_missing_is_noop<S: OutboxStore>(store: &S) {
    update_committed(store, "no-such-event", &StatusChange::sent(now_micros())).await;

    assert!(get_committed(store, "no-such-event").await.is_none());
}

// =============================================================================
// OutboxStore::count_by_status tests
// =============================================================================

pub async fn test_count_by_status<S: OutboxStore>(store: &S) {
    let base = now_micros();
    let records: Vec<OutboxRecord> = (0..3)
        .map(|i| record_at(&format!("a{}", i), base + Duration::seconds(i)))
        .collect();
    save_committed(store, &records).await;
    update_committed(store, &records[0].event_id, &StatusChange::sent(base)).await;

    let mut tx = store.begin().await.unwrap();
    let pending = store.count_by_status(&mut tx, OutboxStatus::Pending).await.unwrap();
    let sent = store.count_by_status(&mut tx, OutboxStatus::Sent).await.unwrap();
    let failed = store.count_by_status(&mut tx, OutboxStatus::Failed).await.unwrap();
    store.commit(tx).await.unwrap();

    assert_eq!((pending, sent, failed), (2, 1, 0));
}

/// Run every OutboxStore contract test, each against a fresh store from `$make`.
#[macro_export]
macro_rules! run_outbox_store_tests {
    ($make:ident) => {
        use $crate::storage::outbox_store_tests::*;

        test_save_and_get(&$make().await).await;
        println!("  test_save_and_get: PASSED");

        test_save_duplicate_rejected(&$make().await).await;
        println!("  test_save_duplicate_rejected: PASSED");

        test_rollback_discards_save(&$make().await).await;
        println!("  test_rollback_discards_save: PASSED");

        test_dropped_tx_discards_save(&$make().await).await;
        println!("  test_dropped_tx_discards_save: PASSED");

        test_find_pending_oldest_first(&$make().await).await;
        println!("  test_find_pending_oldest_first: PASSED");

        test_find_pending_respects_limit(&$make().await).await;
        println!("  test_find_pending_respects_limit: PASSED");

        test_find_pending_skips_sent_and_failed(&$make().await).await;
        println!("  test_find_pending_skips_sent_and_failed: PASSED");

        test_update_sent(&$make().await).await;
        println!("  test_update_sent: PASSED");

        test_update_failed_truncates_message(&$make().await).await;
        println!("  test_update_failed_truncates_message: PASSED");

        test_update_missing_is_noop(&$make().await).await;
        println!("  test_update_missing_is_noop: PASSED");

        test_count_by_status(&$make().await).await;
        println!("  test_count_by_status: PASSED");
    };
}
