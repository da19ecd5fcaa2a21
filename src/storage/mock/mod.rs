//! Mock storage implementations for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{OutboxRecord, OutboxStatus, OutboxStore, Result, StatusChange, StorageError};

/// A write staged inside a mock transaction.
#[derive(Debug, Clone)]
enum StagedWrite {
    Insert(OutboxRecord),
    Update { event_id: String, change: StatusChange },
}

/// Transaction for `MockOutboxStore`: writes are buffered until commit.
#[derive(Debug, Default)]
pub struct MockTx {
    staged: Vec<StagedWrite>,
}

impl MockTx {
    /// Number of writes waiting for commit.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}

/// Mock outbox store that keeps records in memory.
///
/// Reads inside a transaction see committed records plus that transaction's
/// own staged writes. Dropping a `MockTx` discards its writes.
#[derive(Default)]
pub struct MockOutboxStore {
    records: RwLock<HashMap<String, OutboxRecord>>,
    fail_on_save: RwLock<bool>,
    fail_on_find: RwLock<bool>,
}

impl MockOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_save(&self, fail: bool) {
        *self.fail_on_save.write().await = fail;
    }

    pub async fn set_fail_on_find(&self, fail: bool) {
        *self.fail_on_find.write().await = fail;
    }

    /// Committed records, in no particular order.
    pub async fn records(&self) -> Vec<OutboxRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// A committed record by id.
    pub async fn record(&self, event_id: &str) -> Option<OutboxRecord> {
        self.records.read().await.get(event_id).cloned()
    }

    /// Committed state overlaid with the transaction's staged writes.
    async fn view(&self, tx: &MockTx) -> HashMap<String, OutboxRecord> {
        let mut view = self.records.read().await.clone();
        apply_staged(&mut view, &tx.staged);
        view
    }
}

fn apply_staged(records: &mut HashMap<String, OutboxRecord>, staged: &[StagedWrite]) {
    for write in staged {
        match write {
            StagedWrite::Insert(record) => {
                records
                    .entry(record.event_id.clone())
                    .or_insert_with(|| record.clone());
            }
            StagedWrite::Update { event_id, change } => {
                if let Some(record) = records.get_mut(event_id) {
                    record.apply(change);
                }
            }
        }
    }
}

#[async_trait]
impl OutboxStore for MockOutboxStore {
    type Tx = MockTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(MockTx::default())
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        let mut records = self.records.write().await;
        for write in &tx.staged {
            if let StagedWrite::Insert(record) = write {
                if records.contains_key(&record.event_id) {
                    return Err(StorageError::Duplicate {
                        event_id: record.event_id.clone(),
                    });
                }
            }
        }
        apply_staged(&mut records, &tx.staged);
        Ok(())
    }

    async fn rollback(&self, _tx: Self::Tx) -> Result<()> {
        Ok(())
    }

    async fn save(&self, tx: &mut Self::Tx, record: &OutboxRecord) -> Result<()> {
        if *self.fail_on_save.read().await {
            return Err(StorageError::Injected("save".to_string()));
        }
        if self.view(tx).await.contains_key(&record.event_id) {
            return Err(StorageError::Duplicate {
                event_id: record.event_id.clone(),
            });
        }
        tx.staged.push(StagedWrite::Insert(record.clone()));
        Ok(())
    }

    async fn find_pending(&self, tx: &mut Self::Tx, limit: usize) -> Result<Vec<OutboxRecord>> {
        if *self.fail_on_find.read().await {
            return Err(StorageError::Injected("find_pending".to_string()));
        }
        let mut pending: Vec<OutboxRecord> = self
            .view(tx)
            .await
            .into_values()
            .filter(|r| r.status == OutboxStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            a.occurred_on
                .cmp(&b.occurred_on)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        event_id: &str,
        change: &StatusChange,
    ) -> Result<()> {
        tx.staged.push(StagedWrite::Update {
            event_id: event_id.to_string(),
            change: change.clone(),
        });
        Ok(())
    }

    async fn get(&self, tx: &mut Self::Tx, event_id: &str) -> Result<Option<OutboxRecord>> {
        Ok(self.view(tx).await.remove(event_id))
    }

    async fn count_by_status(&self, tx: &mut Self::Tx, status: OutboxStatus) -> Result<u64> {
        Ok(self
            .view(tx)
            .await
            .values()
            .filter(|r| r.status == status)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests;
