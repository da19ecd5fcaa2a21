//! Outbox write path.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::dispatch::{EventDispatcher, HandlerError};
use crate::event::DomainEvent;
use crate::storage::{OutboxRecord, OutboxStore, StorageError};

/// Errors from publishing an event.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The event could not be encoded. Retrying will not help.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Records events in the outbox and notifies local handlers.
///
/// `publish` writes through the caller's transaction. Any error means the
/// caller should roll that transaction back, business changes included.
pub struct OutboxPublisher<S: OutboxStore> {
    store: Arc<S>,
    dispatcher: Arc<EventDispatcher>,
}

impl<S: OutboxStore> Clone for OutboxPublisher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<S: OutboxStore> OutboxPublisher<S> {
    pub fn new(store: Arc<S>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Store `event` as a pending record, then dispatch it locally.
    ///
    /// Handlers run before the transaction commits and before any broker
    /// delivery.
    pub async fn publish(&self, tx: &mut S::Tx, event: &DomainEvent) -> Result<(), PublishError> {
        let record = OutboxRecord::pending(event)?;
        self.store.save(tx, &record).await?;

        debug!(
            event_id = %event.event_id(),
            event_type = event.event_type(),
            aggregate_id = %event.aggregate_id(),
            "Event stored in outbox"
        );

        self.dispatcher.dispatch(event)?;
        Ok(())
    }

    /// Publish each event in order. The first failure stops the batch.
    pub async fn publish_all(
        &self,
        tx: &mut S::Tx,
        events: &[DomainEvent],
    ) -> Result<(), PublishError> {
        for event in events {
            self.publish(tx, event).await?;
        }
        Ok(())
    }

    /// Publish in a transaction of its own, committing on success.
    pub async fn publish_committed(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let mut tx = self.store.begin().await?;
        match self.publish(&mut tx, event).await {
            Ok(()) => {
                self.store.commit(tx).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.store.rollback(tx).await {
                    warn!(
                        event_id = %event.event_id(),
                        error = %rollback,
                        "Rollback after failed publish also failed"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::BoxError;
    use crate::event::{AccountCreated, EventKind};
    use crate::storage::{MockOutboxStore, OutboxStatus};

    fn sample(aggregate: &str) -> DomainEvent {
        AccountCreated::event(aggregate, "Ada", "ada@example.com", "123")
    }

    fn publisher(dispatcher: EventDispatcher) -> OutboxPublisher<MockOutboxStore> {
        OutboxPublisher::new(Arc::new(MockOutboxStore::new()), Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn test_publish_stores_one_pending_record() {
        let publisher = publisher(EventDispatcher::builder().build());
        let event = sample("a1");

        publisher.publish_committed(&event).await.unwrap();

        let records = publisher.store().records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, event.event_id());
        assert_eq!(records[0].status, OutboxStatus::Pending);
        assert_eq!(DomainEvent::from_payload(&records[0].payload).unwrap(), event);
    }

    #[tokio::test]
    async fn test_publish_dispatches_before_commit() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let dispatcher = {
            let seen = Arc::clone(&seen);
            EventDispatcher::builder()
                .register_fn(EventKind::Any, "recorder", move |e: &DomainEvent| {
                    seen.lock().unwrap().push(e.event_id().to_string());
                    Ok(())
                })
                .build()
        };
        let publisher = publisher(dispatcher);
        let event = sample("a1");

        let mut tx = publisher.store().begin().await.unwrap();
        publisher.publish(&mut tx, &event).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![event.event_id().to_string()]);
        assert!(publisher.store().records().await.is_empty());
    }

    #[tokio::test]
    async fn test_handler_failure_rolls_back_record() {
        let dispatcher = EventDispatcher::builder()
            .register_fn(EventKind::AccountCreated, "broken", |_| {
                Err(BoxError::from("handler exploded"))
            })
            .build();
        let publisher = publisher(dispatcher);

        let err = publisher.publish_committed(&sample("a1")).await.unwrap_err();

        assert!(matches!(err, PublishError::Handler(ref h) if h.handler == "broken"));
        assert!(publisher.store().records().await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_dispatch() {
        let dispatched = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let dispatcher = {
            let dispatched = Arc::clone(&dispatched);
            EventDispatcher::builder()
                .register_fn(EventKind::Any, "flag", move |_| {
                    dispatched.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                })
                .build()
        };
        let publisher = publisher(dispatcher);
        publisher.store().set_fail_on_save(true).await;

        let err = publisher.publish_committed(&sample("a1")).await.unwrap_err();

        assert!(matches!(err, PublishError::Persistence(_)));
        assert!(!dispatched.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_duplicate_event_is_persistence_error() {
        let publisher = publisher(EventDispatcher::builder().build());
        let event = sample("a1");
        publisher.publish_committed(&event).await.unwrap();

        let err = publisher.publish_committed(&event).await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::Persistence(StorageError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_all_stops_at_first_failure() {
        let dispatcher = EventDispatcher::builder()
            .register_fn(EventKind::Any, "reject-a2", |e: &DomainEvent| {
                if e.aggregate_id() == "a2" {
                    Err(BoxError::from("a2 rejected"))
                } else {
                    Ok(())
                }
            })
            .build();
        let publisher = publisher(dispatcher);
        let events = vec![sample("a1"), sample("a2"), sample("a3")];

        let mut tx = publisher.store().begin().await.unwrap();
        let result = publisher.publish_all(&mut tx, &events).await;

        assert!(result.is_err());
        assert_eq!(tx.staged_len(), 2);
    }

    #[tokio::test]
    async fn test_publish_all_in_order() {
        let publisher = publisher(EventDispatcher::builder().build());
        let events = vec![sample("a1"), sample("a2")];

        let mut tx = publisher.store().begin().await.unwrap();
        publisher.publish_all(&mut tx, &events).await.unwrap();
        publisher.store().commit(tx).await.unwrap();

        let mut tx = publisher.store().begin().await.unwrap();
        let count = publisher
            .store()
            .count_by_status(&mut tx, OutboxStatus::Pending)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
