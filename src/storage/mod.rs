//! Outbox storage.
//!
//! This module contains:
//! - `OutboxRecord`: the durable row describing one event awaiting delivery
//! - `OutboxStore` trait: transactional persistence for outbox records
//! - Implementations: SQLite, PostgreSQL, Mock
//!
//! Every store operation runs inside a caller-owned transaction (`Self::Tx`).
//! The publisher writes through the same transaction as the business change
//! that raised the event, so either both commit or neither does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::event::DomainEvent;

pub mod mock;
pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockOutboxStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresOutboxStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteOutboxStore;

/// Maximum stored length (in characters) of a delivery error message.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Default number of records fetched per poll.
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ============================================================================
// Errors
// ============================================================================

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while reading or writing the outbox.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Outbox record already exists: event_id={event_id}")]
    Duplicate { event_id: String },

    #[error("Invalid outbox status: {0}")]
    InvalidStatus(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Injected storage failure: {0}")]
    Injected(String),
}

// ============================================================================
// Model
// ============================================================================

/// Delivery status of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(StorageError::InvalidStatus(other.to_string())),
        }
    }
}

/// Durable record of one event and its delivery state.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub event_id: String,
    pub aggregate_id: String,
    pub event_type: String,
    /// Serialized snapshot of the event.
    pub payload: String,
    pub occurred_on: DateTime<Utc>,
    pub status: OutboxStatus,
    /// Set only when `status` is `Sent`.
    pub sent_at: Option<DateTime<Utc>>,
    /// Set only when `status` is `Failed`.
    pub error_message: Option<String>,
}

impl OutboxRecord {
    /// Snapshot an event into a new `Pending` record.
    pub fn pending(event: &DomainEvent) -> serde_json::Result<Self> {
        Ok(Self {
            event_id: event.event_id().to_string(),
            aggregate_id: event.aggregate_id().to_string(),
            event_type: event.event_type().to_string(),
            payload: event.to_payload()?,
            occurred_on: event.occurred_on(),
            status: OutboxStatus::Pending,
            sent_at: None,
            error_message: None,
        })
    }

    /// Apply a status change in place.
    pub fn apply(&mut self, change: &StatusChange) {
        self.status = change.status();
        self.sent_at = change.sent_at();
        self.error_message = change.error_message().map(str::to_string);
    }
}

/// Terminal outcome of a delivery attempt.
///
/// Carrying the timestamp or message inside the variant keeps `sent_at`
/// and `error_message` consistent with the status they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Sent { sent_at: DateTime<Utc> },
    Failed { error_message: String },
}

impl StatusChange {
    pub fn sent(sent_at: DateTime<Utc>) -> Self {
        StatusChange::Sent { sent_at }
    }

    /// Failed outcome; the message is truncated to `MAX_ERROR_MESSAGE_LEN`.
    pub fn failed(message: &str) -> Self {
        StatusChange::Failed {
            error_message: truncate_error(message).to_string(),
        }
    }

    pub fn status(&self) -> OutboxStatus {
        match self {
            StatusChange::Sent { .. } => OutboxStatus::Sent,
            StatusChange::Failed { .. } => OutboxStatus::Failed,
        }
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self {
            StatusChange::Sent { sent_at } => Some(*sent_at),
            StatusChange::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            StatusChange::Sent { .. } => None,
            StatusChange::Failed { error_message } => Some(error_message),
        }
    }
}

/// Cut a message down to at most `MAX_ERROR_MESSAGE_LEN` characters.
pub fn truncate_error(message: &str) -> &str {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_LEN) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

// ============================================================================
// Trait
// ============================================================================

/// Transactional persistence for outbox records.
///
/// Implementations:
/// - `SqliteOutboxStore`: SQLite via sqlx
/// - `PostgresOutboxStore`: PostgreSQL via sqlx
/// - `MockOutboxStore`: In-memory store for testing
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Transaction handle shared with the caller's business writes.
    ///
    /// Dropping a transaction without committing rolls it back.
    type Tx: Send;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Commit a transaction.
    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction explicitly.
    async fn rollback(&self, tx: Self::Tx) -> Result<()>;

    /// Persist a new `Pending` record.
    ///
    /// Fails with `StorageError::Duplicate` if the event id already exists.
    async fn save(&self, tx: &mut Self::Tx, record: &OutboxRecord) -> Result<()>;

    /// Up to `limit` pending records, oldest `occurred_on` first.
    async fn find_pending(&self, tx: &mut Self::Tx, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// Record a delivery outcome. No-op if the record does not exist.
    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        event_id: &str,
        change: &StatusChange,
    ) -> Result<()>;

    /// Look up a single record.
    async fn get(&self, tx: &mut Self::Tx, event_id: &str) -> Result<Option<OutboxRecord>>;

    /// Number of records currently in `status`.
    async fn count_by_status(&self, tx: &mut Self::Tx, status: OutboxStatus) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AccountCreated;

    #[test]
    fn test_truncate_error_short_message_unchanged() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn test_truncate_error_exactly_limit() {
        let message = "x".repeat(MAX_ERROR_MESSAGE_LEN + 250);
        let truncated = truncate_error(&message);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        let message = "é".repeat(MAX_ERROR_MESSAGE_LEN + 1);
        let truncated = truncate_error(&message);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [OutboxStatus::Pending, OutboxStatus::Sent, OutboxStatus::Failed] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("LOST".parse::<OutboxStatus>().is_err());
    }

    #[test]
    fn test_pending_record_from_event() {
        let event = AccountCreated::event("a1", "Ada", "ada@example.com", "123");
        let record = OutboxRecord::pending(&event).unwrap();

        assert_eq!(record.event_id, event.event_id());
        assert_eq!(record.aggregate_id, "a1");
        assert_eq!(record.event_type, "account.created");
        assert_eq!(record.status, OutboxStatus::Pending);
        assert!(record.sent_at.is_none());
        assert!(record.error_message.is_none());
        assert_eq!(DomainEvent::from_payload(&record.payload).unwrap(), event);
    }

    #[test]
    fn test_apply_sent_clears_error() {
        let event = AccountCreated::event("a1", "Ada", "ada@example.com", "123");
        let mut record = OutboxRecord::pending(&event).unwrap();
        record.error_message = Some("earlier failure".to_string());

        record.apply(&StatusChange::sent(Utc::now()));

        assert_eq!(record.status, OutboxStatus::Sent);
        assert!(record.sent_at.is_some());
        assert!(record.error_message.is_none());
    }

    #[test]
    fn test_failed_change_truncates() {
        let change = StatusChange::failed(&"e".repeat(900));
        assert_eq!(change.status(), OutboxStatus::Failed);
        assert_eq!(change.error_message().unwrap().len(), MAX_ERROR_MESSAGE_LEN);
        assert!(change.sent_at().is_none());
    }
}
