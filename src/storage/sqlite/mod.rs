//! SQLite implementations of storage interfaces.

mod outbox_store;

pub use outbox_store::SqliteOutboxStore;
