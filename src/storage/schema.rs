//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::{ColumnDef, Index, IndexCreateStatement, Iden, Table, TableCreateStatement};

/// Outbox table schema.
#[derive(Iden, Clone, Copy)]
pub enum OutboxEvents {
    Table,
    #[iden = "event_id"]
    EventId,
    #[iden = "aggregate_id"]
    AggregateId,
    #[iden = "event_type"]
    EventType,
    #[iden = "payload"]
    Payload,
    #[iden = "occurred_on"]
    OccurredOn,
    #[iden = "status"]
    Status,
    #[iden = "sent_at"]
    SentAt,
    #[iden = "error_message"]
    ErrorMessage,
}

/// Every column, in the order row decoders expect.
pub const ALL_COLUMNS: [OutboxEvents; 8] = [
    OutboxEvents::EventId,
    OutboxEvents::AggregateId,
    OutboxEvents::EventType,
    OutboxEvents::Payload,
    OutboxEvents::OccurredOn,
    OutboxEvents::Status,
    OutboxEvents::SentAt,
    OutboxEvents::ErrorMessage,
];

/// `CREATE TABLE outbox_events`, with the timestamp column type supplied by
/// the backend.
pub fn create_table(timestamp: fn(&mut ColumnDef) -> &mut ColumnDef) -> TableCreateStatement {
    Table::create()
        .table(OutboxEvents::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(OutboxEvents::EventId)
                .string_len(36)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(OutboxEvents::AggregateId).string_len(36).not_null())
        .col(ColumnDef::new(OutboxEvents::EventType).string_len(120).not_null())
        .col(ColumnDef::new(OutboxEvents::Payload).text().not_null())
        .col(timestamp(&mut ColumnDef::new(OutboxEvents::OccurredOn)).not_null())
        .col(ColumnDef::new(OutboxEvents::Status).string_len(30).not_null())
        .col(timestamp(&mut ColumnDef::new(OutboxEvents::SentAt)))
        .col(ColumnDef::new(OutboxEvents::ErrorMessage).string_len(500))
        .to_owned()
}

/// Index backing the pending-records poll query.
pub fn create_pending_index() -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name("idx_outbox_events_status_occurred_on")
        .table(OutboxEvents::Table)
        .col(OutboxEvents::Status)
        .col(OutboxEvents::OccurredOn)
        .to_owned()
}
