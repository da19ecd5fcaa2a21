//! SQLite OutboxStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::{ColumnDef, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::storage::schema::{self, OutboxEvents, ALL_COLUMNS};
use crate::storage::{
    OutboxRecord, OutboxStatus, OutboxStore, Result, StatusChange, StorageError,
};

/// SQLite implementation of OutboxStore.
///
/// Timestamps are stored as RFC 3339 text with a fixed number of fractional
/// digits and a `Z` suffix, so ordering by the column is chronological.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    pool: SqlitePool,
}

impl SqliteOutboxStore {
    /// Create a new SQLite outbox store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the outbox table schema.
    pub async fn init(&self) -> Result<()> {
        let create_table = schema::create_table(ColumnDef::text).to_string(SqliteQueryBuilder);
        sqlx::query(&create_table).execute(&self.pool).await?;

        let create_index = schema::create_pending_index().to_string(SqliteQueryBuilder);
        sqlx::query(&create_index).execute(&self.pool).await?;

        info!("Outbox table initialized (SQLite)");
        Ok(())
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", value, e)))
}

fn decode_row(row: &SqliteRow) -> Result<OutboxRecord> {
    let occurred_on: String = row.try_get("occurred_on")?;
    let status: String = row.try_get("status")?;
    let sent_at: Option<String> = row.try_get("sent_at")?;

    Ok(OutboxRecord {
        event_id: row.try_get("event_id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        occurred_on: parse_timestamp(&occurred_on)?,
        status: status.parse()?,
        sent_at: sent_at.as_deref().map(parse_timestamp).transpose()?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    type Tx = Transaction<'static, Sqlite>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        Ok(tx.rollback().await?)
    }

    async fn save(&self, tx: &mut Self::Tx, record: &OutboxRecord) -> Result<()> {
        let query = Query::insert()
            .into_table(OutboxEvents::Table)
            .columns(ALL_COLUMNS)
            .values_panic([
                record.event_id.clone().into(),
                record.aggregate_id.clone().into(),
                record.event_type.clone().into(),
                record.payload.clone().into(),
                format_timestamp(record.occurred_on).into(),
                record.status.as_str().into(),
                record.sent_at.map(format_timestamp).into(),
                record.error_message.clone().into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&mut **tx).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::Duplicate {
                    event_id: record.event_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_pending(&self, tx: &mut Self::Tx, limit: usize) -> Result<Vec<OutboxRecord>> {
        let query = Query::select()
            .columns(ALL_COLUMNS)
            .from(OutboxEvents::Table)
            .and_where(Expr::col(OutboxEvents::Status).eq(OutboxStatus::Pending.as_str()))
            .order_by(OutboxEvents::OccurredOn, Order::Asc)
            .order_by(OutboxEvents::EventId, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&mut **tx).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn update_status(
        &self,
        tx: &mut Self::Tx,
        event_id: &str,
        change: &StatusChange,
    ) -> Result<()> {
        let query = Query::update()
            .table(OutboxEvents::Table)
            .value(OutboxEvents::Status, change.status().as_str())
            .value(OutboxEvents::SentAt, change.sent_at().map(format_timestamp))
            .value(
                OutboxEvents::ErrorMessage,
                change.error_message().map(str::to_string),
            )
            .and_where(Expr::col(OutboxEvents::EventId).eq(event_id))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut **tx).await?;
        Ok(())
    }

    async fn get(&self, tx: &mut Self::Tx, event_id: &str) -> Result<Option<OutboxRecord>> {
        let query = Query::select()
            .columns(ALL_COLUMNS)
            .from(OutboxEvents::Table)
            .and_where(Expr::col(OutboxEvents::EventId).eq(event_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut **tx).await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn count_by_status(&self, tx: &mut Self::Tx, status: OutboxStatus) -> Result<u64> {
        let query = Query::select()
            .expr(Expr::col(OutboxEvents::EventId).count())
            .from(OutboxEvents::Table)
            .and_where(Expr::col(OutboxEvents::Status).eq(status.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&mut **tx).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }
}
