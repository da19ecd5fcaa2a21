//! PostgreSQL OutboxStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::{ColumnDef, Expr, Order, PostgresQueryBuilder, Query};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

use crate::storage::schema::{self, OutboxEvents, ALL_COLUMNS};
use crate::storage::{
    OutboxRecord, OutboxStatus, OutboxStore, Result, StatusChange, StorageError,
};

/// PostgreSQL implementation of OutboxStore.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Create a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Initialize the outbox table schema.
    pub async fn init(&self) -> Result<()> {
        let create_table = schema::create_table(ColumnDef::timestamp_with_time_zone)
            .to_string(PostgresQueryBuilder);
        sqlx::query(&create_table).execute(&self.pool).await?;

        let create_index = schema::create_pending_index().to_string(PostgresQueryBuilder);
        sqlx::query(&create_index).execute(&self.pool).await?;

        info!("Outbox table initialized (PostgreSQL)");
        Ok(())
    }
}

// Inlined as literals; PostgreSQL casts them to TIMESTAMPTZ on write.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_row(row: &PgRow) -> Result<OutboxRecord> {
    let status: String = row.try_get("status")?;

    Ok(OutboxRecord {
        event_id: row.try_get("event_id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        occurred_on: row.try_get("occurred_on")?,
        status: status.parse()?,
        sent_at: row.try_get("sent_at")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    type Tx = Transaction<'static, Postgres>;

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
            .to_string(PostgresQueryBuilder);

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
            .to_string(PostgresQueryBuilder);

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
            .to_string(PostgresQueryBuilder);

        sqlx::query(&query).execute(&mut **tx).await?;
        Ok(())
    }

    async fn get(&self, tx: &mut Self::Tx, event_id: &str) -> Result<Option<OutboxRecord>> {
        let query = Query::select()
            .columns(ALL_COLUMNS)
            .from(OutboxEvents::Table)
            .and_where(Expr::col(OutboxEvents::EventId).eq(event_id))
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut **tx).await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn count_by_status(&self, tx: &mut Self::Tx, status: OutboxStatus) -> Result<u64> {
        let query = Query::select()
            .expr(Expr::col(OutboxEvents::EventId).count())
            .from(OutboxEvents::Table)
            .and_where(Expr::col(OutboxEvents::Status).eq(status.as_str()))
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&mut **tx).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }
}
