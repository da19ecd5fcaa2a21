//! courier-relay: outbox relay process
//!
//! Polls the outbox table and publishes pending events to RabbitMQ.
//!
//! ## Architecture
//! ```text
//! [outbox_events table] --(poll)--> [courier-relay] --(AMQP)--> [account.events exchange]
//! ```
//!
//! ## Configuration
//! - COURIER_CONFIG: Path to a YAML config file (optional)
//! - COURIER__<SECTION>__<KEY>: Overrides, e.g. COURIER__OUTBOX__POLL_INTERVAL_MS
//! - COURIER_LOG: Tracing filter (default: info)
//!
//! ## Deployment
//! Run exactly one relay per outbox table. Relays do not coordinate, so two
//! of them can select and deliver the same pending record.

use std::sync::Arc;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use tracing::info;

use courier::bus::{init_broker, OutboxDelivery, ResilientBrokerClient};
use courier::config::{Config, StorageType};
#[cfg(any(feature = "sqlite", feature = "postgres"))]
use courier::outbox::{OutboxConfig, OutboxProcessor};
#[cfg(any(feature = "sqlite", feature = "postgres"))]
use courier::storage::OutboxStore;
use courier::utils::bootstrap::init_tracing;
use courier::utils::metrics::OutboxMetrics;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;

    let broker = init_broker(&config.messaging)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    let delivery: Arc<dyn OutboxDelivery> = Arc::new(ResilientBrokerClient::new(
        broker,
        config.messaging.amqp.exchange.clone(),
        config.resilience.retry.clone(),
        config.resilience.circuit_breaker.clone(),
    ));
    let metrics = Arc::new(OutboxMetrics::new());

    match config.storage.storage_type {
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let pool = sqlx::SqlitePool::connect(&config.storage.sqlite.url).await?;
                let store = courier::storage::SqliteOutboxStore::new(pool);
                store.init().await?;
                info!(storage_type = "sqlite", "Outbox store initialized");
                run(Arc::new(store), delivery, metrics, &config.outbox).await
            }

            #[cfg(not(feature = "sqlite"))]
            {
                Err("SQLite support requires the 'sqlite' feature".into())
            }
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.storage.postgres.max_connections)
                    .connect(&config.storage.postgres.uri)
                    .await?;
                let store = courier::storage::PostgresOutboxStore::new(pool);
                store.init().await?;
                info!(storage_type = "postgres", "Outbox store initialized");
                run(Arc::new(store), delivery, metrics, &config.outbox).await
            }

            #[cfg(not(feature = "postgres"))]
            {
                Err("PostgreSQL support requires the 'postgres' feature".into())
            }
        }
    }
}

/// Run the poll loop until Ctrl-C.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
async fn run<S: OutboxStore + 'static>(
    store: Arc<S>,
    delivery: Arc<dyn OutboxDelivery>,
    metrics: Arc<OutboxMetrics>,
    config: &OutboxConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let processor = Arc::new(
        OutboxProcessor::new(store, delivery, Arc::clone(&metrics))
            .with_batch_size(config.batch_size),
    );
    let handle = processor.spawn(config.poll_interval());

    info!(
        poll_interval_ms = config.poll_interval_ms,
        batch_size = config.batch_size,
        "courier-relay started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown().await?;

    let totals = metrics.snapshot();
    info!(
        published = totals.published,
        failed = totals.failed,
        "courier-relay stopped"
    );
    Ok(())
}
