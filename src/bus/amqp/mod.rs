//! AMQP (RabbitMQ) broker implementation.
//!
//! Publishes to a durable direct exchange; the routing key is the event type.
//! At connect time the exchange is declared and the configured durable queue
//! is bound to it under `account.created`, so account events are routable on
//! a fresh broker. Messages are persistent JSON and every publish waits for
//! the broker's confirm.

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use tracing::{debug, info};

use super::{AmqpBusConfig, Broker, BrokerError, Result};
use crate::event::ACCOUNT_CREATED;

/// AMQP broker using RabbitMQ.
pub struct AmqpBroker {
    pool: Pool,
    exchange: String,
}

impl AmqpBroker {
    /// Connect, declare the configured exchange and bind the queue.
    pub async fn new(config: &AmqpBusConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| BrokerError::Connection(format!("Failed to create pool: {}", e)))?;

        let broker = Self {
            pool,
            exchange: config.exchange.clone(),
        };

        // Verify connection
        let channel = broker.get_channel().await?;
        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to declare exchange: {}", e)))?;

        if !config.queue.is_empty() {
            channel
                .queue_declare(
                    &config.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Connection(format!("Failed to declare queue: {}", e)))?;

            channel
                .queue_bind(
                    &config.queue,
                    &config.exchange,
                    ACCOUNT_CREATED,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Connection(format!("Failed to bind queue: {}", e)))?;
        }

        info!(
            exchange = %config.exchange,
            queue = %config.queue,
            url = %config.url,
            "Connected to AMQP"
        );

        Ok(broker)
    }

    /// The exchange declared at connect time.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Get a channel from the pool with publisher confirms enabled.
    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BrokerError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to enable confirms: {}", e)))?;

        Ok(channel)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn send(&self, exchange: &str, routing_key: &str, payload: &str) -> Result<()> {
        let channel = self.get_channel().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(format!("Failed to publish: {}", e)))?;

        let confirmation = confirm
            .await
            .map_err(|e| BrokerError::Publish(format!("Publish confirmation failed: {}", e)))?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish(format!(
                "Broker rejected message for routing key {}",
                routing_key
            )));
        }

        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            "Published message"
        );
        Ok(())
    }
}
