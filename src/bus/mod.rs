//! Broker delivery.
//!
//! This module contains:
//! - `Broker` trait: raw publish to an external message broker
//! - `OutboxDelivery` trait: delivery of one outbox record
//! - `ResilientBrokerClient`: `OutboxDelivery` over a `Broker`, guarded by
//!   retry and circuit-breaker policies
//! - Messaging configuration and the broker factory
//! - Implementations: AMQP (RabbitMQ), Mock

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use tracing::{debug, info};

use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, PolicyChain, RetryConfig, RetryPolicy,
};
use crate::storage::OutboxRecord;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use mock::MockBroker;

/// Routing key used when a record carries no event type.
pub const UNKNOWN_ROUTING_KEY: &str = "unknown.event";

/// Exchange events are published to unless configured otherwise.
pub const DEFAULT_EXCHANGE: &str = "account.events";

/// Queue receiving `account.created` events unless configured otherwise.
pub const DEFAULT_QUEUE: &str = "account.created";

/// Name of the breaker guarding broker calls.
pub const BROKER_BREAKER_NAME: &str = "broker";

// ============================================================================
// Traits
// ============================================================================

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised by a broker implementation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Raw message publishing.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via AMQP
/// - `MockBroker`: In-memory mock for testing
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` to `exchange` under `routing_key`.
    async fn send(&self, exchange: &str, routing_key: &str, payload: &str) -> Result<()>;
}

/// Delivery of a record failed for good.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Retries were exhausted or the circuit breaker refused the call.
    #[error("Broker unavailable for event {event_id}: {reason}")]
    BrokerUnavailable { event_id: String, reason: String },
}

/// Delivers one outbox record to the outside world.
#[async_trait]
pub trait OutboxDelivery: Send + Sync {
    async fn deliver(&self, record: &OutboxRecord) -> std::result::Result<(), DeliveryError>;
}

/// Routing key for an event type, falling back to `unknown.event`.
pub fn routing_key_for(event_type: &str) -> &str {
    if event_type.trim().is_empty() {
        UNKNOWN_ROUTING_KEY
    } else {
        event_type
    }
}

// ============================================================================
// Resilient client
// ============================================================================

/// Broker client that runs every send through retry (outer) and a circuit
/// breaker (inner).
pub struct ResilientBrokerClient {
    broker: Arc<dyn Broker>,
    exchange: String,
    breaker: Arc<CircuitBreaker>,
    chain: PolicyChain<BrokerError>,
}

impl ResilientBrokerClient {
    pub fn new(
        broker: Arc<dyn Broker>,
        exchange: impl Into<String>,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(BROKER_BREAKER_NAME, breaker));
        let chain = PolicyChain::<BrokerError>::new()
            .with(Arc::new(RetryPolicy::new(retry)))
            .with(breaker.clone());

        Self {
            broker,
            exchange: exchange.into(),
            breaker,
            chain,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }
}

#[async_trait]
impl OutboxDelivery for ResilientBrokerClient {
    async fn deliver(&self, record: &OutboxRecord) -> std::result::Result<(), DeliveryError> {
        let routing_key: Arc<str> = Arc::from(routing_key_for(&record.event_type));
        let exchange: Arc<str> = Arc::from(self.exchange.as_str());
        let payload: Arc<str> = Arc::from(record.payload.as_str());
        let broker = Arc::clone(&self.broker);

        let send = {
            let routing_key = Arc::clone(&routing_key);
            move || -> BoxFuture<'static, Result<()>> {
                let broker = Arc::clone(&broker);
                let exchange = Arc::clone(&exchange);
                let routing_key = Arc::clone(&routing_key);
                let payload = Arc::clone(&payload);
                async move { broker.send(&exchange, &routing_key, &payload).await }.boxed()
            }
        };

        self.chain
            .execute(&send)
            .await
            .map_err(|e| DeliveryError::BrokerUnavailable {
                event_id: record.event_id.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            event_id = %record.event_id,
            exchange = %self.exchange,
            routing_key = %routing_key,
            "Delivered outbox record"
        );
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// AMQP-specific configuration.
    pub amqp: AmqpBusConfig,
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpBusConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Direct exchange events are published to.
    pub exchange: String,
    /// Durable queue bound to the exchange for `account.created` events.
    /// Empty skips the declaration.
    pub queue: String,
}

impl Default for AmqpBusConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            queue: DEFAULT_QUEUE.to_string(),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Connect the broker described by `config`.
///
/// Requires the `amqp` feature.
pub async fn init_broker(
    config: &MessagingConfig,
) -> std::result::Result<Arc<dyn Broker>, Box<dyn std::error::Error + Send + Sync>> {
    #[cfg(feature = "amqp")]
    {
        let broker = AmqpBroker::new(&config.amqp).await?;
        info!(messaging_type = "amqp", "Broker initialized");
        Ok(Arc::new(broker))
    }

    #[cfg(not(feature = "amqp"))]
    {
        let _ = config;
        info!(messaging_type = "amqp", "Broker unavailable in this build");
        Err("AMQP support requires the 'amqp' feature. Rebuild with --features amqp".into())
    }
}
