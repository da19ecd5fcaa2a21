//! Courier - transactional outbox relay
//!
//! Events raised by a business transaction are written to an outbox table in
//! that same transaction, handed to in-process handlers, and later relayed to
//! a message broker by a polling processor guarded by retry and circuit
//! breaker policies.
//!
//! ```text
//! business tx ─► OutboxPublisher ─► OutboxStore (PENDING) + EventDispatcher
//!                                        │
//!                          OutboxProcessor (timer)
//!                                        │
//!                      ResilientBrokerClient ─► Broker
//! ```

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod outbox;
pub mod resilience;
pub mod storage;
pub mod utils;
