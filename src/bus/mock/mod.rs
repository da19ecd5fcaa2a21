//! Mock broker implementation for testing.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Broker, BrokerError, Result};

/// A message accepted by the mock broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: String,
}

/// Mock broker for testing.
///
/// Failures can be forced for every send, for the next N sends, or for
/// payloads containing a given fragment.
#[derive(Default)]
pub struct MockBroker {
    sent: RwLock<Vec<SentMessage>>,
    fail_on_send: RwLock<bool>,
    fail_next: RwLock<usize>,
    fail_payloads: RwLock<Vec<String>>,
    attempts: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_send(&self, fail: bool) {
        *self.fail_on_send.write().await = fail;
    }

    /// Fail the next `count` sends, then succeed.
    pub async fn fail_next(&self, count: usize) {
        *self.fail_next.write().await = count;
    }

    /// Fail every send whose payload contains `fragment`.
    pub async fn fail_payloads_containing(&self, fragment: impl Into<String>) {
        self.fail_payloads.write().await.push(fragment.into());
    }

    /// Number of `send` calls, successful or not.
    pub fn send_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Messages accepted so far.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().await.clone()
    }

    async fn should_fail(&self, payload: &str) -> bool {
        if *self.fail_on_send.read().await {
            return true;
        }
        {
            let mut remaining = self.fail_next.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        self.fail_payloads
            .read()
            .await
            .iter()
            .any(|fragment| payload.contains(fragment.as_str()))
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn send(&self, exchange: &str, routing_key: &str, payload: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(payload).await {
            return Err(BrokerError::Publish("Mock send failure".to_string()));
        }
        self.sent.write().await.push(SentMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}
