//! Transactional outbox.
//!
//! The write path and the relay path of the outbox:
//! - `OutboxPublisher`: stores an event as a `Pending` record inside the
//!   caller's transaction and runs local handlers
//! - `OutboxProcessor`: polls pending records on a timer and hands each one
//!   to an `OutboxDelivery`, recording `Sent` or `Failed`
//!
//! Delivery is at-least-once. A crash between a successful broker send and
//! the end-of-cycle commit leaves the record `Pending`, and the next cycle
//! sends it again.

pub mod processor;
pub mod publisher;

pub use processor::{CycleReport, OutboxProcessor, ProcessorError, ProcessorHandle};
pub use publisher::{OutboxPublisher, PublishError};

use std::time::Duration;

use serde::Deserialize;

use crate::storage::DEFAULT_BATCH_SIZE;

/// Poller settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Delay between the end of one cycle and the start of the next.
    pub poll_interval_ms: u64,
    /// Records fetched per cycle.
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_config_default() {
        let config = OutboxConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.batch_size, 100);
    }
}
