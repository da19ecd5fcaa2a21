//! Fixed-delay retry.

use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ConstantBuilder};
use serde::Deserialize;
use tracing::warn;

use super::{Next, Policy, PolicyError};

/// Retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait between attempts in milliseconds.
    pub wait_duration_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_duration_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.wait_duration_ms)
    }
}

/// Re-runs the inner chain on every call error, waiting a fixed delay
/// between attempts. An open circuit ends the loop at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delays between attempts; one fewer than `max_attempts`.
    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.config.wait_duration())
            .with_max_times(self.config.max_attempts.saturating_sub(1) as usize)
    }
}

#[async_trait]
impl<E> Policy<E> for RetryPolicy
where
    E: std::fmt::Display + Send + 'static,
{
    fn name(&self) -> &str {
        "retry"
    }

    async fn execute(&self, next: Next<'_, E>) -> Result<(), PolicyError<E>> {
        let mut delays = self.backoff().build();
        let mut attempt = 1;

        loop {
            match next.run().await {
                Ok(()) => return Ok(()),
                Err(PolicyError::Call(e)) => match delays.next() {
                    Some(delay) => {
                        warn!(
                            attempt,
                            max_attempts = self.config.max_attempts,
                            error = %e,
                            "Call failed, retrying..."
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(PolicyError::Call(e)),
                },
                Err(open) => return Err(open),
            }
        }
    }
}
