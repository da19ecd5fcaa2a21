//! Built-in local handlers.

use std::sync::Arc;

use tracing::info;

use super::{BoxError, EventHandler};
use crate::event::{DomainEvent, EventBody};
use crate::utils::metrics::OutboxMetrics;

/// Logs every new account and counts it.
pub struct AccountCreatedLogHandler {
    metrics: Arc<OutboxMetrics>,
}

impl AccountCreatedLogHandler {
    pub fn new(metrics: Arc<OutboxMetrics>) -> Self {
        Self { metrics }
    }
}

impl EventHandler for AccountCreatedLogHandler {
    fn name(&self) -> &str {
        "account-created-log"
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), BoxError> {
        let EventBody::AccountCreated(account) = event.body();
        info!(
            account_id = %event.aggregate_id(),
            email = %account.email,
            "account created"
        );
        self.metrics.record_account_created();
        Ok(())
    }
}
