//! Delivery counters.
//!
//! `OutboxMetrics` keeps in-process atomic counts that tests and the relay
//! binary can read back. With the `otel` feature every increment is also
//! recorded on an OpenTelemetry counter; names follow OTel semantic
//! conventions (dot-separated).

use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "otel")]
mod instruments {
    use std::sync::LazyLock;

    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Meter};

    static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("courier"));

    /// Outbox records delivered to the broker.
    pub static OUTBOX_PUBLISHED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("courier.outbox.published.total")
            .with_description("Outbox records delivered to the broker")
            .build()
    });

    /// Outbox records marked FAILED.
    pub static OUTBOX_FAILED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("courier.outbox.failed.total")
            .with_description("Outbox records that failed delivery")
            .build()
    });

    /// Account-created events observed by local handlers.
    pub static ACCOUNTS_CREATED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("courier.accounts.created.total")
            .with_description("Accounts created")
            .build()
    });
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub failed: u64,
    pub accounts_created: u64,
}

/// Counters shared by the processor and local handlers.
#[derive(Debug, Default)]
pub struct OutboxMetrics {
    published: AtomicU64,
    failed: AtomicU64,
    accounts_created: AtomicU64,
}

impl OutboxMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        instruments::OUTBOX_PUBLISHED_TOTAL.add(1, &[]);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        instruments::OUTBOX_FAILED_TOTAL.add(1, &[]);
    }

    pub fn record_account_created(&self) {
        self.accounts_created.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        instruments::ACCOUNTS_CREATED_TOTAL.add(1, &[]);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            accounts_created: self.accounts_created.load(Ordering::Relaxed),
        }
    }
}
