//! Outbox relay: polls pending records and delivers them.
//!
//! A cycle touches the store twice, each time in a short transaction:
//!
//! ```text
//! begin ─► find_pending(batch) ─► commit
//!          for each record: deliver (no transaction open)
//! begin ─► update_status for every outcome ─► commit
//! ```
//!
//! No transaction is held while the broker is called, so business writes
//! are never blocked by, and never invalidate, a cycle that is waiting on
//! retries. A failed delivery marks only that record `Failed`; the rest of
//! the batch continues. `Failed` is terminal: later cycles select `Pending`
//! only.
//!
//! The processor assumes it is the only poller for its store. Two processes
//! polling the same table can both pick up a record and deliver it twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bus::OutboxDelivery;
use crate::storage::{OutboxStore, StatusChange, StorageError, DEFAULT_BATCH_SIZE};
use crate::utils::metrics::OutboxMetrics;

/// Errors that stop a cycle as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("A poll cycle is already running")]
    CycleInProgress,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome counts of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Clears the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives pending outbox records to the broker.
pub struct OutboxProcessor<S: OutboxStore> {
    store: Arc<S>,
    delivery: Arc<dyn OutboxDelivery>,
    metrics: Arc<OutboxMetrics>,
    batch_size: usize,
    running: AtomicBool,
}

impl<S: OutboxStore> OutboxProcessor<S> {
    pub fn new(
        store: Arc<S>,
        delivery: Arc<dyn OutboxDelivery>,
        metrics: Arc<OutboxMetrics>,
    ) -> Self {
        Self {
            store,
            delivery,
            metrics,
            batch_size: DEFAULT_BATCH_SIZE,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run one poll cycle.
    ///
    /// Returns `CycleInProgress` without touching the store if another cycle
    /// has not finished yet. A storage error leaves every record as it was;
    /// if it happens after delivery, those records are delivered again.
    pub async fn poll_once(&self) -> Result<CycleReport, ProcessorError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProcessorError::CycleInProgress);
        }
        let _guard = CycleGuard(&self.running);

        self.run_cycle().await
    }

    async fn run_cycle(&self) -> Result<CycleReport, ProcessorError> {
        let records = {
            let mut tx = self.store.begin().await?;
            let records = self.store.find_pending(&mut tx, self.batch_size).await?;
            self.store.commit(tx).await?;
            records
        };

        let mut report = CycleReport {
            fetched: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let mut outcomes = Vec::with_capacity(records.len());
        for record in &records {
            let change = match self.delivery.deliver(record).await {
                Ok(()) => {
                    debug!(event_id = %record.event_id, "Outbox record sent");
                    self.metrics.record_published();
                    report.sent += 1;
                    StatusChange::sent(Utc::now())
                }
                Err(e) => {
                    error!(
                        event_id = %record.event_id,
                        event_type = %record.event_type,
                        error = %e,
                        "Outbox delivery failed"
                    );
                    self.metrics.record_failed();
                    report.failed += 1;
                    StatusChange::failed(&e.to_string())
                }
            };
            outcomes.push((record.event_id.as_str(), change));
        }

        // All outcomes land together; on error they roll back and the
        // records are picked up again next cycle.
        let mut tx = self.store.begin().await?;
        for (event_id, change) in &outcomes {
            self.store.update_status(&mut tx, event_id, change).await?;
        }
        self.store.commit(tx).await?;

        info!(
            fetched = report.fetched,
            sent = report.sent,
            failed = report.failed,
            "Outbox poll cycle complete"
        );
        Ok(report)
    }
}

impl<S: OutboxStore + 'static> OutboxProcessor<S> {
    /// Run cycles on a background task with a fixed delay between them.
    ///
    /// The first cycle starts immediately. Cycle errors are logged and the
    /// loop carries on. Stopping never interrupts a running cycle. Dropping
    /// the handle stops the loop as well.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ProcessorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(
                interval_ms = interval.as_millis() as u64,
                batch_size = self.batch_size,
                "Outbox processor started"
            );

            loop {
                if let Err(e) = self.poll_once().await {
                    error!(error = %e, "Outbox poll cycle failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Outbox processor stopped");
        });

        ProcessorHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Handle to a running processor loop.
pub struct ProcessorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Signal the loop to stop after the current cycle.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.stop();
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
