//! Background reconciliation of the buffer against the primary store.
//!
//! One tokio task wakes on a fixed interval, reads a bounded batch in
//! drain order, and applies each record. Ticks never overlap: the loop
//! runs them sequentially and bounds each by the tick interval. An
//! offline tick is a no-op so the buffer is never touched while the
//! primaries are down.
//!
//! Per-record state machine: enqueued -> draining -> applied (removed),
//! or failed -> requeued (retries under budget) / dropped (budget
//! exhausted or poison).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::buffer::{apply_record, BufferRecord, BufferStore};
use crate::health::HealthMonitor;
use crate::traits::{TaskRepository, UserRepository};

/// Drain cadence and retry policy.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Interval between drain ticks. Also the effective retry back-off.
    pub interval: Duration,
    /// Maximum records read per tick.
    pub batch_size: usize,
    /// Failed applies permitted before a record is dropped.
    pub max_retries: u32,
    /// Age past which records are expired by the periodic cleanup.
    /// `None` disables cleanup.
    pub retention: Option<Duration>,
    /// Run cleanup every this many ticks.
    pub cleanup_every: u32,
}

impl DrainConfig {
    /// Default tick interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
    /// Default per-tick batch size.
    pub const DEFAULT_BATCH_SIZE: usize = 50;
    /// Default retry budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Default cleanup cadence in ticks (about an hour at the default
    /// interval).
    pub const DEFAULT_CLEANUP_EVERY: u32 = 120;
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retention: None,
            cleanup_every: Self::DEFAULT_CLEANUP_EVERY,
        }
    }
}

/// The background reconciler. Shares only the buffer store and health
/// monitor with the request path; repositories come in through the seams.
pub struct DrainScheduler {
    store: Arc<BufferStore>,
    health: Arc<HealthMonitor>,
    users: Arc<dyn UserRepository>,
    tasks: Arc<dyn TaskRepository>,
    config: DrainConfig,
}

impl DrainScheduler {
    /// Wires the scheduler. No task is spawned until [`Self::start`].
    #[must_use]
    pub fn new(
        store: Arc<BufferStore>,
        health: Arc<HealthMonitor>,
        users: Arc<dyn UserRepository>,
        tasks: Arc<dyn TaskRepository>,
        config: DrainConfig,
    ) -> Self {
        Self {
            store,
            health,
            users,
            tasks,
            config,
        }
    }

    /// Spawns the drain loop. Exits when `shutdown` flips to `true` or its
    /// sender drops. At most one tick is ever in flight; a tick that
    /// overruns the interval is abandoned and retried from scratch next
    /// tick (records are only removed after a successful apply, so
    /// abandonment never loses one).
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u32 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if timeout(self.config.interval, self.drain(Some(&cancel)))
                            .await
                            .is_err()
                        {
                            warn!("drain tick exceeded its interval, abandoning until next tick");
                        }
                        ticks = ticks.wrapping_add(1);
                        if ticks % self.config.cleanup_every.max(1) == 0 {
                            self.expire_old_records();
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("drain scheduler stopped");
        })
    }

    /// Runs a single drain tick to completion. Public for tests and for
    /// operational tooling that wants an immediate drain.
    pub async fn run_tick(&self) {
        self.drain(None).await;
    }

    async fn drain(&self, cancel: Option<&watch::Receiver<bool>>) {
        if !self.health.is_online() {
            debug!("primary stores offline, skipping drain tick");
            return;
        }

        let batch = match self.store.get_batch(self.config.batch_size) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "failed to read drain batch");
                return;
            }
        };
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "draining buffered records");

        for record in batch {
            if cancel.is_some_and(|rx| *rx.borrow()) {
                debug!("shutdown requested, stopping drain mid-batch");
                return;
            }
            if !self.apply_one(record).await {
                return;
            }
        }
    }

    /// Applies one record and settles its fate. Returns `false` when the
    /// rest of the batch should be skipped this tick.
    async fn apply_one(&self, mut record: BufferRecord) -> bool {
        match apply_record(&record, self.users.as_ref(), self.tasks.as_ref()).await {
            Ok(()) => {
                if let Err(err) = self.store.remove(&record) {
                    warn!(id = %record.id, error = %err, "failed to remove applied record");
                } else {
                    counter!("buffer_records_applied_total").increment(1);
                    info!(
                        id = %record.id,
                        entity = %record.entity,
                        operation = %record.operation,
                        "applied buffered record"
                    );
                }
                true
            }
            Err(err) if err.is_poison() => {
                if let Err(remove_err) = self.store.remove(&record) {
                    warn!(id = %record.id, error = %remove_err, "failed to remove poison record");
                } else {
                    counter!("buffer_records_poison_total").increment(1);
                    warn!(
                        id = %record.id,
                        entity = %record.entity,
                        operation = %record.operation,
                        error = %err,
                        "dropped poison record"
                    );
                }
                true
            }
            Err(err) if err.is_unavailable() => {
                // The store just went away; leave the whole batch for the
                // next tick rather than burning retry budget on an outage.
                warn!(error = %err, "primary store unavailable mid-batch, ending tick");
                false
            }
            Err(err) => {
                record.retries += 1;
                if record.retries >= self.config.max_retries {
                    if let Err(remove_err) = self.store.remove(&record) {
                        warn!(id = %record.id, error = %remove_err, "failed to drop exhausted record");
                    } else {
                        counter!("buffer_records_dropped_total").increment(1);
                        warn!(
                            id = %record.id,
                            entity = %record.entity,
                            operation = %record.operation,
                            retries = record.retries,
                            error = %err,
                            "dropped record after exhausting retries"
                        );
                    }
                } else {
                    match self.store.requeue(&record) {
                        Ok(_) => debug!(
                            id = %record.id,
                            retries = record.retries,
                            error = %err,
                            "requeued failed record"
                        ),
                        Err(requeue_err) => warn!(
                            id = %record.id,
                            error = %requeue_err,
                            "failed to requeue record"
                        ),
                    }
                }
                true
            }
        }
    }

    fn expire_old_records(&self) {
        let Some(retention) = self.config.retention else {
            return;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        match self.store.cleanup(Utc::now() - retention) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "expired old buffered records"),
            Err(err) => warn!(error = %err, "buffer cleanup failed"),
        }
    }
}
