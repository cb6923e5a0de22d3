//! Periodic reachability probing of the storage dependency graph.
//!
//! The monitor owns one probe per primary store plus the buffer's size
//! query, runs them on a fixed interval under bounded timeouts, and
//! publishes the result as an immutable [`HealthSnapshot`] behind a
//! readers-writer lock. Writers replace the whole snapshot; readers take
//! a copy, so a snapshot is always internally consistent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::buffer::BufferStore;
use crate::traits::DependencyProbe;

/// Probe cadence and per-dependency timeout budget.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between probe rounds.
    pub probe_interval: Duration,
    /// Timeout for the primary row store probe.
    pub row_store_timeout: Duration,
    /// Timeout for the primary KV store probe.
    pub kv_store_timeout: Duration,
    /// Timeout for the buffer size query.
    pub buffer_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(10),
            row_store_timeout: Duration::from_secs(3),
            kv_store_timeout: Duration::from_secs(2),
            buffer_timeout: Duration::from_secs(1),
        }
    }
}

/// Immutable result of one probe round.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Primary row store (`PostgreSQL`) answered its probe in time.
    pub database_up: bool,
    /// Primary KV store (Redis) answered its probe in time.
    pub cache_up: bool,
    /// The buffer size query succeeded.
    pub buffer_up: bool,
    /// Buffered record count at probe time (0 when the query failed).
    pub buffer_size: u64,
    /// When this round completed.
    pub checked_at: DateTime<Utc>,
}

impl HealthSnapshot {
    fn offline() -> Self {
        Self {
            database_up: false,
            cache_up: false,
            buffer_up: false,
            buffer_size: 0,
            checked_at: Utc::now(),
        }
    }
}

/// Concurrent prober for the two primary stores and the buffer.
///
/// Until the first probe completes the snapshot reports everything down,
/// so callers buffer rather than trusting an unverified dependency.
pub struct HealthMonitor {
    config: MonitorConfig,
    database: Arc<dyn DependencyProbe>,
    cache: Arc<dyn DependencyProbe>,
    buffer: Arc<BufferStore>,
    snapshot: RwLock<HealthSnapshot>,
}

impl HealthMonitor {
    /// Wires the monitor. No task is spawned until [`Self::start`].
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        database: Arc<dyn DependencyProbe>,
        cache: Arc<dyn DependencyProbe>,
        buffer: Arc<BufferStore>,
    ) -> Self {
        Self {
            config,
            database,
            cache,
            buffer,
            snapshot: RwLock::new(HealthSnapshot::offline()),
        }
    }

    /// `true` when the latest snapshot saw both primary stores up.
    #[must_use]
    pub fn is_online(&self) -> bool {
        let snapshot = self.snapshot.read();
        snapshot.database_up && snapshot.cache_up
    }

    /// Copy of the latest snapshot.
    #[must_use]
    pub fn status(&self) -> HealthSnapshot {
        self.snapshot.read().clone()
    }

    /// Runs one probe round and publishes the snapshot.
    pub async fn probe_once(&self) {
        let was_online = self.is_online();

        let database_up = matches!(
            timeout(self.config.row_store_timeout, self.database.ping()).await,
            Ok(Ok(()))
        );
        let cache_up = matches!(
            timeout(self.config.kv_store_timeout, self.cache.ping()).await,
            Ok(Ok(()))
        );

        let buffer = Arc::clone(&self.buffer);
        let (buffer_up, buffer_size) = match timeout(
            self.config.buffer_timeout,
            tokio::task::spawn_blocking(move || buffer.size()),
        )
        .await
        {
            Ok(Ok(Ok(size))) => (true, size),
            _ => (false, 0),
        };

        let snapshot = HealthSnapshot {
            database_up,
            cache_up,
            buffer_up,
            buffer_size,
            checked_at: Utc::now(),
        };
        let online = database_up && cache_up;
        if was_online && !online {
            warn!(database_up, cache_up, "primary stores went offline");
        } else if !was_online && online {
            info!(buffer_size, "primary stores back online");
        } else {
            debug!(database_up, cache_up, buffer_up, buffer_size, "health probe");
        }

        *self.snapshot.write() = snapshot;
    }

    /// Spawns the probe loop. The first round runs immediately; the loop
    /// exits when `shutdown` flips to `true` or its sender drops.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(monitor.config.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.probe_once().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("health monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::memory::{MemorySessionStore, MemoryStore};

    use super::*;

    fn setup() -> (
        tempfile::TempDir,
        Arc<MemoryStore>,
        Arc<MemorySessionStore>,
        Arc<BufferStore>,
        Arc<HealthMonitor>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = Arc::new(
            BufferStore::open(dir.path().join("buffer.redb"), "operations").unwrap(),
        );
        let database = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemorySessionStore::new());
        let monitor = Arc::new(HealthMonitor::new(
            MonitorConfig::default(),
            database.clone(),
            cache.clone(),
            buffer.clone(),
        ));
        (dir, database, cache, buffer, monitor)
    }

    #[tokio::test]
    async fn initial_snapshot_reports_offline() {
        let (_dir, _database, _cache, _buffer, monitor) = setup();
        assert!(!monitor.is_online());
        let snapshot = monitor.status();
        assert!(!snapshot.database_up);
        assert!(!snapshot.cache_up);
        assert!(!snapshot.buffer_up);
    }

    #[tokio::test]
    async fn probe_marks_everything_up_when_reachable() {
        let (_dir, _database, _cache, _buffer, monitor) = setup();
        monitor.probe_once().await;

        let snapshot = monitor.status();
        assert!(snapshot.database_up);
        assert!(snapshot.cache_up);
        assert!(snapshot.buffer_up);
        assert_eq!(snapshot.buffer_size, 0);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn row_store_failure_takes_monitor_offline() {
        let (_dir, database, _cache, _buffer, monitor) = setup();
        monitor.probe_once().await;
        assert!(monitor.is_online());

        database.set_offline(true);
        monitor.probe_once().await;

        let snapshot = monitor.status();
        assert!(!snapshot.database_up);
        assert!(snapshot.cache_up);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn kv_store_failure_takes_monitor_offline() {
        let (_dir, _database, cache, _buffer, monitor) = setup();
        cache.set_offline(true);
        monitor.probe_once().await;

        let snapshot = monitor.status();
        assert!(snapshot.database_up);
        assert!(!snapshot.cache_up);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn snapshot_reflects_buffer_size() {
        let (_dir, _database, _cache, buffer, monitor) = setup();
        let task = writeback_core::Task::new("t1", "u1", "x");
        let mut record = crate::buffer::BufferRecord::new(
            "u1",
            crate::buffer::EntityKind::Task,
            crate::buffer::OpKind::Create,
            rmp_serde::to_vec(&task).unwrap(),
            4,
        );
        buffer.enqueue(&mut record).unwrap();

        monitor.probe_once().await;
        assert_eq!(monitor.status().buffer_size, 1);
    }

    #[tokio::test]
    async fn online_implies_both_primaries_in_same_snapshot() {
        let (_dir, database, cache, _buffer, monitor) = setup();
        for (db_off, cache_off) in [(false, false), (true, false), (false, true), (true, true)] {
            database.set_offline(db_off);
            cache.set_offline(cache_off);
            monitor.probe_once().await;

            let snapshot = monitor.status();
            if monitor.is_online() {
                assert!(snapshot.database_up && snapshot.cache_up);
            } else {
                assert!(!snapshot.database_up || !snapshot.cache_up);
            }
        }
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let (_dir, _database, _cache, _buffer, monitor) = setup();
        let (tx, rx) = watch::channel(false);
        let handle = monitor.start(rx);

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.is_online());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
