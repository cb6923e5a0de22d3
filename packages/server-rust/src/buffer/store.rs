//! Durable, ordered, single-process queue of [`BufferRecord`]s over `redb`.
//!
//! One file, one table ("bucket"), exclusively locked for the lifetime of
//! the process. Keys are the byte-sortable `(priority, enqueued_at, id)`
//! encoding from [`super::record`], so a plain range scan yields drain
//! order. Every mutation is a single committed transaction: a record is
//! either durably visible or the call returned an error.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use metrics::counter;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError};
use tracing::warn;
use writeback_core::StoreError;

use super::record::BufferRecord;

/// Batch size used when a caller passes zero.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// How long [`BufferStore::open`] waits for the exclusive file lock.
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Delay between lock acquisition attempts.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// File-backed buffer store configuration.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Path of the buffer file. Parent directories are created on open.
    pub path: PathBuf,
    /// Table name inside the file.
    pub bucket: String,
    /// Advisory upper bound on buffered records; enqueues past it warn.
    pub max_size: Option<u64>,
    /// Age past which `cleanup` removes records.
    pub retention: Option<Duration>,
    /// How long `open` waits for the exclusive lock.
    pub lock_wait: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/buffer.redb"),
            bucket: "operations".to_string(),
            max_size: None,
            retention: None,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }
}

/// Embedded durable queue. Cheap to share behind an `Arc`; redb serializes
/// writers internally and readers see a consistent snapshot per
/// transaction.
pub struct BufferStore {
    db: Database,
    bucket: String,
}

impl BufferStore {
    /// Opens (creating if absent) the buffer file and its bucket, waiting
    /// up to [`DEFAULT_LOCK_WAIT`] for the exclusive lock.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the lock cannot be acquired within the wait
    /// budget; `Internal` for any other storage failure.
    pub fn open(path: impl AsRef<Path>, bucket: &str) -> Result<Self, StoreError> {
        Self::open_with_lock_wait(path, bucket, DEFAULT_LOCK_WAIT)
    }

    /// [`Self::open`] with an explicit lock wait budget.
    pub fn open_with_lock_wait(
        path: impl AsRef<Path>,
        bucket: &str,
        lock_wait: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::Internal(err.into()))?;
            }
        }

        let deadline = Instant::now() + lock_wait;
        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(err) if is_lock_contention(&err) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::Unavailable(anyhow!(
                            "buffer file {} is locked by another process: {err}",
                            path.display()
                        )));
                    }
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(err) => return Err(storage_err(err)),
            }
        };

        let store = Self {
            db,
            bucket: bucket.to_string(),
        };
        // Create the bucket eagerly so reads never race table creation.
        let txn = store.db.begin_write().map_err(storage_err)?;
        txn.open_table(store.table()).map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;
        Ok(store)
    }

    /// Opens the store described by `config`.
    pub fn open_config(config: &BufferConfig) -> Result<Self, StoreError> {
        Self::open_with_lock_wait(&config.path, &config.bucket, config.lock_wait)
    }

    fn table(&self) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
        TableDefinition::new(&self.bucket)
    }

    /// Normalizes and durably appends a record. On return the record's
    /// `storage_key` is set to the key it was written under.
    pub fn enqueue(&self, record: &mut BufferRecord) -> Result<(), StoreError> {
        record.normalize();
        let key = record.priority_key();
        let value =
            rmp_serde::to_vec(record).map_err(|err| StoreError::Internal(err.into()))?;

        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(self.table()).map_err(storage_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        record.storage_key = Some(key);
        Ok(())
    }

    /// Returns up to `limit` records in `(priority, enqueued_at, id)` order
    /// without removing them. A zero limit reads [`DEFAULT_BATCH_SIZE`].
    ///
    /// Records that fail to deserialize are skipped (and counted), never
    /// removed; they do not consume the limit.
    pub fn get_batch(&self, limit: usize) -> Result<Vec<BufferRecord>, StoreError> {
        let limit = if limit == 0 { DEFAULT_BATCH_SIZE } else { limit };
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = match txn.open_table(self.table()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(storage_err(err)),
        };

        let mut batch = Vec::new();
        for entry in table.range::<&[u8]>(..).map_err(storage_err)? {
            if batch.len() >= limit {
                break;
            }
            let (key, value) = entry.map_err(storage_err)?;
            match rmp_serde::from_slice::<BufferRecord>(value.value()) {
                Ok(mut record) => {
                    record.storage_key = Some(key.value().to_vec());
                    batch.push(record);
                }
                Err(err) => {
                    counter!("buffer_corrupt_records_skipped_total").increment(1);
                    warn!(error = %err, "skipping corrupt buffer record");
                }
            }
        }
        Ok(batch)
    }

    /// Deletes a record by its storage key, falling back to a scan for its
    /// id when the key is absent or stale. Returns whether anything was
    /// removed.
    pub fn remove(&self, record: &BufferRecord) -> Result<bool, StoreError> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let removed;
        {
            let mut table = txn.open_table(self.table()).map_err(storage_err)?;
            let mut hit = match &record.storage_key {
                Some(key) => table.remove(key.as_slice()).map_err(storage_err)?.is_some(),
                None => false,
            };
            if !hit {
                if let Some(key) = find_key_by_id(&table, &record.id)? {
                    hit = table.remove(key.as_slice()).map_err(storage_err)?.is_some();
                }
            }
            removed = hit;
        }
        txn.commit().map_err(storage_err)?;
        Ok(removed)
    }

    /// Re-enqueues a record with a refreshed `enqueued_at`, preserving its
    /// id, payload, priority, and retry count. The delete of the old key
    /// and the insert of the new one commit in a single transaction, so a
    /// crash never loses the record.
    pub fn requeue(&self, record: &BufferRecord) -> Result<BufferRecord, StoreError> {
        let mut refreshed = record.clone();
        refreshed.enqueued_at = Utc::now();
        refreshed.storage_key = None;
        refreshed.normalize();
        let new_key = refreshed.priority_key();
        let value =
            rmp_serde::to_vec(&refreshed).map_err(|err| StoreError::Internal(err.into()))?;

        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(self.table()).map_err(storage_err)?;
            let old_key = match &record.storage_key {
                Some(key) => Some(key.clone()),
                None => find_key_by_id(&table, &record.id)?,
            };
            if let Some(key) = old_key {
                table.remove(key.as_slice()).map_err(storage_err)?;
            }
            table
                .insert(new_key.as_slice(), value.as_slice())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        refreshed.storage_key = Some(new_key);
        Ok(refreshed)
    }

    /// Number of records currently buffered.
    pub fn size(&self) -> Result<u64, StoreError> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        match txn.open_table(self.table()) {
            Ok(table) => table.len().map_err(storage_err),
            Err(TableError::TableDoesNotExist(_)) => Ok(0),
            Err(err) => Err(storage_err(err)),
        }
    }

    /// Removes records enqueued before `older_than`. Returns how many were
    /// removed. Undecodable entries are left in place.
    pub fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let mut removed = 0u64;
        {
            let mut table = txn.open_table(self.table()).map_err(storage_err)?;
            let mut expired = Vec::new();
            for entry in table.range::<&[u8]>(..).map_err(storage_err)? {
                let (key, value) = entry.map_err(storage_err)?;
                if let Ok(record) = rmp_serde::from_slice::<BufferRecord>(value.value()) {
                    if record.enqueued_at < older_than {
                        expired.push(key.value().to_vec());
                    }
                }
            }
            for key in expired {
                if table.remove(key.as_slice()).map_err(storage_err)?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(storage_err)?;
        Ok(removed)
    }

    /// Releases the file lock. Every committed record is already durable;
    /// this exists so the lifecycle can hand the file to a successor
    /// process promptly instead of waiting for process exit.
    pub fn close(self) {
        drop(self.db);
    }
}

/// Scans for the storage key of the record with the given id.
fn find_key_by_id(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    id: &str,
) -> Result<Option<Vec<u8>>, StoreError> {
    for entry in table.range::<&[u8]>(..).map_err(storage_err)? {
        let (key, value) = entry.map_err(storage_err)?;
        if let Ok(record) = rmp_serde::from_slice::<BufferRecord>(value.value()) {
            if record.id == id {
                return Ok(Some(key.value().to_vec()));
            }
        }
    }
    Ok(None)
}

/// True when opening failed because another handle holds the file.
fn is_lock_contention(err: &redb::DatabaseError) -> bool {
    matches!(
        err,
        redb::DatabaseError::DatabaseAlreadyOpen
            | redb::DatabaseError::Storage(redb::StorageError::Io(_))
    )
}

fn storage_err(err: impl std::error::Error + Send + Sync + 'static) -> StoreError {
    StoreError::Internal(anyhow::Error::new(err))
}
