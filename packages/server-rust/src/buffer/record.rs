//! Buffered mutation records and their byte-sortable storage keys.
//!
//! A [`BufferRecord`] is one pending mutation. Records are persisted as
//! MsgPack and keyed so that plain byte-wise iteration of the store yields
//! `(priority, enqueued_at, id)` order: a 1-byte priority, an 8-byte
//! big-endian nanosecond timestamp, then the id bytes as a tiebreaker.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highest admissible priority (drains first).
pub const MIN_PRIORITY: u8 = 1;
/// Lowest admissible priority (drains last).
pub const MAX_PRIORITY: u8 = 5;
/// Priority assigned when a record carries none or an out-of-range value.
pub const DEFAULT_PRIORITY: u8 = 3;

/// Which kind of domain object a buffered payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A [`writeback_core::User`] payload.
    Profile,
    /// A [`writeback_core::Task`] payload.
    Task,
}

impl EntityKind {
    /// Stable lowercase name, used in keys, logs, and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which mutation the payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Insert (realized as upsert-by-id on replay).
    Create,
    /// Unconditional write by id.
    Update,
    /// Removal by id, no-op-safe.
    Delete,
}

impl OpKind {
    /// Stable lowercase name, used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One buffered mutation awaiting replay against the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRecord {
    /// Stable unique identifier, assigned on first enqueue and preserved
    /// across re-enqueues.
    pub id: String,
    /// Subject of the operation (user identity), for diagnostics.
    pub owner_id: String,
    /// Payload kind.
    pub entity: EntityKind,
    /// Mutation kind.
    pub operation: OpKind,
    /// MsgPack-serialized domain object to apply.
    pub payload: Vec<u8>,
    /// Drain priority in `[1, 5]`; lower drains first.
    pub priority: u8,
    /// Number of failed applies so far. Never decreases for a given id.
    pub retries: u32,
    /// Time of the latest enqueue. Refreshed on requeue.
    pub enqueued_at: DateTime<Utc>,
    /// Storage key this record was read under, used for removal.
    /// Absent until the record has been persisted or fetched.
    #[serde(skip)]
    pub storage_key: Option<Vec<u8>>,
}

impl BufferRecord {
    /// Builds a record ready for enqueue: fresh id, clamped priority,
    /// current timestamp, zero retries.
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        entity: EntityKind,
        operation: OpKind,
        payload: Vec<u8>,
        priority: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            entity,
            operation,
            payload,
            priority: normalize_priority(priority),
            retries: 0,
            enqueued_at: Utc::now(),
            storage_key: None,
        }
    }

    /// Fills in anything a caller left unset: a missing id gets a fresh
    /// UUID, an out-of-range priority is normalized, and a zero timestamp
    /// is replaced with now. Existing values are preserved, so a
    /// re-enqueued record keeps its identity.
    pub fn normalize(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        self.priority = normalize_priority(self.priority);
        if self.enqueued_at.timestamp_nanos_opt() == Some(0) {
            self.enqueued_at = Utc::now();
        }
    }

    /// Byte-sortable storage key: `priority (1B) | nanos (8B BE) | id`.
    ///
    /// Fixed-width big-endian numeric components make byte-wise key order
    /// equal to `(priority, enqueued_at, id)` tuple order.
    #[must_use]
    pub fn priority_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 8 + self.id.len());
        key.push(self.priority);
        key.extend_from_slice(&enqueued_nanos(self.enqueued_at).to_be_bytes());
        key.extend_from_slice(self.id.as_bytes());
        key
    }
}

/// Clamps a priority into `[MIN_PRIORITY, MAX_PRIORITY]`; out-of-range
/// values become [`DEFAULT_PRIORITY`].
#[must_use]
pub fn normalize_priority(priority: u8) -> u8 {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        priority
    } else {
        DEFAULT_PRIORITY
    }
}

/// Nanoseconds since the Unix epoch, saturating at the `i64` range bounds
/// chrono can represent and clamping negatives to zero.
fn enqueued_nanos(at: DateTime<Utc>) -> u64 {
    let nanos = at.timestamp_nanos_opt().unwrap_or(i64::MAX);
    u64::try_from(nanos.max(0)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn record_at(priority: u8, nanos: i64, id: &str) -> BufferRecord {
        BufferRecord {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            entity: EntityKind::Task,
            operation: OpKind::Create,
            payload: Vec::new(),
            priority,
            retries: 0,
            enqueued_at: DateTime::from_timestamp_nanos(nanos),
            storage_key: None,
        }
    }

    #[test]
    fn new_assigns_id_and_clamps_priority() {
        let record = BufferRecord::new("u1", EntityKind::Profile, OpKind::Update, vec![1], 9);
        assert!(!record.id.is_empty());
        assert_eq!(record.priority, DEFAULT_PRIORITY);
        assert_eq!(record.retries, 0);
    }

    #[test]
    fn normalize_preserves_existing_identity() {
        let mut record = record_at(2, 1_000, "keep-me");
        record.normalize();
        assert_eq!(record.id, "keep-me");
        assert_eq!(record.priority, 2);
        assert_eq!(record.enqueued_at, DateTime::from_timestamp_nanos(1_000));
    }

    #[test]
    fn normalize_fills_missing_fields() {
        let mut record = record_at(0, 0, "");
        record.normalize();
        assert!(!record.id.is_empty());
        assert_eq!(record.priority, DEFAULT_PRIORITY);
        assert_ne!(record.enqueued_at.timestamp_nanos_opt(), Some(0));
    }

    #[test]
    fn priority_dominates_key_order() {
        let high = record_at(1, 9_999_999, "zzz");
        let low = record_at(2, 1, "aaa");
        assert!(high.priority_key() < low.priority_key());
    }

    #[test]
    fn enqueue_time_breaks_ties_within_priority() {
        let earlier = record_at(3, 100, "b");
        let later = record_at(3, 200, "a");
        assert!(earlier.priority_key() < later.priority_key());
    }

    #[test]
    fn msgpack_round_trip_skips_storage_key() {
        let mut record = record_at(3, 42, "r1");
        record.storage_key = Some(vec![1, 2, 3]);
        let bytes = rmp_serde::to_vec(&record).unwrap();
        let back: BufferRecord = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back.id, "r1");
        assert!(back.storage_key.is_none());
    }

    proptest! {
        #[test]
        fn key_order_matches_tuple_order(
            p1 in 1u8..=5, p2 in 1u8..=5,
            t1 in 0i64..=i64::from(u32::MAX), t2 in 0i64..=i64::from(u32::MAX),
            id1 in "[a-z]{1,8}", id2 in "[a-z]{1,8}",
        ) {
            let a = record_at(p1, t1, &id1);
            let b = record_at(p2, t2, &id2);
            let tuple_order = (p1, t1, id1.as_bytes()).cmp(&(p2, t2, id2.as_bytes()));
            prop_assert_eq!(a.priority_key().cmp(&b.priority_key()), tuple_order);
        }

        #[test]
        fn normalized_priority_is_always_in_range(p in any::<u8>()) {
            let normalized = normalize_priority(p);
            prop_assert!((MIN_PRIORITY..=MAX_PRIORITY).contains(&normalized));
        }
    }
}
