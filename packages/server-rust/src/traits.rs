use std::time::Duration;

use async_trait::async_trait;
use writeback_core::{StoreError, Task, User};

use crate::buffer::OpKind;

/// Authoritative store for user profiles.
/// Implementations: `PostgreSQL`, memory (tests).
///
/// All writes are idempotent: the buffer replays operations at-least-once,
/// so repeating any call must leave the store in the same state.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert or update a profile by id (upsert).
    async fn upsert(&self, user: &User) -> Result<(), StoreError>;

    /// Load a profile by id.
    async fn get(&self, id: &str) -> Result<Option<User>, StoreError>;
}

/// Authoritative store for tasks.
/// Implementations: `PostgreSQL`, memory (tests).
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a task. Realized as upsert-by-id so replays are idempotent.
    async fn create(&self, task: &Task) -> Result<(), StoreError>;

    /// Unconditionally write a task by id.
    async fn update(&self, task: &Task) -> Result<(), StoreError>;

    /// Delete a task by id. Succeeds when the row is already gone.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Load a task by id.
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;
}

/// Opaque key/value store for sessions.
/// Implementations: Redis, memory (tests).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a session value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a session value with a time-to-live.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remove a session value. Succeeds when the key is absent.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Reachability probe for a storage dependency.
///
/// The health monitor holds one probe per primary store and calls it on
/// every probe tick under a bounded timeout.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Cheap round-trip against the dependency (`SELECT 1`, `PING`).
    async fn ping(&self) -> Result<(), StoreError>;
}

/// How a mutation reached durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// Written straight to the primary store.
    Applied,
    /// Enqueued in the durable buffer for later replay.
    Buffered,
}

/// Adapter between the use-case layer and the write path.
///
/// Either applies the mutation directly against the primary store or
/// enqueues it durably; the caller sees `Ok` as soon as the intent is
/// preserved one way or the other.
#[async_trait]
pub trait MutationBuffer: Send + Sync {
    /// Apply or buffer a profile mutation. Only `update` is admissible.
    async fn buffer_profile(
        &self,
        operation: OpKind,
        user: &User,
    ) -> Result<BufferOutcome, StoreError>;

    /// Apply or buffer a task mutation (`create`, `update`, or `delete`).
    async fn buffer_task(
        &self,
        operation: OpKind,
        task: &Task,
    ) -> Result<BufferOutcome, StoreError>;
}
