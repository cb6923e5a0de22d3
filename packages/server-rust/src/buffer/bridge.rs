//! The write-path adapter handed to HTTP handlers.
//!
//! [`WriteBuffer`] converts a domain mutation into either an immediate
//! repository apply (when the health monitor says both primaries are up)
//! or a durable enqueue. Callers get `Ok` as soon as the intent is
//! preserved; replay is the drain scheduler's job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use writeback_core::{StoreError, Task, User};

use crate::health::HealthMonitor;
use crate::traits::{BufferOutcome, MutationBuffer, TaskRepository, UserRepository};

use super::apply::apply_record;
use super::record::{BufferRecord, EntityKind, OpKind};
use super::store::BufferStore;

/// Drain priority of profile updates.
pub const PROFILE_PRIORITY: u8 = 3;
/// Drain priority of task mutations. Profiles drain first (lower value
/// wins); the class per `(entity, operation)` is what must stay fixed.
pub const TASK_PRIORITY: u8 = 4;

/// [`MutationBuffer`] over the buffer store, health monitor, and the two
/// primary-store repositories.
pub struct WriteBuffer {
    store: Arc<BufferStore>,
    health: Arc<HealthMonitor>,
    users: Arc<dyn UserRepository>,
    tasks: Arc<dyn TaskRepository>,
    max_size: Option<u64>,
}

impl WriteBuffer {
    /// Wires the bridge. `max_size` is the advisory bound from
    /// configuration; exceeding it warns but never rejects.
    #[must_use]
    pub fn new(
        store: Arc<BufferStore>,
        health: Arc<HealthMonitor>,
        users: Arc<dyn UserRepository>,
        tasks: Arc<dyn TaskRepository>,
        max_size: Option<u64>,
    ) -> Self {
        Self {
            store,
            health,
            users,
            tasks,
            max_size,
        }
    }

    async fn apply_or_enqueue(
        &self,
        mut record: BufferRecord,
    ) -> Result<BufferOutcome, StoreError> {
        if self.health.is_online() {
            match apply_record(&record, self.users.as_ref(), self.tasks.as_ref()).await {
                Ok(()) => return Ok(BufferOutcome::Applied),
                Err(err) if err.is_poison() => return Err(err),
                Err(err) => {
                    warn!(
                        id = %record.id,
                        entity = %record.entity,
                        operation = %record.operation,
                        error = %err,
                        "direct apply failed, buffering for replay"
                    );
                }
            }
        }

        self.store.enqueue(&mut record)?;
        debug!(
            id = %record.id,
            entity = %record.entity,
            operation = %record.operation,
            priority = record.priority,
            "buffered mutation"
        );

        if let Some(max) = self.max_size {
            if let Ok(size) = self.store.size() {
                if size > max {
                    warn!(size, max, "buffer exceeds its advisory max size");
                }
            }
        }
        Ok(BufferOutcome::Buffered)
    }
}

#[async_trait]
impl MutationBuffer for WriteBuffer {
    async fn buffer_profile(
        &self,
        operation: OpKind,
        user: &User,
    ) -> Result<BufferOutcome, StoreError> {
        if operation != OpKind::Update {
            return Err(StoreError::Invalid(format!(
                "profiles only support update, got {operation}"
            )));
        }
        let payload =
            rmp_serde::to_vec(user).map_err(|err| StoreError::Internal(err.into()))?;
        let record = BufferRecord::new(
            &user.id,
            EntityKind::Profile,
            operation,
            payload,
            PROFILE_PRIORITY,
        );
        self.apply_or_enqueue(record).await
    }

    async fn buffer_task(
        &self,
        operation: OpKind,
        task: &Task,
    ) -> Result<BufferOutcome, StoreError> {
        let payload =
            rmp_serde::to_vec(task).map_err(|err| StoreError::Internal(err.into()))?;
        let record = BufferRecord::new(
            &task.user_id,
            EntityKind::Task,
            operation,
            payload,
            TASK_PRIORITY,
        );
        self.apply_or_enqueue(record).await
    }
}
