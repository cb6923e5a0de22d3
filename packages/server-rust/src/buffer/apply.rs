//! Dispatch of a buffered record against the primary-store repositories.
//!
//! The set of admissible `(entity, operation)` pairs is closed. Payloads
//! that fail to decode are poison and are never retried; an inadmissible
//! pair is an ordinary failure so it stays subject to the retry budget.

use serde::de::DeserializeOwned;
use writeback_core::{StoreError, Task, User};

use crate::traits::{TaskRepository, UserRepository};

use super::record::{BufferRecord, EntityKind, OpKind};

/// Applies one record via the repository matching its `(entity, operation)`.
pub async fn apply_record(
    record: &BufferRecord,
    users: &dyn UserRepository,
    tasks: &dyn TaskRepository,
) -> Result<(), StoreError> {
    match (record.entity, record.operation) {
        (EntityKind::Profile, OpKind::Update) => {
            let user: User = decode_payload(record)?;
            users.upsert(&user).await
        }
        (EntityKind::Task, OpKind::Create) => {
            let task: Task = decode_payload(record)?;
            tasks.create(&task).await
        }
        (EntityKind::Task, OpKind::Update) => {
            let task: Task = decode_payload(record)?;
            tasks.update(&task).await
        }
        (EntityKind::Task, OpKind::Delete) => {
            let task: Task = decode_payload(record)?;
            match tasks.delete(&task.id).await {
                Err(err) if err.is_not_found() => Ok(()),
                result => result,
            }
        }
        (entity, operation) => Err(StoreError::Invalid(format!(
            "unsupported operation {operation} on {entity}"
        ))),
    }
}

fn decode_payload<T: DeserializeOwned>(record: &BufferRecord) -> Result<T, StoreError> {
    rmp_serde::from_slice(&record.payload).map_err(|err| {
        StoreError::Poison(format!(
            "undecodable payload for record {}: {err}",
            record.id
        ))
    })
}
