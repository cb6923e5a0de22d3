//! The durable write buffer: records, the embedded store, apply dispatch,
//! and the handler-facing bridge.

pub mod apply;
pub mod bridge;
pub mod record;
pub mod store;

pub use apply::apply_record;
pub use bridge::{WriteBuffer, PROFILE_PRIORITY, TASK_PRIORITY};
pub use record::{
    normalize_priority, BufferRecord, EntityKind, OpKind, DEFAULT_PRIORITY, MAX_PRIORITY,
    MIN_PRIORITY,
};
pub use store::{BufferConfig, BufferStore, DEFAULT_BATCH_SIZE};
