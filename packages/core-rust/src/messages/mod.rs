//! Wire schemas for the writeback HTTP API.
//!
//! JSON on the wire via serde; the buffer's internal MsgPack encoding lives
//! in the server crate, not here.

pub mod api;

pub use api::{
    ApiErrorBody, ApiResponse, CreateTaskRequest, UpdateTaskRequest, UpsertProfileRequest,
};
