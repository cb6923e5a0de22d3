//! Writeback Core -- domain types, wire schemas, and the error taxonomy.
//!
//! This crate provides the foundation layer shared by the server and any
//! future clients:
//!
//! - **Types** ([`types`]): `User`, `Task`, `TaskStatus`
//! - **Error** ([`error`]): `StoreError`, the semantic failure taxonomy that
//!   drives buffering, retry, and HTTP status mapping
//! - **Messages** ([`messages`]): the response envelope and request DTOs

pub mod error;
pub mod messages;
pub mod types;

// Error
pub use error::StoreError;

// Messages
pub use messages::{
    ApiErrorBody, ApiResponse, CreateTaskRequest, UpdateTaskRequest, UpsertProfileRequest,
};

// Types
pub use types::{Task, TaskStatus, User};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
