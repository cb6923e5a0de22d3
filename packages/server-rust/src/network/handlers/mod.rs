//! HTTP handler definitions for the writeback server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors), the taxonomy-to-status-code mapping, and re-exports all
//! handler functions for convenient access when building the router.

pub mod health;
pub mod profile;
pub mod tasks;

pub use health::{health_handler, liveness_handler};
pub use profile::{get_profile, upsert_profile};
pub use tasks::{create_task, delete_task, get_task, update_task};

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;
use writeback_core::{ApiErrorBody, StoreError};

use crate::health::HealthMonitor;
use crate::traits::{MutationBuffer, TaskRepository, UserRepository};

/// Shared application state passed to all axum handlers via `State`
/// extraction. Holds `Arc` references to shared resources so cloning is
/// cheap.
#[derive(Clone)]
pub struct AppState {
    /// Write-path adapter: direct apply or durable enqueue.
    pub buffer: Arc<dyn MutationBuffer>,
    /// Latest dependency health snapshot.
    pub health: Arc<HealthMonitor>,
    /// Read path for profiles.
    pub users: Arc<dyn UserRepository>,
    /// Read path for tasks.
    pub tasks: Arc<dyn TaskRepository>,
    /// HS256 secret for bearer-token verification.
    pub jwt_secret: Arc<String>,
}

/// Maps a storage failure onto an HTTP response.
///
/// `Unavailable` normally never reaches a handler -- the bridge buffers
/// it -- so seeing one here means the buffer itself failed and 503 is the
/// honest answer.
pub(crate) fn error_response(err: &StoreError) -> Response {
    let (status, code) = match err {
        StoreError::Invalid(_) => (StatusCode::BAD_REQUEST, "INVALID"),
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        StoreError::Poison(_) | StoreError::Internal(_) => {
            error!(error = %err, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        }
    };
    (status, Json(ApiErrorBody::new(code, err.to_string()))).into_response()
}
