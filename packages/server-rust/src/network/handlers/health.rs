//! Health and liveness endpoint handlers.
//!
//! `/health` aggregates the latest dependency snapshot: 200 when both
//! primary stores are up, 503 with code `DEGRADED` (and the same service
//! map) otherwise. `/health/live` only says the process is responsive.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use writeback_core::{ApiErrorBody, ApiResponse};

use super::AppState;

/// Returns the aggregate health payload.
///
/// The status code is decided by the two primary stores alone; a degraded
/// buffer shows up in the body (`buffer.online=false`) without flipping
/// the code, since the server can still accept and buffer mutations.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.health.status();
    let body = json!({
        "timestamp": snapshot.checked_at.to_rfc3339(),
        "services": {
            "postgresql": snapshot.database_up,
            "redis": snapshot.cache_up,
            "buffer": {
                "online": snapshot.buffer_up,
                "size": snapshot.buffer_size,
            },
        },
    });

    if snapshot.database_up && snapshot.cache_up {
        (StatusCode::OK, Json(ApiResponse::success(body))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiErrorBody::with_data("DEGRADED", body)),
        )
            .into_response()
    }
}

/// Liveness probe -- always 200.
///
/// Only checks that the process is running and responsive; dependency
/// state intentionally does not matter here because a failed liveness
/// probe triggers a restart.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}
