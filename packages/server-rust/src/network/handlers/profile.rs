//! Profile endpoints: `GET /profile` and `PUT /profile`.
//!
//! The subject id always comes from the verified bearer token, never from
//! the request body. Upserts go through the mutation buffer: 200 when the
//! write hit the primary store, 202 when it was durably buffered for
//! replay.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use writeback_core::{ApiErrorBody, ApiResponse, UpsertProfileRequest, User};

use crate::buffer::OpKind;
use crate::network::middleware::AuthSubject;
use crate::traits::BufferOutcome;

use super::{error_response, AppState};

/// Returns the caller's profile.
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
) -> Response {
    match state.users.get(&subject).await {
        Ok(Some(user)) => (StatusCode::OK, Json(ApiResponse::success(user))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiErrorBody::new("NOT_FOUND", "profile does not exist")),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Upserts the caller's profile.
pub async fn upsert_profile(
    State(state): State<AppState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Json(request): Json<UpsertProfileRequest>,
) -> Response {
    let user = User {
        id: subject,
        email: request.email,
        name: request.name,
        role: request.role.unwrap_or_else(|| "user".to_string()),
        updated_at: Utc::now(),
    };

    match state.buffer.buffer_profile(OpKind::Update, &user).await {
        Ok(BufferOutcome::Applied) => {
            (StatusCode::OK, Json(ApiResponse::success(user))).into_response()
        }
        Ok(BufferOutcome::Buffered) => {
            (StatusCode::ACCEPTED, Json(ApiResponse::success(user))).into_response()
        }
        Err(err) => error_response(&err),
    }
}
