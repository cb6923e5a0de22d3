//! Task endpoints: `POST /tasks`, `GET/PUT/DELETE /tasks/{id}`.
//!
//! Mutations flow through the buffer bridge: 201/200 when applied against
//! the primary store, 202 when durably buffered. Updates merge the request
//! over the stored row; when the store is unreachable the merge source is
//! the request alone, so an offline update must carry a title.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use writeback_core::{ApiErrorBody, ApiResponse, CreateTaskRequest, Task, UpdateTaskRequest};

use crate::buffer::OpKind;
use crate::network::middleware::AuthSubject;
use crate::traits::BufferOutcome;

use super::{error_response, AppState};

/// Creates a task owned by the caller.
pub async fn create_task(
    State(state): State<AppState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Json(request): Json<CreateTaskRequest>,
) -> Response {
    if request.title.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiErrorBody::new("INVALID", "title must not be empty")),
        )
            .into_response();
    }

    let now = Utc::now();
    let task = Task {
        id: request
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_id: subject,
        title: request.title,
        description: request.description,
        status: request.status.unwrap_or_default(),
        priority: request.priority.unwrap_or(3),
        created_at: now,
        updated_at: now,
    };

    match state.buffer.buffer_task(OpKind::Create, &task).await {
        Ok(BufferOutcome::Applied) => {
            (StatusCode::CREATED, Json(ApiResponse::success(task))).into_response()
        }
        Ok(BufferOutcome::Buffered) => {
            (StatusCode::ACCEPTED, Json(ApiResponse::success(task))).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Returns one of the caller's tasks.
pub async fn get_task(
    State(state): State<AppState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(id): Path<String>,
) -> Response {
    match state.tasks.get(&id).await {
        Ok(Some(task)) if task.user_id == subject => {
            (StatusCode::OK, Json(ApiResponse::success(task))).into_response()
        }
        Ok(_) => task_not_found(),
        Err(err) => error_response(&err),
    }
}

/// Updates one of the caller's tasks.
pub async fn update_task(
    State(state): State<AppState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTaskRequest>,
) -> Response {
    let task = match state.tasks.get(&id).await {
        Ok(Some(mut existing)) if existing.user_id == subject => {
            if let Some(title) = request.title {
                existing.title = title;
            }
            if let Some(description) = request.description {
                existing.description = Some(description);
            }
            if let Some(status) = request.status {
                existing.status = status;
            }
            if let Some(priority) = request.priority {
                existing.priority = priority;
            }
            existing.updated_at = Utc::now();
            existing
        }
        Ok(_) => return task_not_found(),
        Err(err) if err.is_unavailable() => {
            // The row is unreadable, so the buffered upsert must be whole.
            let Some(title) = request.title else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiErrorBody::new(
                        "INVALID",
                        "title is required while the store is unreachable",
                    )),
                )
                    .into_response();
            };
            let now = Utc::now();
            Task {
                id: id.clone(),
                user_id: subject,
                title,
                description: request.description,
                status: request.status.unwrap_or_default(),
                priority: request.priority.unwrap_or(3),
                created_at: now,
                updated_at: now,
            }
        }
        Err(err) => return error_response(&err),
    };

    match state.buffer.buffer_task(OpKind::Update, &task).await {
        Ok(BufferOutcome::Applied) => {
            (StatusCode::OK, Json(ApiResponse::success(task))).into_response()
        }
        Ok(BufferOutcome::Buffered) => {
            (StatusCode::ACCEPTED, Json(ApiResponse::success(task))).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Deletes one of the caller's tasks. Idempotent: deleting a task that is
/// already gone still succeeds.
pub async fn delete_task(
    State(state): State<AppState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(id): Path<String>,
) -> Response {
    // The delete payload only needs the id; replay dispatches on it.
    let task = Task::new(id.clone(), subject, String::new());

    match state.buffer.buffer_task(OpKind::Delete, &task).await {
        Ok(BufferOutcome::Applied) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "id": id }))),
        )
            .into_response(),
        Ok(BufferOutcome::Buffered) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(json!({ "id": id }))),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

fn task_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiErrorBody::new("NOT_FOUND", "task does not exist")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::to_bytes;
    use writeback_core::TaskStatus;

    use crate::buffer::{BufferStore, WriteBuffer};
    use crate::health::{HealthMonitor, MonitorConfig};
    use crate::storage::memory::MemoryStore;

    use super::*;

    struct Harness {
        _dir: tempfile::TempDir,
        memory: Arc<MemoryStore>,
        state: AppState,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            BufferStore::open(dir.path().join("buffer.redb"), "operations").unwrap(),
        );
        let memory = Arc::new(MemoryStore::new());
        let health = Arc::new(HealthMonitor::new(
            MonitorConfig::default(),
            memory.clone(),
            memory.clone(),
            store.clone(),
        ));
        let buffer = Arc::new(WriteBuffer::new(
            store,
            health.clone(),
            memory.clone(),
            memory.clone(),
            None,
        ));
        let state = AppState {
            buffer,
            health,
            users: memory.clone(),
            tasks: memory.clone(),
            jwt_secret: Arc::new("test-secret".to_string()),
        };
        Harness {
            _dir: dir,
            memory,
            state,
        }
    }

    fn subject(id: &str) -> Extension<AuthSubject> {
        Extension(AuthSubject(id.to_string()))
    }

    fn create_body(id: &str, title: &str) -> Json<CreateTaskRequest> {
        Json(CreateTaskRequest {
            id: Some(id.to_string()),
            title: title.to_string(),
            description: None,
            status: None,
            priority: None,
        })
    }

    #[tokio::test]
    async fn create_applies_directly_when_online() {
        let h = harness();
        h.state.health.probe_once().await;

        let response = create_task(
            State(h.state.clone()),
            subject("u1"),
            create_body("t1", "write tests"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let stored = h.memory.get_task("t1").unwrap();
        assert_eq!(stored.user_id, "u1");
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn create_buffers_with_202_when_offline() {
        let h = harness();
        h.memory.set_offline(true);
        h.state.health.probe_once().await;

        let response = create_task(
            State(h.state.clone()),
            subject("u1"),
            create_body("t1", "x"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(h.memory.get_task("t1").is_none());
    }

    #[tokio::test]
    async fn create_rejects_blank_title() {
        let h = harness();
        let response = create_task(
            State(h.state.clone()),
            subject("u1"),
            create_body("t1", "  "),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_assigns_id_when_missing() {
        let h = harness();
        h.state.health.probe_once().await;

        let response = create_task(
            State(h.state.clone()),
            subject("u1"),
            Json(CreateTaskRequest {
                id: None,
                title: "auto id".to_string(),
                description: None,
                status: None,
                priority: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(!json["data"]["id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_merges_over_existing_row() {
        let h = harness();
        h.state.health.probe_once().await;
        create_task(
            State(h.state.clone()),
            subject("u1"),
            create_body("t1", "original"),
        )
        .await;

        let response = update_task(
            State(h.state.clone()),
            subject("u1"),
            Path("t1".to_string()),
            Json(UpdateTaskRequest {
                status: Some(TaskStatus::Completed),
                ..UpdateTaskRequest::default()
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let stored = h.memory.get_task("t1").unwrap();
        assert_eq!(stored.title, "original");
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn update_of_foreign_task_is_404() {
        let h = harness();
        h.state.health.probe_once().await;
        create_task(
            State(h.state.clone()),
            subject("u1"),
            create_body("t1", "mine"),
        )
        .await;

        let response = update_task(
            State(h.state.clone()),
            subject("intruder"),
            Path("t1".to_string()),
            Json(UpdateTaskRequest::default()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn offline_update_requires_title() {
        let h = harness();
        h.memory.set_offline(true);
        h.state.health.probe_once().await;

        let missing_title = update_task(
            State(h.state.clone()),
            subject("u1"),
            Path("t1".to_string()),
            Json(UpdateTaskRequest::default()),
        )
        .await;
        assert_eq!(missing_title.status(), StatusCode::BAD_REQUEST);

        let with_title = update_task(
            State(h.state.clone()),
            subject("u1"),
            Path("t1".to_string()),
            Json(UpdateTaskRequest {
                title: Some("rebuilt offline".to_string()),
                ..UpdateTaskRequest::default()
            }),
        )
        .await;
        assert_eq!(with_title.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let h = harness();
        h.state.health.probe_once().await;
        create_task(
            State(h.state.clone()),
            subject("u1"),
            create_body("t1", "short lived"),
        )
        .await;

        let first = delete_task(
            State(h.state.clone()),
            subject("u1"),
            Path("t1".to_string()),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);
        assert!(h.memory.get_task("t1").is_none());

        let second = delete_task(
            State(h.state.clone()),
            subject("u1"),
            Path("t1".to_string()),
        )
        .await;
        assert_eq!(second.status(), StatusCode::OK);
    }
}
