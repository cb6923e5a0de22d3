//! HTTP wire schemas: the response envelope and mutation request bodies.
//!
//! Every endpoint answers with the same envelope so clients can branch on
//! `status` before looking at the payload:
//!
//! - success: `{"status":"success","data":{...}}`
//! - error:   `{"status":"error","code":"...","message":"..."}`

use serde::{Deserialize, Serialize};

use crate::types::TaskStatus;

/// Successful response envelope wrapping an arbitrary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Always `"success"`.
    pub status: String,
    /// Endpoint-specific payload.
    pub data: T,
}

impl<T> ApiResponse<T> {
    /// Wraps `data` in a success envelope.
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}

/// Error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Always `"error"`.
    pub status: String,
    /// Stable machine-readable code, e.g. `"DEGRADED"`, `"NOT_FOUND"`.
    pub code: String,
    /// Optional human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional payload carried alongside the error (the health endpoint
    /// returns its service map even when degraded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiErrorBody {
    /// Builds an error envelope with the given code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            code: code.into(),
            message: Some(message.into()),
            data: None,
        }
    }

    /// Builds a payload-carrying error envelope with no message, e.g. the
    /// degraded health response that still reports its service map.
    pub fn with_data(code: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: "error".to_string(),
            code: code.into(),
            message: None,
            data: Some(data),
        }
    }
}

/// Body of `PUT /profile`. The subject id comes from the auth middleware,
/// never from the body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertProfileRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

/// Body of `POST /tasks`. A missing `id` is assigned server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<i32>,
}

/// Body of `PUT /tasks/{id}`. All fields optional; absent fields keep the
/// previous value when merged by the handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let json = serde_json::to_value(ApiResponse::success(serde_json::json!({"id": "u1"})))
            .unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"]["id"], "u1");
    }

    #[test]
    fn error_envelope_omits_empty_fields() {
        let body = ApiErrorBody {
            status: "error".to_string(),
            code: "DEGRADED".to_string(),
            message: None,
            data: None,
        };
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["code"], "DEGRADED");
        assert!(json.get("message").is_none());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn create_task_request_parses_minimal_body() {
        let req: CreateTaskRequest =
            serde_json::from_str(r#"{"title":"x"}"#).expect("parse minimal body");
        assert_eq!(req.title, "x");
        assert!(req.id.is_none());
        assert!(req.status.is_none());
    }
}
