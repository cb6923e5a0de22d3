use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user profile row in the primary store.
///
/// `email` and `name` are optional because profile upserts may carry only a
/// subset of fields; the repository merges them by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier (the JWT subject).
    pub id: String,
    /// Contact email, if the profile has one.
    pub email: Option<String>,
    /// Display name, if the profile has one.
    pub name: Option<String>,
    /// Authorization role, e.g. `"user"` or `"admin"`.
    pub role: String,
    /// Wall-clock time of the last profile write.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a user with the given id, default role, and current timestamp.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: None,
            role: "user".to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not started.
    Pending,
    /// Actively being worked on.
    InProgress,
    /// Finished.
    Completed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Stable lowercase name matching the serde representation, used for
    /// database columns and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task row in the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable task identifier.
    pub id: String,
    /// Owning user's id.
    pub user_id: String,
    /// Short human-readable title.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// User-facing priority, 1 (highest) to 5 (lowest).
    pub priority: i32,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    /// Wall-clock time of the last write.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a pending task owned by `user_id` with default priority 3.
    #[must_use]
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: 3,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn task_msgpack_round_trip() {
        let task = Task::new("t1", "u1", "write the report");
        let bytes = rmp_serde::to_vec(&task).expect("serialize Task");
        let back: Task = rmp_serde::from_slice(&bytes).expect("deserialize Task");
        assert_eq!(back, task);
    }

    #[test]
    fn task_status_parse_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn user_defaults() {
        let user = User::new("u1");
        assert_eq!(user.role, "user");
        assert!(user.email.is_none());
        assert!(user.name.is_none());
    }
}
