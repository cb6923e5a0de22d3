//! `PostgreSQL` repositories over an `sqlx` connection pool.
//!
//! One [`PostgresStore`] implements both repository seams plus the health
//! probe; handler fast path and drain scheduler share the pool. All writes
//! are upserts keyed by id so at-least-once replay converges.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use writeback_core::{StoreError, Task, TaskStatus, User};

use crate::traits::{DependencyProbe, TaskRepository, UserRepository};

/// Shared `PostgreSQL` access for users and tasks.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects a pool with the given acquire timeout.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the server cannot be reached.
    pub async fn connect(url: &str, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool (tests, custom pool tuning).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `users` and `tasks` tables when absent.
    ///
    /// Startup calls this once before serving; a failure here is fatal to
    /// the process.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                name TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 3,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS tasks_user_id_idx ON tasks (user_id)")
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        info!("postgres schema ready");
        Ok(())
    }

    /// Closes the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn write_task(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (id, user_id, title, description, status, priority, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                priority = EXCLUDED.priority,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PostgresStore {
    async fn upsert(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, email, name, role, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, users.email),
                name = COALESCE(EXCLUDED.name, users.name),
                role = EXCLUDED.role,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.role)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, email, name, role, updated_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        row.map(|row| user_from_row(&row)).transpose()
    }
}

#[async_trait]
impl TaskRepository for PostgresStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        self.write_task(task).await
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        self.write_task(task).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        // Zero rows affected means the row was already gone; still success.
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, title, description, status, priority, created_at, updated_at
             FROM tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        row.map(|row| task_from_row(&row)).transpose()
    }
}

#[async_trait]
impl DependencyProbe for PostgresStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id").map_err(classify)?,
        email: row.try_get("email").map_err(classify)?,
        name: row.try_get("name").map_err(classify)?,
        role: row.try_get("role").map_err(classify)?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(classify)?,
    })
}

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let status: String = row.try_get("status").map_err(classify)?;
    Ok(Task {
        id: row.try_get("id").map_err(classify)?,
        user_id: row.try_get("user_id").map_err(classify)?,
        title: row.try_get("title").map_err(classify)?,
        description: row.try_get("description").map_err(classify)?,
        status: TaskStatus::from_str(&status)
            .map_err(|err| StoreError::Internal(anyhow::anyhow!(err)))?,
        priority: row.try_get("priority").map_err(classify)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(classify)?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(classify)?,
    })
}

/// Maps an `sqlx` failure into the semantic taxonomy: connection-shaped
/// errors drive buffering, everything else is internal.
fn classify(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StoreError::unavailable(err),
        other => StoreError::Internal(other.into()),
    }
}
