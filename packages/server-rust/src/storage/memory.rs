//! In-memory repository and session store implementations.
//!
//! Backed by [`DashMap`] for concurrent access without external locking.
//! Used by tests and local development; both carry failure-injection
//! switches so the offline and degraded paths can be exercised
//! deterministically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use writeback_core::{StoreError, Task, User};

use crate::traits::{DependencyProbe, SessionStore, TaskRepository, UserRepository};

/// In-memory primary row store: users and tasks in two maps.
///
/// `set_offline(true)` makes every call (including the probe) fail as
/// `unavailable`; `set_fail_writes(true)` keeps the probe green but fails
/// writes, simulating a store that accepts connections yet cannot commit.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    tasks: DashMap<String, Task>,
    offline: AtomicBool,
    fail_writes: AtomicBool,
    op_log: Mutex<Vec<String>>,
}

impl MemoryStore {
    /// Creates an empty, online store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles full unreachability.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Toggles write-path failures while the probe stays healthy.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Direct read for test assertions, bypassing the repository seam.
    #[must_use]
    pub fn get_user(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }

    /// Direct read for test assertions, bypassing the repository seam.
    #[must_use]
    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|t| t.clone())
    }

    /// Number of stored tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Successful writes in call order, e.g. `"upsert_user:u1"`. Lets tests
    /// assert drain order across entities.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.op_log.lock().clone()
    }

    fn record_op(&self, op: &str, id: &str) {
        self.op_log.lock().push(format!("{op}:{id}"));
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable(anyhow!("memory store offline")));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        self.check_reachable()?;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Internal(anyhow!("injected write failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn upsert(&self, user: &User) -> Result<(), StoreError> {
        self.check_writable()?;
        self.record_op("upsert_user", &user.id);
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.check_reachable()?;
        Ok(self.users.get(id).map(|u| u.clone()))
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        self.check_writable()?;
        self.record_op("create_task", &task.id);
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        self.check_writable()?;
        self.record_op("update_task", &task.id);
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.record_op("delete_task", id);
        // No-op when the row is already gone.
        self.tasks.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.check_reachable()?;
        Ok(self.tasks.get(id).map(|t| t.clone()))
    }
}

#[async_trait]
impl DependencyProbe for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_reachable()
    }
}

/// In-memory session store with TTL expiry on read.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, (String, Option<Instant>)>,
    offline: AtomicBool,
}

impl MemorySessionStore {
    /// Creates an empty, online session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles full unreachability.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable(anyhow!("session store offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_reachable()?;
        match self.sessions.get(key) {
            Some(entry) => {
                let (value, expires_at) = entry.value();
                if expires_at.is_some_and(|at| at <= Instant::now()) {
                    drop(entry);
                    self.sessions.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(value.clone()))
                }
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_reachable()?;
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.sessions
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_reachable()?;
        self.sessions.remove(key);
        Ok(())
    }
}

#[async_trait]
impl DependencyProbe for MemorySessionStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_reachable()
    }
}
