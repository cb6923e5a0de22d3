//! Writeback Server — axum backend with an offline-resilient write path:
//! durable buffer, health monitor, drain scheduler, and `PostgreSQL`/Redis
//! primary stores.

pub mod buffer;
pub mod drain;
pub mod health;
pub mod network;
pub mod storage;
pub mod traits;

pub use buffer::{BufferConfig, BufferRecord, BufferStore, EntityKind, OpKind, WriteBuffer};
pub use drain::{DrainConfig, DrainScheduler};
pub use health::{HealthMonitor, HealthSnapshot, MonitorConfig};
pub use network::{AppState, Lifecycle, NetworkConfig, NetworkModule, ShutdownController};
pub use traits::{
    BufferOutcome, DependencyProbe, MutationBuffer, SessionStore, TaskRepository, UserRepository,
};


/// Integration tests for the full write path.
///
/// Exercises the end-to-end flow: handler -> bridge -> buffer store ->
/// drain scheduler -> repository, across an outage and recovery.
#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::{Extension, Json};
    use writeback_core::{CreateTaskRequest, UpsertProfileRequest};

    use crate::buffer::{BufferStore, WriteBuffer};
    use crate::drain::{DrainConfig, DrainScheduler};
    use crate::health::{HealthMonitor, MonitorConfig};
    use crate::network::handlers::{create_task, get_task, upsert_profile, AppState};
    use crate::network::middleware::AuthSubject;
    use crate::storage::memory::{MemorySessionStore, MemoryStore};

    struct World {
        _dir: tempfile::TempDir,
        store: Arc<BufferStore>,
        memory: Arc<MemoryStore>,
        cache: Arc<MemorySessionStore>,
        health: Arc<HealthMonitor>,
        scheduler: DrainScheduler,
        state: AppState,
    }

    fn world() -> World {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            BufferStore::open(dir.path().join("buffer.redb"), "operations").unwrap(),
        );
        let memory = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemorySessionStore::new());
        let health = Arc::new(HealthMonitor::new(
            MonitorConfig::default(),
            memory.clone(),
            cache.clone(),
            store.clone(),
        ));
        let scheduler = DrainScheduler::new(
            store.clone(),
            health.clone(),
            memory.clone(),
            memory.clone(),
            DrainConfig {
                interval: Duration::from_millis(20),
                ..DrainConfig::default()
            },
        );
        let buffer = Arc::new(WriteBuffer::new(
            store.clone(),
            health.clone(),
            memory.clone(),
            memory.clone(),
            None,
        ));
        let state = AppState {
            buffer,
            health: health.clone(),
            users: memory.clone(),
            tasks: memory.clone(),
            jwt_secret: Arc::new("test-secret".to_string()),
        };
        World {
            _dir: dir,
            store,
            memory,
            cache,
            health,
            scheduler,
            state,
        }
    }

    #[tokio::test]
    async fn online_profile_write_is_immediately_visible() {
        let w = world();
        w.health.probe_once().await;

        let response = upsert_profile(
            State(w.state.clone()),
            Extension(AuthSubject("u1".to_string())),
            Json(UpsertProfileRequest {
                role: Some("admin".to_string()),
                ..UpsertProfileRequest::default()
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(w.memory.get_user("u1").unwrap().role, "admin");
        assert_eq!(w.store.size().unwrap(), 0);
    }

    #[tokio::test]
    async fn outage_buffers_then_recovery_drains() {
        let w = world();

        // Outage: the primary row store is down.
        w.memory.set_offline(true);
        w.health.probe_once().await;

        let response = create_task(
            State(w.state.clone()),
            Extension(AuthSubject("u1".to_string())),
            Json(CreateTaskRequest {
                id: Some("t1".to_string()),
                title: "written during the outage".to_string(),
                description: None,
                status: None,
                priority: Some(3),
            }),
        )
        .await;

        // Durably accepted even though the store is down.
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(w.store.size().unwrap(), 1);
        assert!(w.memory.get_task("t1").is_none());

        // Recovery: one drain tick replays the buffered create.
        w.memory.set_offline(false);
        w.health.probe_once().await;
        w.scheduler.run_tick().await;

        assert_eq!(w.store.size().unwrap(), 0);
        let fetched = get_task(
            State(w.state.clone()),
            Extension(AuthSubject("u1".to_string())),
            Path("t1".to_string()),
        )
        .await;
        assert_eq!(fetched.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn kv_outage_alone_also_buffers() {
        let w = world();
        w.cache.set_offline(true);
        w.health.probe_once().await;
        assert!(!w.health.is_online());

        let response = upsert_profile(
            State(w.state.clone()),
            Extension(AuthSubject("u1".to_string())),
            Json(UpsertProfileRequest::default()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(w.store.size().unwrap(), 1);
    }

    #[tokio::test]
    async fn buffered_records_survive_restart_and_drain_after() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.redb");

        // First process life: buffer one task during an outage, then exit.
        {
            let w = {
                let store = Arc::new(BufferStore::open(&path, "operations").unwrap());
                let memory = Arc::new(MemoryStore::new());
                let health = Arc::new(HealthMonitor::new(
                    MonitorConfig::default(),
                    memory.clone(),
                    memory.clone(),
                    store.clone(),
                ));
                let buffer = Arc::new(WriteBuffer::new(
                    store.clone(),
                    health.clone(),
                    memory.clone(),
                    memory.clone(),
                    None,
                ));
                (store, memory, health, buffer)
            };
            let (store, memory, health, buffer) = w;
            memory.set_offline(true);
            health.probe_once().await;
            let task = writeback_core::Task::new("t1", "u1", "persisted");
            crate::traits::MutationBuffer::buffer_task(
                buffer.as_ref(),
                crate::buffer::OpKind::Create,
                &task,
            )
            .await
            .unwrap();
            assert_eq!(store.size().unwrap(), 1);
            drop(buffer);
            drop(health);
            if let Ok(store) = Arc::try_unwrap(store) {
                store.close();
            }
        }

        // Second process life: reopen, recover, drain.
        let store = Arc::new(BufferStore::open(&path, "operations").unwrap());
        let memory = Arc::new(MemoryStore::new());
        let health = Arc::new(HealthMonitor::new(
            MonitorConfig::default(),
            memory.clone(),
            memory.clone(),
            store.clone(),
        ));
        health.probe_once().await;
        let scheduler = DrainScheduler::new(
            store.clone(),
            health,
            memory.clone(),
            memory.clone(),
            DrainConfig::default(),
        );
        scheduler.run_tick().await;

        assert!(memory.get_task("t1").is_some());
        assert_eq!(store.size().unwrap(), 0);
    }
}
