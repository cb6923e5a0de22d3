//! Network module with deferred startup lifecycle.
//!
//! `new()` creates resources, `start()` binds the TCP listener, and
//! `serve()` starts accepting connections. The separation lets the rest
//! of the application wire shared state (stores, monitor, scheduler)
//! between `start()` and `serve()`.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{
    create_task, delete_task, get_profile, get_task, health_handler, liveness_handler,
    update_task, upsert_profile, AppState,
};
use super::middleware::{apply_http_layers, require_auth};
use super::shutdown::ShutdownController;

/// Manages the HTTP server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates the shutdown controller
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Returns a shared reference to the shutdown controller.
    ///
    /// Other modules use this to check lifecycle state or trigger
    /// shutdown.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- aggregate dependency health
    /// - `GET /health/live` -- liveness probe
    /// - `GET|PUT /profile`, `POST /tasks`, `GET|PUT|DELETE /tasks/{id}`
    ///   -- bearer-token protected
    pub fn build_router(&self, state: AppState) -> Router {
        let protected = Router::new()
            .route("/profile", get(get_profile).put(upsert_profile))
            .route("/tasks", post(create_task))
            .route(
                "/tasks/{id}",
                put(update_task).get(get_task).delete(delete_task),
            )
            .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .merge(protected)
            .with_state(state);

        apply_http_layers(router, &self.config)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the shutdown signal fires, then drains
    /// in-flight requests and returns. Consumes `self` because the
    /// listener moves into the server.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server
    /// hits a fatal I/O error.
    pub async fn serve(self, state: AppState) -> anyhow::Result<()> {
        // Build the router before dismantling self: build_router borrows
        // the config, the listener moves into the server.
        let router = self.build_router(state);
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let controller = self.shutdown;

        let mut shutdown = controller.shutdown_receiver();
        controller.set_ready();
        info!("http server ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        controller.set_stopped();
        info!("http server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::buffer::{BufferStore, WriteBuffer};
    use crate::health::{HealthMonitor, MonitorConfig};
    use crate::network::middleware::mint_token;
    use crate::storage::memory::MemoryStore;

    use super::*;

    fn test_state(dir: &tempfile::TempDir) -> (Arc<MemoryStore>, AppState) {
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
        (memory, state)
    }

    #[tokio::test]
    async fn health_route_needs_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let (_memory, state) = test_state(&dir);
        state.health.probe_once().await;
        let router = NetworkModule::new(NetworkConfig::default()).build_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mutation_route_rejects_missing_token() {
        let dir = tempfile::tempdir().unwrap();
        let (_memory, state) = test_state(&dir);
        let router = NetworkModule::new(NetworkConfig::default()).build_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title":"x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn mutation_route_accepts_valid_token() {
        let dir = tempfile::tempdir().unwrap();
        let (memory, state) = test_state(&dir);
        state.health.probe_once().await;
        let token = mint_token("test-secret", "u1");
        let router = NetworkModule::new(NetworkConfig::default()).build_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tasks")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::from(r#"{"id":"t1","title":"from http"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(memory.get_task("t1").unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let mut module = NetworkModule::new(NetworkConfig {
            port: 0,
            ..NetworkConfig::default()
        });
        let port = module.start().await.unwrap();
        assert_ne!(port, 0);
    }
}
