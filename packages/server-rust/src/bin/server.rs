//! Writeback server entrypoint.
//!
//! Startup order (each step fatal on error): configuration, tracing,
//! metrics exporter, `PostgreSQL` pool + schema, Redis, buffer store,
//! health monitor, drain scheduler, HTTP server. Teardown hooks register
//! in that order and run in reverse under the shutdown deadline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use writeback_server::buffer::{BufferConfig, BufferStore, WriteBuffer};
use writeback_server::drain::{DrainConfig, DrainScheduler};
use writeback_server::health::{HealthMonitor, MonitorConfig};
use writeback_server::network::{AppState, Lifecycle, NetworkConfig, NetworkModule};
use writeback_server::storage::{PostgresStore, RedisSessionStore};
use writeback_server::traits::{DependencyProbe, TaskRepository, UserRepository};

/// Offline-resilient user/task backend.
#[derive(Debug, Parser)]
#[command(name = "writeback-server", version)]
struct Args {
    /// Bind address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis connection string.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// HS256 secret for bearer-token verification.
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// Path of the durable buffer file.
    #[arg(long, env = "BUFFER_PATH", default_value = "data/buffer.redb")]
    buffer_path: PathBuf,

    /// Bucket (table) name inside the buffer file.
    #[arg(long, env = "BUFFER_BUCKET", default_value = "operations")]
    buffer_bucket: String,

    /// Advisory upper bound on buffered records.
    #[arg(long, env = "BUFFER_MAX_SIZE")]
    buffer_max_size: Option<u64>,

    /// TTL for buffered records; expired records are cleaned up.
    #[arg(long, env = "BUFFER_RETENTION_HOURS")]
    buffer_retention_hours: Option<u64>,

    /// Drain scheduler tick period.
    #[arg(long, env = "SYNC_INTERVAL_SECONDS", default_value_t = 30)]
    sync_interval_seconds: u64,

    /// Records drained per tick.
    #[arg(long, env = "SYNC_BATCH_SIZE", default_value_t = 50)]
    sync_batch_size: usize,

    /// Failed applies permitted before a record is dropped.
    #[arg(long, env = "MAX_RETRY_ATTEMPTS", default_value_t = 3)]
    max_retry_attempts: u32,

    /// Request timeout inherited by repository calls.
    #[arg(long, env = "REQUEST_TIMEOUT_SECONDS", default_value_t = 5)]
    request_timeout_seconds: u64,

    /// Deadline for the reverse-order teardown hooks.
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECONDS", default_value_t = 15)]
    shutdown_timeout_seconds: u64,

    /// Dependency probe interval.
    #[arg(long, env = "HEALTH_PROBE_INTERVAL_SECONDS", default_value_t = 10)]
    health_probe_interval_seconds: u64,

    /// Prometheus exporter port; disabled when absent.
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Comma-separated CORS origins, `*` for any.
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(args).await {
        error!(error = %err, "fatal startup or runtime error");
        return Err(err);
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    if let Some(port) = args.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("install prometheus exporter")?;
        info!(port, "metrics exporter listening");
    }

    let request_timeout = Duration::from_secs(args.request_timeout_seconds);

    // Primary stores. Unreachable at startup is fatal; once we are up, the
    // buffer absorbs outages instead.
    let postgres = Arc::new(
        PostgresStore::connect(&args.database_url, request_timeout)
            .await
            .context("connect to postgres")?,
    );
    postgres.initialize().await.context("run schema migrations")?;

    let redis = Arc::new(
        RedisSessionStore::connect(&args.redis_url)
            .await
            .context("connect to redis")?,
    );

    let buffer_config = BufferConfig {
        path: args.buffer_path.clone(),
        bucket: args.buffer_bucket.clone(),
        max_size: args.buffer_max_size,
        retention: args
            .buffer_retention_hours
            .map(|hours| Duration::from_secs(hours * 3600)),
        ..BufferConfig::default()
    };
    let store = Arc::new(BufferStore::open_config(&buffer_config).context("open buffer store")?);
    info!(path = %buffer_config.path.display(), "buffer store open");

    let users: Arc<dyn UserRepository> = postgres.clone();
    let tasks: Arc<dyn TaskRepository> = postgres.clone();

    let health = Arc::new(HealthMonitor::new(
        MonitorConfig {
            probe_interval: Duration::from_secs(args.health_probe_interval_seconds),
            ..MonitorConfig::default()
        },
        postgres.clone() as Arc<dyn DependencyProbe>,
        redis.clone() as Arc<dyn DependencyProbe>,
        store.clone(),
    ));
    health.probe_once().await;

    let scheduler = Arc::new(DrainScheduler::new(
        store.clone(),
        health.clone(),
        users.clone(),
        tasks.clone(),
        DrainConfig {
            interval: Duration::from_secs(args.sync_interval_seconds),
            batch_size: args.sync_batch_size,
            max_retries: args.max_retry_attempts,
            retention: buffer_config.retention,
            cleanup_every: DrainConfig::DEFAULT_CLEANUP_EVERY,
        },
    ));

    let (monitor_stop, monitor_rx) = watch::channel(false);
    let monitor_handle = health.start(monitor_rx);

    let (drain_stop, drain_rx) = watch::channel(false);
    let drain_handle = scheduler.clone().start(drain_rx);

    let mut module = NetworkModule::new(NetworkConfig {
        host: args.host.clone(),
        port: args.port,
        cors_origins: args.cors_origins.clone(),
        request_timeout,
    });
    let port = module.start().await.context("bind http listener")?;
    let controller = module.shutdown_controller();

    let state = AppState {
        buffer: Arc::new(WriteBuffer::new(
            store.clone(),
            health.clone(),
            users.clone(),
            tasks.clone(),
            buffer_config.max_size,
        )),
        health: health.clone(),
        users,
        tasks,
        jwt_secret: Arc::new(args.jwt_secret.clone()),
    };
    let server_handle = tokio::spawn(module.serve(state));
    info!(port, "writeback server started");

    // Teardown hooks, registered in startup order and run in reverse:
    // HTTP first, then drain scheduler, health monitor, buffer store,
    // and finally the store clients.
    let lifecycle = Lifecycle::new();
    {
        let postgres = postgres.clone();
        lifecycle.register("postgres-pool", move || async move {
            postgres.close().await;
            Ok(())
        });
    }
    {
        // Redis's connection manager closes on drop; moving the Arc in
        // here scopes its lifetime to this hook.
        let redis = redis.clone();
        lifecycle.register("redis-client", move || async move {
            drop(redis);
            Ok(())
        });
    }
    {
        let store = store.clone();
        lifecycle.register("buffer-store", move || async move {
            match Arc::try_unwrap(store) {
                Ok(store) => store.close(),
                // A straggling clone still releases the lock when the
                // process exits moments later.
                Err(_) => info!("buffer store has live references, releasing on exit"),
            }
            Ok(())
        });
    }
    lifecycle.register("health-monitor", move || async move {
        let _ = monitor_stop.send(true);
        monitor_handle.await.context("join health monitor")?;
        Ok(())
    });
    lifecycle.register("drain-scheduler", move || async move {
        let _ = drain_stop.send(true);
        drain_handle.await.context("join drain scheduler")?;
        Ok(())
    });
    {
        let controller = controller.clone();
        lifecycle.register("http-server", move || async move {
            controller.trigger_shutdown();
            match server_handle.await {
                Ok(result) => result,
                Err(err) => Err(err.into()),
            }
        });
    }

    // Release this function's own handles so the buffer-store hook holds
    // the last reference once the earlier hooks have run.
    drop(scheduler);
    drop(health);
    drop(store);
    drop(postgres);
    drop(redis);

    wait_for_signal().await;
    info!("shutdown signal received");

    let failures = lifecycle
        .shutdown(Duration::from_secs(args.shutdown_timeout_seconds))
        .await;
    if failures > 0 {
        error!(failures, "some teardown hooks did not complete cleanly");
    }
    info!("writeback server stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
