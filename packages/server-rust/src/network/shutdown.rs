//! Shutdown signalling and the ordered teardown registry.
//!
//! [`ShutdownController`] broadcasts the stop signal and tracks the server
//! lifecycle state with `ArcSwap` for lock-free reads. [`Lifecycle`] holds
//! named teardown hooks and runs them in reverse registration order under
//! a bounded deadline; a failing or timed-out hook is logged and the rest
//! still run.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

/// Server lifecycle state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Server is initializing (not yet accepting requests).
    Starting,
    /// Server is fully operational and accepting requests.
    Ready,
    /// Server is draining in-flight requests (no new requests accepted).
    Draining,
    /// Server has fully stopped.
    Stopped,
}

/// Broadcasts shutdown and exposes the current lifecycle state.
///
/// Background tasks (health monitor, drain scheduler) and the HTTP server
/// each hold a receiver and exit when it flips to `true`.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    state: Arc<ArcSwap<ServerState>>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            signal: tx,
            state: Arc::new(ArcSwap::from_pointee(ServerState::Starting)),
        }
    }

    /// Transitions to `Ready`, indicating the server accepts requests.
    pub fn set_ready(&self) {
        self.state.store(Arc::new(ServerState::Ready));
    }

    /// Returns a receiver that is notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Initiates shutdown: transitions to `Draining` and signals all
    /// receivers.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(ServerState::Draining));
        // Ignore send errors -- receivers may have been dropped
        let _ = self.signal.send(true);
    }

    /// Marks teardown complete.
    pub fn set_stopped(&self) {
        self.state.store(Arc::new(ServerState::Stopped));
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        **self.state.load()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

type ShutdownHook =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

/// Ordered registry of named teardown hooks.
///
/// Hooks register in startup order and run in reverse, so the HTTP server
/// (registered last) stops first and the store clients (registered first)
/// close last.
#[derive(Default)]
pub struct Lifecycle {
    hooks: Mutex<Vec<(String, ShutdownHook)>>,
}

impl Lifecycle {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named teardown hook. Registration order is preserved;
    /// execution order is its reverse.
    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks
            .lock()
            .push((name.into(), Box::new(move || Box::pin(hook()))));
    }

    /// Runs all hooks in reverse registration order under one shared
    /// deadline. Returns the number of hooks that failed, timed out, or
    /// were skipped because the deadline was exhausted.
    pub async fn shutdown(&self, deadline: Duration) -> usize {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        let deadline_at = Instant::now() + deadline;
        let mut failures = 0;

        let mut remaining = hooks.into_iter().rev();
        while let Some((name, hook)) = remaining.next() {
            let budget = deadline_at.saturating_duration_since(Instant::now());
            if budget.is_zero() {
                warn!(hook = %name, "shutdown deadline exhausted, skipping remaining hooks");
                failures += 1 + remaining.count();
                break;
            }
            match tokio::time::timeout(budget, hook()).await {
                Ok(Ok(())) => info!(hook = %name, "shutdown hook completed"),
                Ok(Err(err)) => {
                    warn!(hook = %name, error = %err, "shutdown hook failed");
                    failures += 1;
                }
                Err(_) => {
                    warn!(hook = %name, "shutdown hook timed out");
                    failures += 1;
                }
            }
        }
        failures
    }
}
