//! HTTP surface: configuration, middleware, handlers, the server module,
//! and shutdown control.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use middleware::AuthSubject;
pub use module::NetworkModule;
pub use shutdown::{Lifecycle, ServerState, ShutdownController};
