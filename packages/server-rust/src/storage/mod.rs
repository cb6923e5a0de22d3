//! Primary-store implementations behind the repository seams.
//!
//! - [`postgres`]: the authoritative row store (`sqlx` pool)
//! - [`session`]: the Redis session/KV store
//! - [`memory`]: `DashMap`-backed implementations with failure injection
//!   for tests and local development

pub mod memory;
pub mod postgres;
pub mod session;

pub use memory::{MemorySessionStore, MemoryStore};
pub use postgres::PostgresStore;
pub use session::RedisSessionStore;
