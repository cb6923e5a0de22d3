//! Redis-backed session store and KV health probe.
//!
//! Sessions are opaque string blobs with a TTL; the server never inspects
//! them. The same connection manager answers the health monitor's `PING`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use writeback_core::StoreError;

use crate::traits::{DependencyProbe, SessionStore};

/// Session store over a Redis connection manager.
///
/// The manager reconnects transparently; while it is down, calls fail as
/// `unavailable` and the health monitor flips the KV store to down.
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    /// Connects to `url` and performs an initial `PING`.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the server cannot be reached; startup treats
    /// this as fatal.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::unavailable)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::unavailable)?;
        let store = Self { conn };
        store.ping().await?;
        Ok(store)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(classify)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let () = conn.del(key).await.map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl DependencyProbe for RedisSessionStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn classify(err: redis::RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
        StoreError::unavailable(err)
    } else {
        StoreError::Internal(err.into())
    }
}
