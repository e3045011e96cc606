//! Redis-backed refresh-token store.
//!
//! Entry TTLs are delegated to Redis (`SET ... EX`), so expired refresh
//! tokens vanish without a reaper task.

use std::time::Duration;

use async_trait::async_trait;

use super::RefreshTokenStore;
use crate::{Error, Result};

/// Store backed by a shared Redis instance
#[derive(Clone)]
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to a Redis instance from a URL like `redis://localhost:6379`
    pub async fn new(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| Error::Store(format!("redis open: {e}")))?;

        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Store(format!("redis connect: {e}")))?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl RefreshTokenStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();

        let resp: Option<String> = redis::cmd("GET")
            .arg(fingerprint)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Store(format!("redis get: {e}")))?;

        Ok(resp)
    }

    async fn put(&self, fingerprint: &str, refresh_token: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();

        // EX expects integer seconds, clamp to at least 1
        let ttl_seconds: u64 = ttl.as_secs().max(1);

        let _: () = redis::cmd("SET")
            .arg(fingerprint)
            .arg(refresh_token)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Store(format!("redis set: {e}")))?;

        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        let mut conn = self.manager.clone();

        let _: u64 = redis::cmd("DEL")
            .arg(fingerprint)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Store(format!("redis del: {e}")))?;

        Ok(())
    }
}
