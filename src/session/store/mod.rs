//! Pluggable persistence for refresh tokens.
//!
//! Entries are keyed by a fingerprint of the access JWT they were issued
//! alongside. The store is best effort: a missed write costs the client one
//! trip through re-authentication, never an outage. Lookups must treat a
//! missing entry as "re-authenticate", not as a denial.

mod disk;
mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub use disk::DiskStore;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::{Error, Result};

/// Refresh-token persistence keyed by access-token fingerprint.
///
/// Implementations must be linearizable per key; the refresh coordinator
/// relies on delete-then-put ordering to guarantee an old fingerprint never
/// resolves to a refresh token it no longer owns.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Backend name for log output
    fn backend_name(&self) -> &'static str;

    /// Look up the refresh token stored for an access-token fingerprint
    async fn get(&self, fingerprint: &str) -> Result<Option<String>>;

    /// Store a refresh token under an access-token fingerprint
    async fn put(&self, fingerprint: &str, refresh_token: &str, ttl: Duration) -> Result<()>;

    /// Delete the entry for an access-token fingerprint
    async fn delete(&self, fingerprint: &str) -> Result<()>;
}

/// Stable fingerprint of an access JWT, used as the store key
#[must_use]
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Construct a store from a `redis://`, `file://` or `memory://` URL
pub async fn from_url(url: &str) -> Result<Arc<dyn RefreshTokenStore>> {
    if url.starts_with("redis://") {
        return Ok(Arc::new(RedisStore::new(url).await?));
    }
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Arc::new(DiskStore::new(path.into())?));
    }
    if url.starts_with("memory://") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Err(Error::Config(format!("unsupported store url: {url}")))
}
