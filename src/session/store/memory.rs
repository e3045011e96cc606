//! In-process refresh-token store for single-node deployments and tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::RefreshTokenStore;
use crate::Result;

struct Entry {
    refresh_token: String,
    expires_at: Instant,
}

/// Map-backed store; entries are dropped lazily on lookup once expired
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(fingerprint) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.refresh_token.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            self.entries.write().remove(fingerprint);
        }
        Ok(None)
    }

    async fn put(&self, fingerprint: &str, refresh_token: &str, ttl: Duration) -> Result<()> {
        self.entries.write().insert(
            fingerprint.to_string(),
            Entry {
                refresh_token: refresh_token.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        self.entries.write().remove(fingerprint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn put_then_get_returns_token() {
        let store = MemoryStore::new();
        store.put("fp-1", "refresh-1", TTL).await.unwrap();
        assert_eq!(store.get("fp-1").await.unwrap().as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = MemoryStore::new();
        store.put("fp-1", "refresh-1", TTL).await.unwrap();
        store.delete("fp-1").await.unwrap();
        assert!(store.get("fp-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let store = MemoryStore::new();
        store
            .put("fp-1", "refresh-1", Duration::from_secs(0))
            .await
            .unwrap();
        assert!(store.get("fp-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry() {
        let store = MemoryStore::new();
        store.put("fp-1", "old", TTL).await.unwrap();
        store.put("fp-1", "new", TTL).await.unwrap();
        assert_eq!(store.get("fp-1").await.unwrap().as_deref(), Some("new"));
    }
}
