//! On-disk refresh-token store.
//!
//! One JSON file per entry under a base directory, named by the access-token
//! fingerprint. Suits single-host deployments that must survive restarts
//! without a Redis dependency.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::RefreshTokenStore;
use crate::{Error, Result};

/// Persisted store entry
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    refresh_token: String,
    /// Unix timestamp after which the entry is dead
    expires_at: u64,
}

/// File-per-entry store rooted at a base directory
pub struct DiskStore {
    base_dir: PathBuf,
}

impl DiskStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .map_err(|e| Error::Store(format!("failed to create store dir: {e}")))?;
        }
        Ok(Self { base_dir })
    }

    /// Create a store in the default location (~/.authgate/tokens)
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Store("cannot determine home directory".to_string()))?;
        Self::new(home.join(".authgate").join("tokens"))
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        // fingerprints are hex, safe as file names
        self.base_dir.join(format!("{fingerprint}.json"))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl RefreshTokenStore for DiskStore {
    fn backend_name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        let path = self.entry_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token entry");
                return Ok(None);
            }
        };

        match serde_json::from_str::<StoredEntry>(&content) {
            Ok(entry) if entry.expires_at > now_secs() => Ok(Some(entry.refresh_token)),
            Ok(_) => {
                debug!("Stored refresh token entry has expired");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse refresh token entry");
                Ok(None)
            }
        }
    }

    async fn put(&self, fingerprint: &str, refresh_token: &str, ttl: Duration) -> Result<()> {
        let path = self.entry_path(fingerprint);
        let entry = StoredEntry {
            refresh_token: refresh_token.to_string(),
            expires_at: now_secs() + ttl.as_secs(),
        };

        let content = serde_json::to_string(&entry)
            .map_err(|e| Error::Store(format!("failed to serialize entry: {e}")))?;

        fs::write(&path, content)
            .map_err(|e| Error::Store(format!("failed to write entry: {e}")))?;

        // Restrict to owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&path, perms);
        }

        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        let path = self.entry_path(fingerprint);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| Error::Store(format!("failed to delete entry: {e}")))?;
        }
        Ok(())
    }
}
