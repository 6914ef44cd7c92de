//! Shared key-value cache with per-entry TTLs.
//!
//! The cache is the read-through/write-through store in front of page fetches
//! (1-hour TTL) and domain-traffic lookups (6-hour TTL). All writers compute
//! the same value for the same key, so entries are commutative and
//! last-writer-wins needs no coordination beyond the map lock.
//!
//! Cache failures are never fatal: callers log and continue with the
//! uncached path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use sourcestream_shared::Result;

/// TTL for cached page bodies.
pub const PAGE_TTL: Duration = Duration::from_secs(60 * 60);

/// TTL for cached domain-traffic estimates.
pub const TRAFFIC_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Cache key for a fetched page, derived from a hash of the URL.
pub fn content_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"page:");
    hasher.update(url.as_bytes());
    format!("page:{:x}", hasher.finalize())
}

/// Cache key for a domain's traffic estimate.
pub fn traffic_key(domain: &str) -> String {
    format!("traffic:{}", domain.to_ascii_lowercase())
}

/// A stored value with its expiry.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process shared TTL cache.
///
/// Expiry is lazy: an expired entry misses on `get` and is dropped there;
/// [`MemoryCache::purge_expired`] sweeps the rest.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a non-expired value.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it under the write lock, re-checking expiry since
        // another writer may have refreshed the key in between.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
            entries.remove(key);
            debug!(key, "expired cache entry dropped");
        }
        Ok(None)
    }

    /// Store a value for `ttl`.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    /// Sweep every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of live (possibly expired, not yet swept) entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
