//! In-memory LRU cache with per-entry TTL.

use super::{CacheResult, CacheStats, TiCache};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_CAPACITY: usize = 10_000;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Utc::now() + ChronoDuration::milliseconds(ttl.as_millis() as i64))
        };
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// LRU + TTL [`TiCache`] backed by process memory.
///
/// The LRU list bounds memory under IOC churn; TTL bounds staleness per
/// entry. Expired entries count as misses and are dropped on access.
pub struct LruTtlCache {
    entries: Mutex<LruCache<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LruTtlCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl Default for LruTtlCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TiCache for LruTtlCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                entries.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.lock().await;
        entries.put(key.to_string(), Entry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        let live = entries.get(key).is_some_and(|e| !e.is_expired());
        if live {
            return Ok(false);
        }
        entries.put(key.to_string(), Entry::new(value.to_vec(), ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        Ok(entries.pop(key).is_some())
    }

    async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len() as u64,
        }
    }
}
