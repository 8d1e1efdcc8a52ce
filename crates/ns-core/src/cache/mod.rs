//! Key/value cache for threat-intel findings.
//!
//! Consulted by `(provider, ioc)` before every external call; a hit skips
//! the provider entirely. The trait is object-safe so the investigation
//! agent can hold `Arc<dyn TiCache>` and the backing store can be swapped
//! (in-memory LRU here, an external store elsewhere) without touching the
//! agent.
//!
//! Single-writer-per-key atomicity is provided by [`TiCache::set_if_absent`]:
//! when concurrent investigations race to fill the same key, exactly one
//! write wins and the losers observe the winner's value.

pub mod error;
pub mod memory;

pub use error::{CacheError, CacheResult};
pub use memory::LruTtlCache;

use async_trait::async_trait;
use std::time::Duration;

/// Cache hit/miss statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

impl CacheStats {
    /// Hit ratio in [0,1]; 0 when the cache has seen no lookups.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Object-safe TTL cache.
#[async_trait]
pub trait TiCache: Send + Sync + 'static {
    /// Gets a live (non-expired) value.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Sets a value with a TTL. `Duration::ZERO` means no expiration.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Sets the value only if the key is absent or expired. Returns `true`
    /// if this call's value was stored.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool>;

    /// Removes a key; returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Current statistics.
    async fn stats(&self) -> CacheStats;
}

/// Cache key for a `(provider, ioc)` pair.
pub fn ti_key(provider: &str, ioc: &str) -> String {
    format!("{provider}:{ioc}")
}
