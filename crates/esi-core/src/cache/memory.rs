//! In-memory fragment cache

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::clock::{Clock, SystemClock};
use crate::error::CoreError;

/// A cached value together with its freshness at lookup time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFragment {
    pub value: String,
    pub expired: bool,
}

/// Storage for fetched fragments keyed by fully-qualified URL.
///
/// Lookups return stale values too; the caller decides whether to revalidate.
#[async_trait]
pub trait FragmentCache: Send + Sync {
    /// Look up `key`; `CoreError::CacheMiss` when absent
    async fn get(&self, key: &str) -> Result<CachedFragment, CoreError>;

    /// Store `value`, fresh for `expires_in_millis` from now
    async fn set(&self, key: &str, value: String, expires_in_millis: u64) -> Result<(), CoreError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expiration_time: i64,
}

/// Cache lookup statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hit_count: u64,
    pub stale_count: u64,
    pub miss_count: u64,
}

/// Unbounded in-memory cache with injectable clock
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    storage: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    stale: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a cache backed by the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cache with a custom clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            storage: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len(),
            hit_count: self.hits.load(Ordering::Relaxed),
            stale_count: self.stale.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FragmentCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<CachedFragment, CoreError> {
        let entry = match self.storage.read().get(key) {
            Some(entry) => entry.clone(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(CoreError::CacheMiss);
            }
        };

        let expired = self.clock.now_millis() >= entry.expiration_time;
        if expired {
            self.stale.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        Ok(CachedFragment {
            value: entry.value,
            expired,
        })
    }

    async fn set(&self, key: &str, value: String, expires_in_millis: u64) -> Result<(), CoreError> {
        let ttl = i64::try_from(expires_in_millis).unwrap_or(i64::MAX);
        let expiration_time = self.clock.now_millis().saturating_add(ttl);

        debug!("Caching {} ({} bytes, ttl {} ms)", key, value.len(), expires_in_millis);

        self.storage.write().insert(
            key.to_string(),
            CacheEntry {
                value,
                expiration_time,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    #[tokio::test]
    async fn test_reports_unexpired_value() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::with_clock(clock.clone());

        cache.set("x", "y".to_string(), 5).await.unwrap();
        clock.tick(4);

        let result = cache.get("x").await.unwrap();
        assert_eq!(result.value, "y");
        assert!(!result.expired);
    }

    #[tokio::test]
    async fn test_reports_expired_value() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::with_clock(clock.clone());

        cache.set("x", "y".to_string(), 5).await.unwrap();
        clock.tick(5);

        let result = cache.get("x").await.unwrap();
        assert_eq!(result.value, "y");
        assert!(result.expired);

        clock.tick(5_000);
        let result = cache.get("x").await.unwrap();
        assert_eq!(result.value, "y");
        assert!(result.expired);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_immediately_stale() {
        let cache = MemoryCache::with_clock(Arc::new(ManualClock::new(100)));

        cache.set("x", "y".to_string(), 0).await.unwrap();

        let result = cache.get("x").await.unwrap();
        assert_eq!(result.value, "y");
        assert!(result.expired);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let cache = MemoryCache::new();
        let result = cache.get("nope").await;
        assert!(matches!(result, Err(CoreError::CacheMiss)));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::with_clock(clock.clone());

        cache.set("x", "old".to_string(), 0).await.unwrap();
        cache.set("x", "new".to_string(), 1_000).await.unwrap();

        let result = cache.get("x").await.unwrap();
        assert_eq!(result.value, "new");
        assert!(!result.expired);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::with_clock(clock.clone());

        cache.set("fresh", "a".to_string(), 10).await.unwrap();
        cache.set("stale", "b".to_string(), 0).await.unwrap();

        let _ = cache.get("fresh").await;
        let _ = cache.get("stale").await;
        let _ = cache.get("missing").await;

        assert_eq!(
            cache.stats(),
            CacheStats {
                entry_count: 2,
                hit_count: 1,
                stale_count: 1,
                miss_count: 1,
            }
        );
    }
}
