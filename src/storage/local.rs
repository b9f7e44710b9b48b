//! Local Cache - process-local best-effort tier
//!
//! Typed in-memory cache with per-key TTL. Never authoritative: entries may
//! be missing or stale at any time and a miss is a normal outcome.
//!
//! # Design
//!
//! - DashMap for concurrent access without a global lock
//! - Values kept as `Arc<dyn Any>` so hits skip deserialization
//! - TTL capped by [`LocalConfig::ttl_cap`] to bound cross-process staleness
//! - Capacity guard: purge expired entries, then skip the insert if still full

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::{DEFAULT_LOCAL_MAX_ENTRIES, DEFAULT_LOCAL_TTL_CAP};

/// Local cache configuration
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Maximum number of entries held locally
    pub max_entries: usize,
    /// Upper bound for local TTLs (`None` = use the record's TTL as-is)
    pub ttl_cap: Option<Duration>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_LOCAL_MAX_ENTRIES,
            ttl_cap: Some(DEFAULT_LOCAL_TTL_CAP),
        }
    }
}

struct LocalEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

impl LocalEntry {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local cache tier
pub struct LocalCache {
    entries: DashMap<String, LocalEntry>,
    config: LocalConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    skipped: AtomicU64,
}

impl LocalCache {
    /// Create a new local cache with default configuration
    pub fn new() -> Self {
        Self::with_config(LocalConfig::default())
    }

    /// Create a new local cache with custom configuration
    pub fn with_config(config: LocalConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Store a value; returns false if it was not cached
    pub fn set<T>(&self, key: &str, value: T, ttl: Duration) -> bool
    where
        T: Send + Sync + 'static,
    {
        let ttl = self.effective_ttl(ttl);
        if ttl.is_zero() {
            return false;
        }

        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(key) {
            self.purge_expired();
            if self.entries.len() >= self.config.max_entries {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        self.entries.insert(
            key.to_string(),
            LocalEntry {
                value: Arc::new(value),
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    /// Get a value; expired entries and type mismatches are misses
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => Some(entry.value.downcast_ref::<T>().cloned()),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match hit {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.entries
                    .remove_if(key, |_, entry| entry.is_expired(Instant::now()));
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Check for a live entry
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop all expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    fn effective_ttl(&self, ttl: Duration) -> Duration {
        match self.config.ttl_cap {
            Some(cap) => ttl.min(cap),
            None => ttl,
        }
    }

    /// Remaining local lifetime of a live entry
    pub fn time_to_live(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at - now)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Inserts skipped because the cache was full
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> LocalStats {
        LocalStats {
            entries: self.len(),
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
            skipped: self.skipped(),
        }
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Local cache statistics
#[derive(Debug, Clone)]
pub struct LocalStats {
    /// Number of entries (including not yet purged expired ones)
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Expired entries dropped
    pub evictions: u64,
    /// Inserts skipped at capacity
    pub skipped: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn uncapped() -> LocalCache {
        LocalCache::with_config(LocalConfig {
            ttl_cap: None,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_set_get() {
        let cache = LocalCache::new();
        assert!(cache.set("entry::1", "hello".to_string(), Duration::from_secs(60)));

        assert_eq!(cache.get::<String>("entry::1"), Some("hello".to_string()));
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn test_miss() {
        let cache = LocalCache::new();
        assert_eq!(cache.get::<String>("missing"), None);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_miss() {
        let cache = LocalCache::new();
        cache.set("k", 42i64, Duration::from_secs(60));

        assert_eq!(cache.get::<String>("k"), None);
        assert_eq!(cache.get::<i64>("k"), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let cache = uncapped();
        cache.set("k", 1u32, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get::<u32>("k"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get::<u32>("k"), None);
        assert!(!cache.contains("k"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_cap() {
        let cache = LocalCache::with_config(LocalConfig {
            ttl_cap: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        cache.set("k", 1u32, Duration::from_secs(3600));
        assert_eq!(cache.time_to_live("k"), Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_cached() {
        let cache = LocalCache::new();
        assert!(!cache.set("k", 1u32, Duration::ZERO));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let cache = LocalCache::new();
        cache.set("k", "original".to_string(), Duration::from_secs(60));
        cache.set("k", "replaced".to_string(), Duration::from_secs(60));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<String>("k"), Some("replaced".to_string()));
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = LocalCache::new();
        cache.set("k", 1u8, Duration::from_secs(60));

        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
        assert!(!cache.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_guard_purges_expired_first() {
        let cache = LocalCache::with_config(LocalConfig {
            max_entries: 2,
            ttl_cap: None,
        });
        cache.set("a", 1u8, Duration::from_secs(5));
        cache.set("b", 2u8, Duration::from_secs(60));

        // Full with live entries: skip
        assert!(!cache.set("c", 3u8, Duration::from_secs(60)));
        assert_eq!(cache.skipped(), 1);

        // "a" expires, making room
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.set("c", 3u8, Duration::from_secs(60)));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<u8>("c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = uncapped();
        for i in 0..10u32 {
            let ttl = if i % 2 == 0 { 1 } else { 100 };
            cache.set(&format!("k{}", i), i, Duration::from_secs(ttl));
        }

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 5);
        assert_eq!(cache.len(), 5);
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = LocalCache::new();
        cache.set("k", 1u8, Duration::from_secs(60));
        cache.get::<u8>("k");
        cache.get::<u8>("missing");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.5);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache = Arc::new(LocalCache::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("obj-{}-{}", t, i);
                        cache.set(&key, i, Duration::from_secs(60));
                        assert_eq!(cache.get::<i32>(&key), Some(i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 4000);
    }
}
