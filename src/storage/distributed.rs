//! Distributed Store - shared authoritative tier
//!
//! Network-backed store reachable by every application instance.
//!
//! # Design
//!
//! - [`DistributedBackend`]: object-safe async trait over serialized strings
//! - [`DistributedStore`]: typed wrapper that serializes with `serde_json`
//! - Atomic primitives (increment, set-add) are the backend's own; the store
//!   adds no locking
//! - Pluggable backend (in-memory for tests, Redis for deployments)

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::value::Storable;
use crate::error::{Error, Result};

/// One key write of a cross-value set
#[derive(Debug, Clone)]
pub struct KeyWrite {
    pub key: String,
    pub value: String,
    pub ttl: Duration,
}

impl KeyWrite {
    pub fn new(key: impl Into<String>, value: String, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            ttl,
        }
    }
}

/// Distributed storage backend trait
///
/// Values are already serialized. Every call may fail with
/// [`Error::Backend`]; absence is `Ok(None)` / `Ok(false)` / empty.
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    /// Get a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a value, TTL measured from now
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Write two independent keys with independent TTLs in one call
    async fn set_pair(&self, first: KeyWrite, second: KeyWrite) -> Result<()>;

    /// Delete a key; deleting an absent key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining TTL; `None` if the key is absent or never expires
    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>>;

    /// Atomically increment a counter (created at 0) and return the new value
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Add a member to a set and apply `ttl` to the set key
    async fn add_to_set(&self, key: &str, member: String, ttl: Duration) -> Result<()>;

    /// Check set membership
    async fn is_member(&self, key: &str, member: &str) -> Result<bool>;

    /// All members of a set (empty if absent)
    async fn members(&self, key: &str) -> Result<Vec<String>>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

// =============================================================================
// In-memory backend
// =============================================================================

#[derive(Debug, Clone)]
enum Slot {
    Value(String),
    Counter(i64),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct StoredItem {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl StoredItem {
    fn new(slot: Slot, ttl: Option<Duration>) -> Self {
        Self {
            slot,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

fn wrong_type(operation: &'static str, key: &str) -> Error {
    Error::backend(
        operation,
        key,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )
}

/// In-memory backend with Redis-like semantics.
///
/// Uses `tokio::time::Instant`, so TTLs follow a paused test clock.
#[derive(Default)]
pub struct InMemoryBackend {
    items: DashMap<String, StoredItem>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.items.iter().filter(|i| !i.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Read a live item, dropping it if expired
    fn live(&self, key: &str) -> Option<StoredItem> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let item = self.items.get(key).map(|i| i.value().clone())?;
        if item.is_expired(now) {
            self.items.remove_if(key, |_, i| i.is_expired(now));
            return None;
        }
        Some(item)
    }
}

#[async_trait]
impl DistributedBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.live(key).map(|i| i.slot) {
            None => Ok(None),
            Some(Slot::Value(value)) => Ok(Some(value)),
            Some(Slot::Counter(count)) => Ok(Some(count.to_string())),
            Some(Slot::Set(_)) => Err(wrong_type("get", key)),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.items
            .insert(key.to_string(), StoredItem::new(Slot::Value(value), Some(ttl)));
        Ok(())
    }

    async fn set_pair(&self, first: KeyWrite, second: KeyWrite) -> Result<()> {
        self.set(&first.key, first.value, first.ttl).await?;
        self.set(&second.key, second.value, second.ttl).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.items.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live(key)
            .and_then(|i| i.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        // The entry guard holds the shard lock for the whole read-modify-write
        let mut item = self
            .items
            .entry(key.to_string())
            .or_insert_with(|| StoredItem::new(Slot::Counter(0), None));
        if item.is_expired(now) {
            *item = StoredItem::new(Slot::Counter(0), None);
        }

        let current = match &item.slot {
            Slot::Counter(count) => *count,
            Slot::Value(raw) => raw.parse::<i64>().map_err(|_| {
                Error::backend("increment", key, "ERR value is not an integer or out of range")
            })?,
            Slot::Set(_) => return Err(wrong_type("increment", key)),
        };
        let next = current.checked_add(1).ok_or_else(|| {
            Error::backend("increment", key, "ERR increment or decrement would overflow")
        })?;
        item.slot = Slot::Counter(next);
        Ok(next)
    }

    async fn add_to_set(&self, key: &str, member: String, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let mut item = self
            .items
            .entry(key.to_string())
            .or_insert_with(|| StoredItem::new(Slot::Set(HashSet::new()), Some(ttl)));
        if item.is_expired(now) {
            *item = StoredItem::new(Slot::Set(HashSet::new()), Some(ttl));
        }

        match &mut item.slot {
            Slot::Set(members) => {
                members.insert(member);
            }
            _ => return Err(wrong_type("add_to_set", key)),
        }
        item.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        match self.live(key).map(|i| i.slot) {
            None => Ok(false),
            Some(Slot::Set(members)) => Ok(members.contains(member)),
            Some(_) => Err(wrong_type("is_member", key)),
        }
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        match self.live(key).map(|i| i.slot) {
            None => Ok(Vec::new()),
            Some(Slot::Set(members)) => Ok(members.into_iter().collect()),
            Some(_) => Err(wrong_type("members", key)),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Typed store
// =============================================================================

/// Typed access to a distributed backend
pub struct DistributedStore {
    backend: Arc<dyn DistributedBackend>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DistributedStore {
    /// Create a store over the given backend
    pub fn new(backend: Arc<dyn DistributedBackend>) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create with in-memory backend (for testing)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    pub async fn set<T: Storable>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.backend.set(key, encoded, ttl).await
    }

    pub async fn get<T: Storable>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key).await? {
            Some(raw) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(key).await
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        self.backend.exists(key).await
    }

    pub async fn time_to_live(&self, key: &str) -> Result<Option<Duration>> {
        self.backend.time_to_live(key).await
    }

    pub async fn increment_and_get(&self, key: &str) -> Result<i64> {
        self.backend.increment(key).await
    }

    pub async fn add_to_set<T: Storable>(
        &self,
        key: &str,
        member: &T,
        ttl: Duration,
    ) -> Result<()> {
        let encoded = serde_json::to_string(member)?;
        self.backend.add_to_set(key, encoded, ttl).await
    }

    pub async fn is_member_of_set<T: Storable>(&self, key: &str, member: &T) -> Result<bool> {
        let encoded = serde_json::to_string(member)?;
        self.backend.is_member(key, &encoded).await
    }

    /// Decoded set members; empty on miss
    pub async fn get_set<T>(&self, key: &str) -> Result<HashSet<T>>
    where
        T: Storable + Eq + std::hash::Hash,
    {
        self.backend
            .members(key)
            .await?
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(Error::from))
            .collect()
    }

    pub async fn cross_value_set<K: Storable, V: Storable>(
        &self,
        key_k: &str,
        value_k: &K,
        ttl_k: Duration,
        key_v: &str,
        value_v: &V,
        ttl_v: Duration,
    ) -> Result<()> {
        let first = KeyWrite::new(key_k, serde_json::to_string(value_k)?, ttl_k);
        let second = KeyWrite::new(key_v, serde_json::to_string(value_v)?, ttl_v);
        self.backend.set_pair(first, second).await
    }

    pub fn backend(&self) -> &Arc<dyn DistributedBackend> {
        &self.backend
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
