//! Data Storage Coordinator
//!
//! Single entry point for services. Fronts the distributed store with the
//! local cache:
//!
//! - `set` writes the local tier, then the distributed tier, and returns the
//!   distributed outcome
//! - `get` / `contains` check the local tier first and fall through
//! - sets and counters always go to the distributed tier
//!
//! Every operation takes a [`CancellationToken`] and is bounded by
//! [`StorageConfig::operation_timeout`].

use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::distributed::{DistributedBackend, DistributedStore, InMemoryBackend};
use super::key::KeyBuilder;
use super::local::{LocalCache, LocalConfig};
use super::metrics::{LatencyTracker, MetricsSnapshot, StorageMetrics};
use super::value::Storable;
use super::DEFAULT_OPERATION_TIMEOUT;
use crate::error::{Error, Result};

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Local tier configuration
    pub local: LocalConfig,
    /// Deadline for each distributed call
    pub operation_timeout: Duration,
    /// Fill the local tier after a distributed hit
    pub populate_local_on_read: bool,
    /// Application namespace prepended to keys
    pub key_prefix: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local: LocalConfig::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            populate_local_on_read: false,
            key_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
}

/// Two-tier storage coordinator
pub struct DataStorage {
    local: LocalCache,
    distributed: DistributedStore,
    keys: KeyBuilder,
    config: StorageConfig,
    metrics: Arc<StorageMetrics>,
}

impl DataStorage {
    /// Create with default configuration
    pub fn new(backend: Arc<dyn DistributedBackend>) -> Self {
        Self::with_config(StorageConfig::default(), backend)
    }

    /// Create with custom configuration
    pub fn with_config(config: StorageConfig, backend: Arc<dyn DistributedBackend>) -> Self {
        let keys = match &config.key_prefix {
            Some(prefix) => KeyBuilder::with_prefix(prefix.clone()),
            None => KeyBuilder::new(),
        };
        Self {
            local: LocalCache::with_config(config.local.clone()),
            distributed: DistributedStore::new(backend),
            keys,
            config,
            metrics: Arc::new(StorageMetrics::new()),
        }
    }

    /// Create with in-memory distributed backend (for testing)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// Store a value in both tiers
    ///
    /// Fails with [`Error::DefaultValueRejected`] (nothing written) for a
    /// reserved default, or with the distributed tier's error. A failed
    /// distributed write leaves no local copy.
    pub async fn set<T: Storable>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.check_ttl(key, ttl)?;
        self.check_not_default(key, &value)?;

        self.local.set(key, value.clone(), ttl);
        let outcome = self
            .guarded(
                "set",
                key,
                Access::Write,
                cancel,
                self.distributed.set(key, &value, ttl),
            )
            .await;

        self.rollback_local_on_failure(key, &outcome);
        if outcome.is_ok() {
            debug!(key, ?ttl, "Stored value");
        }
        outcome
    }

    /// Store two independent keys in one call; `value_v` is the one cached
    /// locally
    #[allow(clippy::too_many_arguments)]
    pub async fn cross_value_set<K: Storable, V: Storable>(
        &self,
        key_k: &str,
        value_k: K,
        ttl_k: Duration,
        key_v: &str,
        value_v: V,
        ttl_v: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.check_ttl(key_k, ttl_k)?;
        self.check_ttl(key_v, ttl_v)?;
        self.check_not_default(key_k, &value_k)?;
        self.check_not_default(key_v, &value_v)?;

        self.local.set(key_v, value_v.clone(), ttl_v);
        let outcome = self
            .guarded(
                "cross_value_set",
                key_v,
                Access::Write,
                cancel,
                self.distributed
                    .cross_value_set(key_k, &value_k, ttl_k, key_v, &value_v, ttl_v),
            )
            .await;

        self.rollback_local_on_failure(key_v, &outcome);
        outcome
    }

    /// Read a value, local tier first
    pub async fn get<T: Storable>(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        if let Some(value) = self.local.get::<T>(key) {
            self.metrics.record_local_hit();
            debug!(key, "Local hit");
            return Ok(Some(value));
        }
        self.metrics.record_local_miss();

        let value = self
            .guarded(
                "get",
                key,
                Access::Read,
                cancel,
                self.distributed.get::<T>(key),
            )
            .await?
            .filter(|v| !v.is_reserved_default());

        match value {
            Some(value) => {
                self.metrics.record_distributed_hit();
                debug!(key, "Distributed hit");
                if self.config.populate_local_on_read {
                    self.populate_local(key, &value, cancel).await;
                }
                Ok(Some(value))
            }
            None => {
                self.metrics.record_distributed_miss();
                Ok(None)
            }
        }
    }

    /// Check either tier for a key, local tier first
    pub async fn contains(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        if self.local.contains(key) {
            return Ok(true);
        }
        self.guarded(
            "contains",
            key,
            Access::Read,
            cancel,
            self.distributed.contains(key),
        )
        .await
    }

    /// Remove from both tiers
    ///
    /// Distributed failures are logged and swallowed; only cancellation is
    /// reported.
    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        self.local.remove(key);
        match self
            .guarded(
                "remove",
                key,
                Access::Write,
                cancel,
                self.distributed.remove(key),
            )
            .await
        {
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                warn!(key, error = %err, "Distributed remove failed, continuing");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Add a member to a set and apply `ttl` to the set key
    pub async fn add_to_set<T: Storable>(
        &self,
        key: &str,
        member: &T,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.check_ttl(key, ttl)?;
        self.guarded(
            "add_to_set",
            key,
            Access::Write,
            cancel,
            self.distributed.add_to_set(key, member, ttl),
        )
        .await
    }

    pub async fn is_member_of_set<T: Storable>(
        &self,
        key: &str,
        member: &T,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.guarded(
            "is_member_of_set",
            key,
            Access::Read,
            cancel,
            self.distributed.is_member_of_set(key, member),
        )
        .await
    }

    /// All members of a set; empty if the set does not exist
    pub async fn get_set<T>(&self, key: &str, cancel: &CancellationToken) -> Result<HashSet<T>>
    where
        T: Storable + Eq + Hash,
    {
        self.guarded(
            "get_set",
            key,
            Access::Read,
            cancel,
            self.distributed.get_set(key),
        )
        .await
    }

    /// Atomically increment the counter at `key` and return the new value
    pub async fn increment_and_get(&self, key: &str, cancel: &CancellationToken) -> Result<i64> {
        self.guarded(
            "increment_and_get",
            key,
            Access::Write,
            cancel,
            self.distributed.increment_and_get(key),
        )
        .await
    }

    /// Remaining distributed TTL of a key
    pub async fn time_to_live(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>> {
        self.guarded(
            "time_to_live",
            key,
            Access::Read,
            cancel,
            self.distributed.time_to_live(key),
        )
        .await
    }

    /// Run a distributed call under the caller's token and the op deadline
    async fn guarded<T, F>(
        &self,
        operation: &'static str,
        key: &str,
        access: Access,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.config.operation_timeout;
        let tracker = LatencyTracker::start();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled {
                operation,
                key: key.to_string(),
            }),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation,
                    key: key.to_string(),
                    after: timeout,
                }),
            },
        };

        match &outcome {
            Ok(_) => match access {
                Access::Read => self.metrics.record_read_latency(tracker.elapsed()),
                Access::Write => self.metrics.record_write_latency(tracker.elapsed()),
            },
            Err(Error::Cancelled { .. }) => {
                self.metrics.record_cancellation();
                debug!(operation, key, "Cancelled");
            }
            Err(Error::Timeout { .. }) => {
                self.metrics.record_timeout();
                warn!(operation, key, ?timeout, "Distributed call timed out");
            }
            Err(err) => {
                self.metrics.record_backend_error();
                warn!(operation, key, error = %err, "Distributed call failed");
            }
        }
        outcome
    }

    fn check_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(Error::InvalidTtl {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn check_not_default<T: Storable>(&self, key: &str, value: &T) -> Result<()> {
        if value.is_reserved_default() {
            self.metrics.record_rejected_write();
            let type_name = std::any::type_name::<T>();
            warn!(key, type_name, "Rejected reserved default value");
            return Err(Error::DefaultValueRejected {
                key: key.to_string(),
                type_name,
            });
        }
        Ok(())
    }

    /// Drop the local copy when the distributed write was not applied
    fn rollback_local_on_failure(&self, key: &str, outcome: &Result<()>) {
        if outcome.is_err() {
            self.local.remove(key);
        }
    }

    async fn populate_local<T: Storable>(&self, key: &str, value: &T, cancel: &CancellationToken) {
        match self
            .guarded(
                "time_to_live",
                key,
                Access::Read,
                cancel,
                self.distributed.time_to_live(key),
            )
            .await
        {
            Ok(Some(remaining)) => {
                self.local.set(key, value.clone(), remaining);
            }
            Ok(None) => {}
            Err(err) => debug!(key, error = %err, "Skipped local population"),
        }
    }

    /// Key builder configured with this storage's prefix
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Get reference to the local tier
    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    /// Get reference to the distributed tier
    pub fn distributed(&self) -> &DistributedStore {
        &self.distributed
    }

    /// Get configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Get metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct ViewerState {
        views: u32,
        owner: bool,
    }

    crate::reserved_default!(ViewerState);

    const MINUTE: Duration = Duration::from_secs(60);

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_set_get() {
        let storage = DataStorage::in_memory();
        let state = ViewerState {
            views: 3,
            owner: true,
        };

        storage
            .set("viewer::a", state.clone(), MINUTE, &token())
            .await
            .unwrap();

        let read = storage.get::<ViewerState>("viewer::a", &token()).await.unwrap();
        assert_eq!(read, Some(state));
        assert_eq!(storage.metrics().local_hits, 1);
    }

    #[tokio::test]
    async fn test_set_writes_both_tiers() {
        let storage = DataStorage::in_memory();
        storage
            .set("k", "v".to_string(), MINUTE, &token())
            .await
            .unwrap();

        assert!(storage.local().contains("k"));
        assert_eq!(
            storage.distributed().get::<String>("k").await.unwrap(),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn test_default_value_rejected() {
        let storage = DataStorage::in_memory();

        let result = storage
            .set("viewer::a", ViewerState::default(), MINUTE, &token())
            .await;

        assert_matches!(result, Err(Error::DefaultValueRejected { .. }));
        assert!(!storage.local().contains("viewer::a"));
        assert!(!storage.distributed().contains("viewer::a").await.unwrap());
        assert_eq!(storage.metrics().rejected_writes, 1);
    }

    #[tokio::test]
    async fn test_primitive_zero_is_stored() {
        let storage = DataStorage::in_memory();
        storage.set("zero", 0i64, MINUTE, &token()).await.unwrap();
        assert_eq!(storage.get::<i64>("zero", &token()).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let storage = DataStorage::in_memory();
        let result = storage.set("k", 1u8, Duration::ZERO, &token()).await;
        assert_matches!(result, Err(Error::InvalidTtl { .. }));
    }

    #[tokio::test]
    async fn test_distributed_fallback() {
        let storage = DataStorage::in_memory();
        storage
            .distributed()
            .set("k", &"remote".to_string(), MINUTE)
            .await
            .unwrap();

        let read = storage.get::<String>("k", &token()).await.unwrap();
        assert_eq!(read, Some("remote".to_string()));

        // No population in the default configuration
        assert!(!storage.local().contains("k"));
        let metrics = storage.metrics();
        assert_eq!(metrics.local_misses, 1);
        assert_eq!(metrics.distributed_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_populate_local_on_read() {
        let config = StorageConfig {
            populate_local_on_read: true,
            ..Default::default()
        };
        let storage = DataStorage::with_config(config, Arc::new(InMemoryBackend::new()));
        storage
            .distributed()
            .set("k", &"remote".to_string(), Duration::from_secs(90))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        storage.get::<String>("k", &token()).await.unwrap();

        assert_eq!(storage.local().time_to_live("k"), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_get_absent_is_not_error() {
        let storage = DataStorage::in_memory();
        assert_eq!(storage.get::<String>("never", &token()).await.unwrap(), None);
        assert!(!storage.contains("never", &token()).await.unwrap());
    }

    #[tokio::test]
    async fn test_stored_default_reads_as_absent() {
        let storage = DataStorage::in_memory();
        storage
            .distributed()
            .set("viewer::a", &ViewerState::default(), MINUTE)
            .await
            .unwrap();

        assert_eq!(
            storage.get::<ViewerState>("viewer::a", &token()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_contains_checks_local_first() {
        let backend = Arc::new(InMemoryBackend::new());
        let storage = DataStorage::new(backend.clone());
        storage.local().set("local-only", 1u8, MINUTE);

        assert!(storage.contains("local-only", &token()).await.unwrap());
        assert_eq!(backend.reads(), 0);

        assert!(!storage.contains("elsewhere", &token()).await.unwrap());
        assert_eq!(backend.reads(), 1);
    }

    #[tokio::test]
    async fn test_local_hit_skips_distributed_tier() {
        let backend = Arc::new(InMemoryBackend::new());
        let storage = DataStorage::new(backend.clone());
        storage.set("k", 5u32, MINUTE, &token()).await.unwrap();

        assert_eq!(storage.get::<u32>("k", &token()).await.unwrap(), Some(5));
        assert_eq!(backend.reads(), 0);
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let storage = DataStorage::in_memory();
        storage.remove("never", &token()).await.unwrap();

        storage.set("k", 1u8, MINUTE, &token()).await.unwrap();
        storage.remove("k", &token()).await.unwrap();
        storage.remove("k", &token()).await.unwrap();

        assert_eq!(storage.get::<u8>("k", &token()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cross_value_set() {
        let storage = DataStorage::in_memory();
        storage
            .cross_value_set(
                "creator::c",
                "alice".to_string(),
                Duration::from_secs(3600),
                "entry::e",
                "hello".to_string(),
                MINUTE,
                &token(),
            )
            .await
            .unwrap();

        // Only the primary value is cached locally
        assert!(storage.local().contains("entry::e"));
        assert!(!storage.local().contains("creator::c"));
        assert_eq!(
            storage.get::<String>("creator::c", &token()).await.unwrap(),
            Some("alice".to_string())
        );
    }

    #[tokio::test]
    async fn test_cross_value_set_rejects_either_default() {
        let storage = DataStorage::in_memory();
        let result = storage
            .cross_value_set(
                "viewer::a",
                ViewerState::default(),
                MINUTE,
                "entry::e",
                "hello".to_string(),
                MINUTE,
                &token(),
            )
            .await;

        assert_matches!(result, Err(Error::DefaultValueRejected { .. }));
        assert!(!storage.local().contains("entry::e"));
        assert!(!storage.contains("entry::e", &token()).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_set_leaves_no_local_state() {
        let storage = DataStorage::in_memory();
        let cancel = token();
        cancel.cancel();

        let result = storage.set("k", 1u8, MINUTE, &cancel).await;

        assert_matches!(result, Err(Error::Cancelled { operation: "set", .. }));
        assert!(!storage.local().contains("k"));
        assert!(!storage.distributed().contains("k").await.unwrap());
        assert_eq!(storage.metrics().cancellations, 1);
    }

    #[tokio::test]
    async fn test_sets_and_counters_pass_through() {
        let storage = DataStorage::in_memory();
        let member = uuid::Uuid::new_v4();

        storage
            .add_to_set("owned", &member, MINUTE, &token())
            .await
            .unwrap();
        assert!(storage
            .is_member_of_set("owned", &member, &token())
            .await
            .unwrap());
        let members: HashSet<uuid::Uuid> = storage.get_set("owned", &token()).await.unwrap();
        assert_eq!(members, HashSet::from([member]));
        assert!(!storage.local().contains("owned"));

        assert_eq!(storage.increment_and_get("views", &token()).await.unwrap(), 1);
        assert_eq!(storage.increment_and_get("views", &token()).await.unwrap(), 2);
        assert!(!storage.local().contains("views"));
    }

    #[tokio::test]
    async fn test_counter_overflow_surfaces_as_error() {
        let storage = DataStorage::in_memory();
        storage.set("n", i64::MAX, MINUTE, &token()).await.unwrap();

        let result = storage.increment_and_get("n", &token()).await;

        assert_matches!(result, Err(Error::Backend { operation: "increment", .. }));
    }

    #[tokio::test]
    async fn test_key_prefix_config() {
        let config = StorageConfig {
            key_prefix: Some("paste".to_string()),
            ..Default::default()
        };
        let storage = DataStorage::with_config(config, Arc::new(InMemoryBackend::new()));
        assert_eq!(storage.keys().viewer_key("v"), "paste::viewer::v");
    }
}
