//! Two-Tier Expiring Storage
//!
//! Process-local cache in front of a shared, authoritative distributed store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     DataStorage (coordinator)                     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  LocalCache (process)          │  DistributedStore (shared)       │
//! │  ┌──────────────────────┐      │  ┌────────────────────────────┐  │
//! │  │ DashMap + per-key TTL│      │  │ dyn DistributedBackend     │  │
//! │  │ best effort          │      │  │ InMemory | Redis           │  │
//! │  └──────────────────────┘      │  └────────────────────────────┘  │
//! │           │ records only       │    records, counters, sets       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency
//!
//! The local tier has no invalidation channel: a write or remove in one
//! process is invisible to another process's local tier until the local
//! TTL lapses. [`LocalConfig::ttl_cap`] bounds that window. The distributed
//! tier is always authoritative.

mod coordinator;
mod distributed;
mod key;
mod local;
mod metrics;
#[cfg(feature = "redis")]
mod redis_backend;
mod value;

use std::time::Duration;

pub use coordinator::{DataStorage, StorageConfig};
pub use distributed::{DistributedBackend, DistributedStore, InMemoryBackend, KeyWrite};
pub use key::{EntityKind, KeyBuilder, KEY_SEPARATOR};
pub use local::{LocalCache, LocalConfig, LocalStats};
pub use metrics::{LatencyTracker, MetricsSnapshot, StorageMetrics};
#[cfg(feature = "redis")]
pub use redis_backend::{RedisBackend, RedisConfig};
pub use value::{Expiring, Storable};

/// Default number of entries held by the local tier
pub const DEFAULT_LOCAL_MAX_ENTRIES: usize = 10_000;

/// Default upper bound on local TTLs (5 minutes)
pub const DEFAULT_LOCAL_TTL_CAP: Duration = Duration::from_secs(5 * 60);

/// Default deadline for a single distributed call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Tests
// =============================================================================
