//! Ephemera - Two-Tier Expiring Storage
//!
//! Stores short-lived content and per-viewer state addressed by opaque
//! identifiers. Every value expires on its own TTL; a process-local cache
//! fronts a shared, authoritative distributed store (Redis-compatible).
//!
//! # Architecture
//!
//! ```text
//! Services (OwnershipReconciler, ViewCounter)
//!        │
//! DataStorage ──▶ LocalCache (process, best effort)
//!        │
//!        └──────▶ DistributedStore ──▶ InMemoryBackend | RedisBackend
//! ```
//!
//! # Modules
//!
//! - [`error`] - Error types
//! - [`services`] - Ownership reconciliation and view counters
//! - [`storage`] - Two-tier storage coordinator, tiers and keys

pub mod error;
pub mod services;
pub mod storage;

// Re-export commonly used types
pub use error::{Error, Result};
pub use services::{OwnershipReconciler, ViewCounter};
pub use storage::{DataStorage, Expiring, KeyBuilder, Storable, StorageConfig};
