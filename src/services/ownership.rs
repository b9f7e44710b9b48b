//! Ownership / Expiration Reconciler
//!
//! Attaches an owned object to its owner's membership set and recomputes the
//! set's TTL so the set outlives its members without being refreshed forever.
//!
//! # Algorithm
//!
//! 1. Read the owner's set. Empty: TTL = `member_expires_at - now`.
//! 2. Resolve every existing member's record expiry (one lookup per member).
//! 3. `max_existing` = latest resolved expiry.
//! 4. TTL = `|max_existing - member_expires_at|`.
//! 5. `add_to_set(owner_key, member_id, TTL)`.
//!
//! Step 4 measures the span between the two expiry points and applies it from
//! now; it is not `max(..) - now`. Members whose records already expired are
//! skipped, and a zero span falls back to the member's remaining lifetime.
//!
//! The read-then-write sequence is not compare-and-swap: concurrent attaches
//! to the same owner race and the last `add_to_set` TTL wins.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::{DataStorage, Expiring, Storable};

/// Source of "now" for TTL computation
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Maps a member id to the key of its record
pub type MemberKeyFn = Arc<dyn Fn(Uuid) -> String + Send + Sync>;

/// TTL to apply to an owner's set when attaching a member.
///
/// Returns `None` if the member is already expired at `now`.
pub fn compute_set_ttl(
    now: DateTime<Utc>,
    member_expires_at: DateTime<Utc>,
    max_existing: Option<DateTime<Utc>>,
) -> Option<Duration> {
    let remaining = (member_expires_at - now)
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())?;

    let Some(max_existing) = max_existing else {
        return Some(remaining);
    };

    let span = if max_existing > member_expires_at {
        max_existing - member_expires_at
    } else {
        member_expires_at - max_existing
    };

    Some(
        span.to_std()
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(remaining),
    )
}

/// Reconciles membership-set TTLs for records of type `R`
pub struct OwnershipReconciler<R> {
    storage: Arc<DataStorage>,
    member_key: MemberKeyFn,
    clock: Clock,
    _record: PhantomData<fn() -> R>,
}

impl<R: Storable + Expiring> OwnershipReconciler<R> {
    /// Create a reconciler resolving members through `member_key`
    pub fn new(
        storage: Arc<DataStorage>,
        member_key: impl Fn(Uuid) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            storage,
            member_key: Arc::new(member_key),
            clock: Arc::new(Utc::now),
            _record: PhantomData,
        }
    }

    /// Reconciler for entries owned by creators (`entry::<id>` records)
    pub fn for_entries(storage: Arc<DataStorage>) -> Self {
        let keys = storage.keys().clone();
        Self::new(storage, move |id| keys.entry_key(id))
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Attach `member_id` to the set at `owner_key`, returning the TTL applied
    pub async fn attach(
        &self,
        owner_key: &str,
        member_id: Uuid,
        member_expires_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Duration> {
        let now = (self.clock)();
        let expired = || Error::MemberExpired {
            member: member_id.to_string(),
        };
        if member_expires_at <= now {
            return Err(expired());
        }

        let members: HashSet<Uuid> = self.storage.get_set(owner_key, cancel).await?;
        let max_existing = self.latest_expiry(&members, member_id, cancel).await?;
        let ttl = compute_set_ttl(now, member_expires_at, max_existing).ok_or_else(expired)?;

        self.storage
            .add_to_set(owner_key, &member_id, ttl, cancel)
            .await?;

        info!(
            owner_key,
            %member_id,
            existing = members.len(),
            ?ttl,
            "Attached member"
        );
        Ok(ttl)
    }

    /// Latest expiry among the live records of `members`, excluding `skip`
    async fn latest_expiry(
        &self,
        members: &HashSet<Uuid>,
        skip: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<DateTime<Utc>>> {
        let lookups = members.iter().filter(|id| **id != skip).map(|id| {
            let key = (self.member_key)(*id);
            async move { self.storage.get::<R>(&key, cancel).await }
        });

        let records = try_join_all(lookups).await?;
        let resolved = records.iter().flatten().count();
        if resolved < records.len() {
            debug!(
                missing = records.len() - resolved,
                "Skipping members whose records expired"
            );
        }

        Ok(records.into_iter().flatten().map(|r| r.expires_at()).max())
    }
}

// =============================================================================
// Tests
// =============================================================================
