//! Services built on [`DataStorage`](crate::storage::DataStorage)
//!
//! - [`ownership`] - membership-set TTL reconciliation on attach
//! - [`views`] - entry view counters

pub mod ownership;
pub mod views;

pub use ownership::{compute_set_ttl, Clock, MemberKeyFn, OwnershipReconciler};
pub use views::ViewCounter;
