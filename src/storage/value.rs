//! Storable Values
//!
//! Marker traits for values that can be written through the storage.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// A value that can be persisted in both tiers.
///
/// Struct types whose all-zero `Default` means "absent" should opt into the
/// reserved-default guard with [`reserved_default!`](crate::reserved_default);
/// such values are rejected on write. Primitives, strings and enums keep the
/// default implementation and are never rejected.
pub trait Storable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// True if this value is the type's reserved "absent" value
    fn is_reserved_default(&self) -> bool {
        false
    }
}

/// A record that knows the instant it stops being valid
pub trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;
}

/// Implements [`Storable`] for a struct, rejecting `Default::default()`.
///
/// ```ignore
/// #[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
/// struct ViewerState { views: u32, owner: bool }
///
/// ephemera::reserved_default!(ViewerState);
/// ```
#[macro_export]
macro_rules! reserved_default {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::storage::Storable for $ty {
                fn is_reserved_default(&self) -> bool {
                    *self == <$ty as ::core::default::Default>::default()
                }
            }
        )+
    };
}

macro_rules! exempt {
    ($($ty:ty),+ $(,)?) => {
        $(impl Storable for $ty {})+
    };
}

exempt!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, DateTime<Utc>,
);

impl Storable for Uuid {
    fn is_reserved_default(&self) -> bool {
        self.is_nil()
    }
}

impl Storable for serde_json::Value {}

impl<T: Storable> Storable for Vec<T> {}

impl<T: Storable> Storable for Option<T> {}

impl<T: Storable + Eq + Hash> Storable for HashSet<T> {}

impl<K: Storable + Ord, V: Storable> Storable for BTreeMap<K, V> {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Viewer {
        views: u32,
        owner: bool,
    }

    crate::reserved_default!(Viewer);

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    enum Visibility {
        Public,
        Unlisted,
    }

    impl Storable for Visibility {}

    #[test]
    fn test_struct_default_is_reserved() {
        assert!(Viewer::default().is_reserved_default());
        assert!(!Viewer {
            views: 1,
            owner: false
        }
        .is_reserved_default());
    }

    #[test]
    fn test_primitives_are_exempt() {
        assert!(!0i64.is_reserved_default());
        assert!(!false.is_reserved_default());
        assert!(!String::new().is_reserved_default());
        assert!(!Visibility::Public.is_reserved_default());
        assert!(!Visibility::Unlisted.is_reserved_default());
    }

    #[test]
    fn test_nil_uuid_is_reserved() {
        assert!(Uuid::nil().is_reserved_default());
        assert!(!Uuid::new_v4().is_reserved_default());
    }
}
