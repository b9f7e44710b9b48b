//! Storage Keys
//!
//! Namespaced string keys of the form `kind::id` (optionally `prefix::kind::id`).

use std::fmt;

use uuid::Uuid;

/// Separator between key segments
pub const KEY_SEPARATOR: &str = "::";

/// Kinds of entity addressed through the storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A stored entry (text + images)
    Entry,
    /// A creator identity
    Creator,
    /// Membership set of entries owned by a creator
    CreatorEntries,
    /// View counter of an entry
    EntryViews,
    /// Per-viewer state
    Viewer,
    /// Abuse report
    Report,
}

impl EntityKind {
    /// Namespace segment for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Entry => "entry",
            EntityKind::Creator => "creator",
            EntityKind::CreatorEntries => "creator-entries",
            EntityKind::EntryViews => "entry-views",
            EntityKind::Viewer => "viewer",
            EntityKind::Report => "report",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds namespaced keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: Option<String>,
}

impl KeyBuilder {
    /// Key builder without an application prefix
    pub fn new() -> Self {
        Self::default()
    }

    /// Key builder that prepends `prefix::` to every key
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
        }
    }

    /// Application prefix, if any
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Build a key for `kind` and `id`
    pub fn build(&self, kind: EntityKind, id: impl fmt::Display) -> String {
        match &self.prefix {
            Some(prefix) => format!(
                "{prefix}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{id}",
                kind.as_str()
            ),
            None => format!("{}{KEY_SEPARATOR}{id}", kind.as_str()),
        }
    }

    pub fn entry_key(&self, entry_id: Uuid) -> String {
        self.build(EntityKind::Entry, entry_id)
    }

    pub fn creator_key(&self, creator_id: Uuid) -> String {
        self.build(EntityKind::Creator, creator_id)
    }

    /// Key of the set of entries owned by a creator
    pub fn creator_entries_key(&self, creator_id: Uuid) -> String {
        self.build(EntityKind::CreatorEntries, creator_id)
    }

    pub fn entry_views_key(&self, entry_id: Uuid) -> String {
        self.build(EntityKind::EntryViews, entry_id)
    }

    /// Viewers are identified by an opaque string (session or fingerprint)
    pub fn viewer_key(&self, viewer: &str) -> String {
        self.build(EntityKind::Viewer, viewer)
    }

    pub fn report_key(&self, report_id: Uuid) -> String {
        self.build(EntityKind::Report, report_id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_build_without_prefix() {
        let keys = KeyBuilder::new();
        let id = Uuid::parse_str("6f1c1d2e-3a4b-4c5d-8e9f-0a1b2c3d4e5f").unwrap();
        assert_eq!(
            keys.entry_key(id),
            "entry::6f1c1d2e-3a4b-4c5d-8e9f-0a1b2c3d4e5f"
        );
        assert_eq!(
            keys.creator_entries_key(id),
            "creator-entries::6f1c1d2e-3a4b-4c5d-8e9f-0a1b2c3d4e5f"
        );
    }

    #[test]
    fn test_build_with_prefix() {
        let keys = KeyBuilder::with_prefix("paste");
        assert_eq!(keys.viewer_key("abc"), "paste::viewer::abc");
        assert_eq!(keys.prefix(), Some("paste"));
    }

    #[test]
    fn test_empty_prefix_is_no_prefix() {
        assert_eq!(KeyBuilder::with_prefix(""), KeyBuilder::new());
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let keys = KeyBuilder::new();
        let id = Uuid::new_v4();
        let all = [
            keys.entry_key(id),
            keys.creator_key(id),
            keys.creator_entries_key(id),
            keys.entry_views_key(id),
            keys.report_key(id),
        ];
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    proptest! {
        #[test]
        fn prop_build_is_deterministic(id in "[a-z0-9-]{1,40}") {
            let keys = KeyBuilder::new();
            prop_assert_eq!(
                keys.build(EntityKind::Viewer, &id),
                keys.build(EntityKind::Viewer, &id)
            );
        }

        #[test]
        fn prop_distinct_kinds_never_collide(id in "[a-z0-9-]{1,40}") {
            let keys = KeyBuilder::new();
            prop_assert_ne!(
                keys.build(EntityKind::Entry, &id),
                keys.build(EntityKind::Report, &id)
            );
        }
    }
}
