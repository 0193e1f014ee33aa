//! Content-addressed cache of item profiles.
//!
//! Every profile that enters the store is interned here first, so at most
//! one canonical `Arc<ItemProfile>` exists per distinct profile value and
//! reference identity doubles as a fast equality check downstream.
//!
//! Entries carry their first-insertion wall-clock time and are only ever
//! removed by the housekeeper's garbage-collection phase (or a checkpoint
//! restore), never by submission removal — the cache does not reference
//! count. The GC rule is strict: an entry created at or after the
//! housekeeper's snapshot time is never collected by that pass, because it
//! may belong to a submission the snapshot did not yet see.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::sync::lock;
use crate::types::{CategoryTag, ItemProfile, now_ms};

/// Interning cache keyed by structural profile equality.
///
/// The map key *is* the canonical instance; the value is the creation
/// timestamp in epoch milliseconds. A single mutex gives insert-if-absent
/// the required at-most-one-winner guarantee.
#[derive(Debug, Default)]
pub struct ItemProfileCache {
    entries: Mutex<HashMap<Arc<ItemProfile>, i64>>,
}

impl ItemProfileCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical instance for `profile`, inserting it with the
    /// current timestamp if no structurally equal entry exists.
    ///
    /// The recorded timestamp always belongs to the instance that became
    /// canonical: a losing concurrent caller gets the winner's `Arc` and
    /// the winner's timestamp stands.
    pub fn intern(&self, profile: ItemProfile) -> Arc<ItemProfile> {
        let mut entries = lock(&self.entries);
        if let Some((canonical, _)) = entries.get_key_value(&profile) {
            return canonical.clone();
        }
        let canonical = Arc::new(profile);
        entries.insert(canonical.clone(), now_ms());
        canonical
    }

    /// Remove the entry structurally equal to `profile`. No-op if absent.
    pub fn remove(&self, profile: &ItemProfile) {
        lock(&self.entries).remove(profile);
    }

    /// Creation timestamp of the cached entry equal to `profile`, if any.
    #[must_use]
    pub fn created_at_ms(&self, profile: &ItemProfile) -> Option<i64> {
        lock(&self.entries).get(profile).copied()
    }

    /// Number of distinct cached profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Drop every entry. Used by checkpoint restore before replay.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Garbage-collect one category: remove entries whose item belongs to
    /// `category`, whose creation time is strictly before `cutoff_ms`, and
    /// which are not in `referenced`. Returns how many were removed.
    ///
    /// `cutoff_ms` is the housekeeper's snapshot time; the strict
    /// comparison is what keeps a profile interned mid-pass safe.
    pub fn collect_category(
        &self,
        category: CategoryTag,
        cutoff_ms: i64,
        referenced: &HashSet<Arc<ItemProfile>>,
    ) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|profile, created_at| {
            profile.item().category != category
                || *created_at >= cutoff_ms
                || referenced.contains(profile.as_ref())
        });
        before - entries.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeedbackItem;

    fn profile(category: i16, key: &str, name: &str) -> ItemProfile {
        ItemProfile::new(
            FeedbackItem::new(CategoryTag(category), key),
            name,
            format!("https://img.example/{key}.jpg"),
            vec![],
        )
    }

    // === Interning =========================================================

    #[test]
    fn intern_returns_same_instance_for_equal_values() {
        let cache = ItemProfileCache::new();
        let a = cache.intern(profile(1, "p1", "Dawn"));
        let b = cache.intern(profile(1, "p1", "Dawn"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn intern_distinguishes_distinct_values() {
        let cache = ItemProfileCache::new();
        let a = cache.intern(profile(1, "p1", "Dawn"));
        let b = cache.intern(profile(1, "p1", "Dusk"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn size_grows_once_per_distinct_value() {
        let cache = ItemProfileCache::new();
        for _ in 0..5 {
            cache.intern(profile(1, "p1", "Dawn"));
        }
        assert_eq!(cache.len(), 1);
        cache.intern(profile(2, "p1", "Dawn"));
        assert_eq!(cache.len(), 2);
    }

    // === Removal ===========================================================

    #[test]
    fn remove_is_keyed_structurally_and_tolerates_absence() {
        let cache = ItemProfileCache::new();
        cache.intern(profile(1, "p1", "Dawn"));
        cache.remove(&profile(1, "p1", "Dawn"));
        assert!(cache.is_empty());
        cache.remove(&profile(1, "p1", "Dawn")); // no-op
        assert!(cache.is_empty());
    }

    // === Garbage collection ================================================

    #[test]
    fn collect_respects_category_cutoff_and_references() {
        let cache = ItemProfileCache::new();
        let stale = cache.intern(profile(1, "p1", "Dawn"));
        let kept = cache.intern(profile(1, "p2", "Dusk"));
        let other_category = cache.intern(profile(2, "p3", "Noon"));

        let cutoff = now_ms() + 1; // everything above was created before this
        let referenced: HashSet<Arc<ItemProfile>> = [kept.clone()].into_iter().collect();

        let removed = cache.collect_category(CategoryTag(1), cutoff, &referenced);
        assert_eq!(removed, 1);
        assert!(cache.created_at_ms(&stale).is_none());
        assert!(cache.created_at_ms(&kept).is_some());
        assert!(cache.created_at_ms(&other_category).is_some());
    }

    #[test]
    fn collect_never_touches_entries_created_at_or_after_cutoff() {
        let cache = ItemProfileCache::new();
        let fresh = cache.intern(profile(1, "p1", "Dawn"));
        let created = cache.created_at_ms(&fresh).expect("entry exists");

        // Cutoff at the exact creation time: strict `<` must protect it
        // even though nothing references it.
        let removed = cache.collect_category(CategoryTag(1), created, &HashSet::new());
        assert_eq!(removed, 0);
        assert!(cache.created_at_ms(&fresh).is_some());
    }
}
