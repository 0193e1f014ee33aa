//! The per-category boundary.
//!
//! Each feedback category (photos, galleries, ...) plugs in one
//! [`CategoryManager`]. The manager owns what the account-indexed store
//! deliberately does not: the item-indexed reverse lookup (who submitted
//! feedback for an item), the category-specific checkpoint encoding, and
//! any category-local background work. The housekeeper and the checkpoint
//! coordinator drive categories exclusively through this trait.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crate::accounts::{Account, AccountId};
use crate::types::{CategoryTag, FeedbackItem, ItemProfile, Submission, SubmissionBody};

// ---------------------------------------------------------------------------
// Snapshot entry
// ---------------------------------------------------------------------------

/// One entry of a per-item snapshot: the submitting account and its
/// submission as of snapshot time.
#[derive(Debug, Clone)]
pub struct ItemSubmission {
    pub account: Arc<Account>,
    pub submission: Submission,
}

// ---------------------------------------------------------------------------
// CategoryManager
// ---------------------------------------------------------------------------

/// External per-category collaborator.
///
/// Snapshot reads (`feedback_items`, `submissions_for_item`) are not
/// required to be atomic with respect to concurrent add/remove traffic;
/// eventual consistency is part of the contract. `replace_profile` must be
/// idempotent under the "already rebound" check and must do its work under
/// the owning account's lock.
pub trait CategoryManager: Send + Sync {
    /// Wire tag identifying this category in checkpoints.
    fn tag(&self) -> CategoryTag;

    /// Build a submission bound to an already-canonical profile.
    fn create_submission(
        &self,
        profile: Arc<ItemProfile>,
        body: SubmissionBody,
        now_ms: i64,
    ) -> Submission;

    /// Every item the category currently knows about.
    fn feedback_items(&self) -> Vec<FeedbackItem>;

    /// Point-in-time view of all submissions for `item`.
    fn submissions_for_item(&self, item: &FeedbackItem) -> HashMap<AccountId, ItemSubmission>;

    /// Rebind the account's live submission for the profile's item to
    /// `profile`, if the submission still exists and still differs.
    /// Returns the live submission, or `None` when it no longer exists.
    fn replace_profile(
        &self,
        account: &Arc<Account>,
        profile: &Arc<ItemProfile>,
    ) -> Option<Submission>;

    /// Notification that `submission` was stored for `account`.
    fn on_added(&self, account: &Arc<Account>, submission: &Submission);

    /// Notification that the account's submission for `item` was removed.
    fn on_removed(&self, account: &Arc<Account>, item: &FeedbackItem);

    // --- checkpoint codec --------------------------------------------------

    /// Encode a profile for the checkpoint stream.
    ///
    /// # Errors
    ///
    /// Propagates stream write failures.
    fn write_profile(&self, w: &mut dyn Write, profile: &ItemProfile) -> io::Result<()>;

    /// Decode a profile from the checkpoint stream.
    ///
    /// # Errors
    ///
    /// Fails on truncation or malformed content (`InvalidData`).
    fn read_profile(&self, r: &mut dyn Read) -> io::Result<ItemProfile>;

    /// Encode a submission's category-specific body.
    ///
    /// # Errors
    ///
    /// Propagates stream write failures.
    fn write_submission(&self, w: &mut dyn Write, submission: &Submission) -> io::Result<()>;

    /// Decode a submission body from the checkpoint stream.
    ///
    /// # Errors
    ///
    /// Fails on truncation or malformed content (`InvalidData`).
    fn read_submission(&self, r: &mut dyn Read) -> io::Result<SubmissionBody>;

    // --- checkpoint lifecycle ----------------------------------------------

    /// Drop all category-local state (restore clears before replaying).
    fn clear_all(&self);

    /// Re-index one restored submission.
    fn restore_one(&self, account: &Arc<Account>, submission: &Submission);

    /// Hook before the primary checkpoint data is written. The parent
    /// store's data is not in final form at hook time.
    ///
    /// # Errors
    ///
    /// A failing hook aborts the save.
    fn pre_save(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    /// Hook after the primary checkpoint data is written.
    ///
    /// # Errors
    ///
    /// A failing hook fails the save after the primary file is on disk.
    fn post_save(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    /// Hook before in-memory state is cleared for restore.
    ///
    /// # Errors
    ///
    /// A failing hook aborts the restore before anything is cleared.
    fn pre_restore(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    /// Hook after replay has completed.
    ///
    /// # Errors
    ///
    /// A failing hook fails the restore after replay.
    fn post_restore(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    // --- category-local housekeeping ---------------------------------------

    /// Start category-local background tasks (in lockstep with the core
    /// housekeeper).
    fn start_housekeeping(&self) {}

    /// Stop category-local background tasks.
    fn shutdown_housekeeping(&self) {}
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable tag → manager table, fixed at composition time.
pub struct CategoryRegistry {
    by_tag: HashMap<CategoryTag, Arc<dyn CategoryManager>>,
    ordered: Vec<Arc<dyn CategoryManager>>,
}

impl CategoryRegistry {
    /// Build a registry. Later registrations win on duplicate tags, which
    /// only happens on a miswired composition root.
    #[must_use]
    pub fn new(categories: Vec<Arc<dyn CategoryManager>>) -> Self {
        let mut by_tag = HashMap::new();
        for category in &categories {
            by_tag.insert(category.tag(), category.clone());
        }
        Self {
            by_tag,
            ordered: categories,
        }
    }

    #[must_use]
    pub fn by_tag(&self, tag: CategoryTag) -> Option<&Arc<dyn CategoryManager>> {
        self.by_tag.get(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CategoryManager>> {
        self.ordered.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl std::fmt::Debug for CategoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryRegistry")
            .field("tags", &self.by_tag.keys().collect::<Vec<_>>())
            .finish()
    }
}
