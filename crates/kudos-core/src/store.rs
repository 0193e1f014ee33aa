//! Per-account submission store.
//!
//! The store is account-indexed only: it maps an account to that account's
//! submissions by feedback item. Reverse lookup (all submitters for an
//! item) belongs to the category managers.
//!
//! # Locking discipline
//!
//! The unit of mutual exclusion is the account. Each account gets a slot
//! holding a `Mutex<AccountEntry>` — that mutex *is* the account lock from
//! the concurrency model: every read or write of the account's submissions,
//! and the housekeeper's merge-phase rewrite, happens under it. Slots live
//! in an outer `RwLock<HashMap>` that is only held long enough to find or
//! link/unlink a slot, never while a slot mutex is held, so two accounts
//! never contend on the same lock and no lock ordering cycle exists.
//!
//! An account's entry is pruned from the outer map as soon as its last
//! submission is removed. The `retired` flag closes the race between a
//! thread that still holds a slot `Arc` and the thread that pruned it:
//! mutations re-check the flag after locking and retry through the outer
//! map, so nothing is ever written into an unlinked slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::accounts::{Account, AccountId};
use crate::sync::{lock, read_lock, write_lock};
use crate::types::{FeedbackItem, ItemProfile, Submission};

// ---------------------------------------------------------------------------
// Outcome of an add
// ---------------------------------------------------------------------------

/// Result of [`SubmissionStore::add`]. Capacity rejection is an expected,
/// recoverable outcome the caller relays to the end user — not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The submission now held by the store.
    Added(Submission),
    /// The account is at its submission cap and the item was new.
    Rejected,
}

impl AddOutcome {
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    #[must_use]
    pub fn submission(self) -> Option<Submission> {
        match self {
            Self::Added(submission) => Some(submission),
            Self::Rejected => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AccountEntry {
    submissions: HashMap<FeedbackItem, Submission>,
    /// Set when this slot has been unlinked from the outer map. A locked
    /// holder seeing this must retry through the outer map.
    retired: bool,
}

#[derive(Debug)]
struct AccountSlot {
    account: Arc<Account>,
    entry: Mutex<AccountEntry>,
}

impl AccountSlot {
    fn new(account: Arc<Account>) -> Self {
        Self {
            account,
            entry: Mutex::new(AccountEntry {
                submissions: HashMap::new(),
                retired: false,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SubmissionStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SubmissionStore {
    accounts: RwLock<HashMap<AccountId, Arc<AccountSlot>>>,
    max_per_account: usize,
}

impl SubmissionStore {
    #[must_use]
    pub fn new(max_per_account: usize) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            max_per_account,
        }
    }

    fn slot(&self, id: AccountId) -> Option<Arc<AccountSlot>> {
        read_lock(&self.accounts).get(&id).cloned()
    }

    fn slot_or_insert(&self, account: &Arc<Account>) -> Arc<AccountSlot> {
        if let Some(slot) = self.slot(account.id()) {
            return slot;
        }
        let mut accounts = write_lock(&self.accounts);
        accounts
            .entry(account.id())
            .or_insert_with(|| Arc::new(AccountSlot::new(account.clone())))
            .clone()
    }

    /// Insert or replace `submission` for its item under the account lock.
    ///
    /// Rejects when the account already holds `max_per_account` submissions
    /// *and* has none for this item; replacing an existing item's
    /// submission is always allowed.
    pub fn add(&self, account: &Arc<Account>, submission: Submission) -> AddOutcome {
        loop {
            let slot = self.slot_or_insert(account);
            let mut entry = lock(&slot.entry);
            if entry.retired {
                continue; // pruned between lookup and lock; retry
            }
            let item = submission.item().clone();
            if entry.submissions.len() >= self.max_per_account
                && !entry.submissions.contains_key(&item)
            {
                debug!(account = %account.id(), %item, cap = self.max_per_account,
                    "submission rejected at capacity");
                return AddOutcome::Rejected;
            }
            entry.submissions.insert(item, submission.clone());
            return AddOutcome::Added(submission);
        }
    }

    /// Lock-scoped read of one submission.
    #[must_use]
    pub fn get(&self, id: AccountId, item: &FeedbackItem) -> Option<Submission> {
        let slot = self.slot(id)?;
        let entry = lock(&slot.entry);
        if entry.retired {
            return None;
        }
        entry.submissions.get(item).cloned()
    }

    /// Remove the account's submission for `item`, pruning the account's
    /// slot entirely when it becomes empty. Returns whether anything was
    /// removed.
    pub fn remove(&self, id: AccountId, item: &FeedbackItem) -> bool {
        loop {
            let Some(slot) = self.slot(id) else {
                return false;
            };
            let mut entry = lock(&slot.entry);
            if entry.retired {
                continue;
            }
            let removed = entry.submissions.remove(item).is_some();
            if removed && entry.submissions.is_empty() {
                entry.retired = true;
                drop(entry);
                let mut accounts = write_lock(&self.accounts);
                if accounts
                    .get(&id)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot))
                {
                    accounts.remove(&id);
                    debug!(account = %id, "pruned empty account entry");
                }
            }
            return removed;
        }
    }

    /// Snapshot of every submission held for the account, taken under the
    /// account lock so the caller sees a consistent set.
    #[must_use]
    pub fn get_all(&self, id: AccountId) -> Vec<Submission> {
        let Some(slot) = self.slot(id) else {
            return Vec::new();
        };
        let entry = lock(&slot.entry);
        if entry.retired {
            return Vec::new();
        }
        entry.submissions.values().cloned().collect()
    }

    /// Merge-phase primitive: re-fetch the account's live submission for
    /// the profile's item under the account lock and, if it still exists
    /// and its profile still differs from `dominant`, rebind it.
    ///
    /// Returns the live (possibly unchanged) submission, or `None` when
    /// the submission no longer exists. Idempotent: rebinding to the
    /// already-held profile returns the submission untouched.
    pub fn replace_profile(
        &self,
        id: AccountId,
        dominant: &Arc<ItemProfile>,
    ) -> Option<Submission> {
        let slot = self.slot(id)?;
        let mut entry = lock(&slot.entry);
        if entry.retired {
            return None;
        }
        let live = entry.submissions.get_mut(dominant.item())?;
        if !Arc::ptr_eq(live.profile(), dominant) {
            // Single atomic map-entry update; concurrent readers see either
            // the old or the new submission, never a torn one.
            *live = live.with_profile(dominant.clone());
        }
        Some(live.clone())
    }

    /// Checkpoint-restore insertion path: same locking as [`add`] but not
    /// subject to the capacity bound (the saved data was bounded when it
    /// was written).
    pub fn restore_insert(&self, account: &Arc<Account>, submission: Submission) {
        loop {
            let slot = self.slot_or_insert(account);
            let mut entry = lock(&slot.entry);
            if entry.retired {
                continue;
            }
            entry.submissions.insert(submission.item().clone(), submission);
            return;
        }
    }

    /// Drop every account entry. Used by checkpoint restore before replay.
    pub fn clear(&self) {
        let mut accounts = write_lock(&self.accounts);
        for slot in accounts.values() {
            let mut entry = lock(&slot.entry);
            entry.submissions.clear();
            entry.retired = true;
        }
        accounts.clear();
    }

    /// Number of accounts currently holding at least one submission.
    #[must_use]
    pub fn account_count(&self) -> usize {
        read_lock(&self.accounts).len()
    }

    /// Total live submissions across all accounts.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        let slots: Vec<Arc<AccountSlot>> = read_lock(&self.accounts).values().cloned().collect();
        slots
            .iter()
            .map(|slot| {
                let entry = lock(&slot.entry);
                if entry.retired { 0 } else { entry.submissions.len() }
            })
            .sum()
    }

    /// Visit every non-empty account under its lock, one account at a
    /// time. Used by checkpoint save.
    pub fn for_each_account<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Account>, &HashMap<FeedbackItem, Submission>),
    {
        let slots: Vec<Arc<AccountSlot>> = read_lock(&self.accounts).values().cloned().collect();
        for slot in slots {
            let entry = lock(&slot.entry);
            if !entry.retired && !entry.submissions.is_empty() {
                f(&slot.account, &entry.submissions);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CategoryTag, SubmissionBody};

    fn account(id: i32) -> Arc<Account> {
        Arc::new(Account::new(AccountId(id), "10.0.0.1".parse().expect("addr")))
    }

    fn item(key: &str) -> FeedbackItem {
        FeedbackItem::new(CategoryTag(1), key)
    }

    fn submission(key: &str, name: &str) -> Submission {
        let profile = Arc::new(ItemProfile::new(
            item(key),
            name,
            format!("https://img.example/{key}.jpg"),
            vec![],
        ));
        Submission::new(
            profile,
            SubmissionBody::Rating {
                stars: 5,
                comment: String::new(),
            },
            1_700_000_000_000,
        )
    }

    // === Add / get / remove ================================================

    #[test]
    fn add_then_get_roundtrip() {
        let store = SubmissionStore::new(10);
        let acct = account(1);
        let added = store.add(&acct, submission("p1", "Dawn"));
        assert!(!added.is_rejected());
        let got = store.get(AccountId(1), &item("p1")).expect("present");
        assert_eq!(got, submission("p1", "Dawn"));
    }

    #[test]
    fn add_replaces_existing_item_submission() {
        let store = SubmissionStore::new(10);
        let acct = account(1);
        store.add(&acct, submission("p1", "Dawn"));
        store.add(&acct, submission("p1", "Dusk"));
        assert_eq!(store.submission_count(), 1);
        let got = store.get(AccountId(1), &item("p1")).expect("present");
        assert_eq!(got.profile().display_name, "Dusk");
    }

    #[test]
    fn remove_reports_presence() {
        let store = SubmissionStore::new(10);
        let acct = account(1);
        store.add(&acct, submission("p1", "Dawn"));
        assert!(store.remove(AccountId(1), &item("p1")));
        assert!(!store.remove(AccountId(1), &item("p1")));
        assert!(store.get(AccountId(1), &item("p1")).is_none());
    }

    // === Capacity bound ====================================================

    #[test]
    fn cap_rejects_new_item_but_allows_replacement() {
        let store = SubmissionStore::new(3);
        let acct = account(1);
        for i in 0..3 {
            let out = store.add(&acct, submission(&format!("p{i}"), "Dawn"));
            assert!(!out.is_rejected(), "add {i} under cap");
        }
        // New item at cap: rejected.
        assert!(store.add(&acct, submission("p99", "Dawn")).is_rejected());
        // Replacement at cap: allowed.
        assert!(!store.add(&acct, submission("p0", "Dusk")).is_rejected());
        assert_eq!(store.submission_count(), 3);
    }

    #[test]
    fn cap_is_per_account() {
        let store = SubmissionStore::new(1);
        store.add(&account(1), submission("p1", "Dawn"));
        let out = store.add(&account(2), submission("p1", "Dawn"));
        assert!(!out.is_rejected());
    }

    // === Empty-map pruning =================================================

    #[test]
    fn removing_last_submission_prunes_account() {
        let store = SubmissionStore::new(10);
        let acct = account(1);
        store.add(&acct, submission("p1", "Dawn"));
        assert_eq!(store.account_count(), 1);
        store.remove(AccountId(1), &item("p1"));
        assert_eq!(store.account_count(), 0);

        let mut visited = 0;
        store.for_each_account(|_, _| visited += 1);
        assert_eq!(visited, 0);
    }

    #[test]
    fn account_is_usable_again_after_prune() {
        let store = SubmissionStore::new(10);
        let acct = account(1);
        store.add(&acct, submission("p1", "Dawn"));
        store.remove(AccountId(1), &item("p1"));
        let out = store.add(&acct, submission("p2", "Dusk"));
        assert!(!out.is_rejected());
        assert_eq!(store.account_count(), 1);
    }

    // === replace_profile ===================================================

    #[test]
    fn replace_profile_rebinds_and_is_idempotent() {
        let store = SubmissionStore::new(10);
        let acct = account(1);
        store.add(&acct, submission("p1", "Dawn"));
        let dominant = Arc::new(ItemProfile::new(
            item("p1"),
            "Dawn, Lake Bled",
            "https://img.example/p1.jpg",
            vec![],
        ));

        let live = store
            .replace_profile(AccountId(1), &dominant)
            .expect("submission exists");
        assert!(Arc::ptr_eq(live.profile(), &dominant));
        assert_eq!(live.submitted_at_ms(), 1_700_000_000_000);

        // Second call is a no-op returning the same binding.
        let again = store
            .replace_profile(AccountId(1), &dominant)
            .expect("still exists");
        assert!(Arc::ptr_eq(again.profile(), &dominant));
    }

    #[test]
    fn replace_profile_skips_missing_submission() {
        let store = SubmissionStore::new(10);
        let dominant = Arc::new(ItemProfile::new(
            item("p1"),
            "Dawn",
            "https://img.example/p1.jpg",
            vec![],
        ));
        assert!(store.replace_profile(AccountId(1), &dominant).is_none());
    }

    // === Bulk reads ========================================================

    #[test]
    fn get_all_returns_consistent_snapshot() {
        let store = SubmissionStore::new(10);
        let acct = account(1);
        store.add(&acct, submission("p1", "Dawn"));
        store.add(&acct, submission("p2", "Dusk"));
        let mut all = store.get_all(AccountId(1));
        all.sort_by(|a, b| a.item().key.cmp(&b.item().key));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].item().key, "p1");
        assert_eq!(all[1].item().key, "p2");
        assert!(store.get_all(AccountId(99)).is_empty());
    }

    // === Concurrency =======================================================

    #[test]
    fn concurrent_adds_and_removes_converge() {
        use std::sync::Barrier;
        use std::thread;

        let store = Arc::new(SubmissionStore::new(1000));
        let acct = account(1);
        let barrier = Arc::new(Barrier::new(4));

        let mut handles = Vec::new();
        for t in 0..4 {
            let store = store.clone();
            let acct = acct.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..50 {
                    let key = format!("p{}-{}", t, i);
                    store.add(&acct, submission(&key, "Dawn"));
                    if i % 2 == 0 {
                        store.remove(AccountId(1), &item(&key));
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker thread");
        }
        // Each thread leaves its odd-numbered keys in place.
        assert_eq!(store.submission_count(), 4 * 25);
    }
}
