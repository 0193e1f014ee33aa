//! The feedback manager: the subsystem's composition surface.
//!
//! One instance owns the profile cache, the submission store, the category
//! registry, the housekeeper, and the checkpoint coordinator. There are no
//! ambient statics — the server's composition root constructs everything
//! and injects it here.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::accounts::{Account, AccountDirectory};
use crate::cache::ItemProfileCache;
use crate::category::CategoryRegistry;
use crate::checkpoint::{CheckpointCoordinator, CheckpointError, CheckpointReport};
use crate::config::StoreConfig;
use crate::housekeeper::{DefragHousekeeper, RunStats};
use crate::store::{AddOutcome, SubmissionStore};
use crate::types::{FeedbackItem, ItemProfile, Submission, SubmissionBody, now_ms};

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Point-in-time counters for admin and monitoring surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    /// Live submissions across all accounts.
    pub submissions: usize,
    /// Distinct feedback items across all categories.
    pub items: usize,
    /// Accounts currently holding at least one submission.
    pub accounts: usize,
    /// Distinct cached profiles.
    pub cached_profiles: usize,
    /// Whether the housekeeping schedule is active.
    pub housekeeping_enabled: bool,
    /// Completion time of the most recent housekeeping run.
    pub last_housekeeping_run: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// FeedbackManager
// ---------------------------------------------------------------------------

pub struct FeedbackManager {
    store: Arc<SubmissionStore>,
    cache: Arc<ItemProfileCache>,
    registry: Arc<CategoryRegistry>,
    housekeeper: DefragHousekeeper,
    checkpoint: CheckpointCoordinator,
}

impl FeedbackManager {
    #[must_use]
    pub fn new(
        config: &StoreConfig,
        cache: Arc<ItemProfileCache>,
        store: Arc<SubmissionStore>,
        registry: Arc<CategoryRegistry>,
        directory: Arc<dyn AccountDirectory>,
    ) -> Self {
        let housekeeper = DefragHousekeeper::new(cache.clone(), registry.clone(), config);
        let checkpoint = CheckpointCoordinator::new(
            store.clone(),
            cache.clone(),
            registry.clone(),
            directory,
        );
        Self {
            store,
            cache,
            registry,
            housekeeper,
            checkpoint,
        }
    }

    // --- request-handler surface -------------------------------------------

    /// Intern the profile, build the category's submission, and store it
    /// under the account's lock. [`AddOutcome::Rejected`] means the account
    /// is at its cap and the item was new — the caller relays that to the
    /// user, nothing is raised.
    pub fn add_submission(
        &self,
        account: &Arc<Account>,
        profile: ItemProfile,
        body: SubmissionBody,
    ) -> AddOutcome {
        let tag = profile.item().category;
        let Some(category) = self.registry.by_tag(tag) else {
            // Composition error: request decoding produced a tag nothing
            // registered. Surfaced as a rejection so a bad request cannot
            // take the handler down.
            error!(%tag, "submission for unregistered category rejected");
            return AddOutcome::Rejected;
        };

        let canonical = self.cache.intern(profile);
        let submission = category.create_submission(canonical, body, now_ms());
        match self.store.add(account, submission) {
            AddOutcome::Added(stored) => {
                category.on_added(account, &stored);
                AddOutcome::Added(stored)
            }
            AddOutcome::Rejected => AddOutcome::Rejected,
        }
    }

    #[must_use]
    pub fn get_submission(&self, account: &Arc<Account>, item: &FeedbackItem) -> Option<Submission> {
        self.store.get(account.id(), item)
    }

    /// Remove the account's submission for `item`; returns whether one
    /// existed.
    pub fn remove_submission(&self, account: &Arc<Account>, item: &FeedbackItem) -> bool {
        let removed = self.store.remove(account.id(), item);
        if removed {
            if let Some(category) = self.registry.by_tag(item.category) {
                category.on_removed(account, item);
            }
        }
        removed
    }

    /// Consistent snapshot of all of the account's submissions.
    #[must_use]
    pub fn get_all_submissions(&self, account: &Arc<Account>) -> Vec<Submission> {
        self.store.get_all(account.id())
    }

    // --- housekeeping ------------------------------------------------------

    /// Start the defragmentation schedule and, in lockstep, each
    /// category's local housekeeping.
    pub fn start_housekeeping(&self) {
        for category in self.registry.iter() {
            category.start_housekeeping();
        }
        self.housekeeper.start();
    }

    /// Stop the schedule, waiting for any in-flight run, then stop each
    /// category's local housekeeping.
    pub fn shutdown_housekeeping(&self) {
        self.housekeeper.shutdown();
        for category in self.registry.iter() {
            category.shutdown_housekeeping();
        }
    }

    /// Run one housekeeping pass synchronously (admin/maintenance hook).
    pub fn run_housekeeping_once(&self) -> RunStats {
        self.housekeeper.run_once()
    }

    // --- checkpoints -------------------------------------------------------

    /// Write a checkpoint to `path`.
    ///
    /// # Errors
    ///
    /// See [`CheckpointCoordinator::save`].
    pub fn save_checkpoint(&self, path: &Path) -> Result<CheckpointReport, CheckpointError> {
        self.checkpoint.save(path)
    }

    /// Replace all in-memory state with the checkpoint at `path`.
    ///
    /// # Errors
    ///
    /// See [`CheckpointCoordinator::restore`].
    pub fn restore_from_checkpoint(
        &self,
        path: &Path,
    ) -> Result<CheckpointReport, CheckpointError> {
        self.checkpoint.restore(path)
    }

    // --- metrics -----------------------------------------------------------

    #[must_use]
    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            submissions: self.store.submission_count(),
            items: self
                .registry
                .iter()
                .map(|category| category.feedback_items().len())
                .sum(),
            accounts: self.store.account_count(),
            cached_profiles: self.cache.len(),
            housekeeping_enabled: self.housekeeper.is_enabled(),
            last_housekeeping_run: self.housekeeper.last_run(),
        }
    }
}

impl std::fmt::Debug for FeedbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackManager")
            .field("categories", &self.registry.len())
            .field("housekeeper", &self.housekeeper)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
