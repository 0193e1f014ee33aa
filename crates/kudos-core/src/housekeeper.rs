//! Defragmentation housekeeping.
//!
//! Scraping inconsistencies and legitimate upstream edits leave the same
//! item described by several structurally different profiles. On a fixed
//! interval (plus once at startup) the housekeeper walks every category:
//!
//! 1. **Snapshot** — record `snapshot_time`, then take a per-item view of
//!    all submissions. The view is not atomic with ongoing traffic;
//!    eventual consistency is deliberate.
//! 2. **Sample** — the most recent submissions, at most one per
//!    last-authenticated network address, up to the configured sample
//!    size. Items with fewer total submissions than the sample size are
//!    skipped: small samples are noise, and one address must not dominate
//!    the vote.
//! 3. **Dominance** — tally profile values by structural equality; a
//!    profile reaching the threshold (a strict majority of the sample, so
//!    at most one can) is dominant.
//! 4. **Merge** — for every snapshot entry holding a different profile,
//!    re-check under the owning account's lock and rebind the live
//!    submission to the dominant profile, preserving body and timestamp.
//!    The snapshot entry is updated so the GC phase sees corrected state.
//! 5. **GC** — drop cache entries of the category created strictly before
//!    `snapshot_time` and referenced by no snapshot entry. Entries created
//!    during or after the snapshot are never collected by this pass: they
//!    may belong to submissions the snapshot did not see.
//!
//! No lock is held across the snapshot or sampling phases; the merge phase
//! takes one account lock at a time. A failed or panicking run is logged
//! and abandoned; the schedule continues. Shutdown wakes the timer and
//! joins the thread without a timeout — an in-flight run is never
//! abandoned mid-merge.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::accounts::AccountId;
use crate::cache::ItemProfileCache;
use crate::category::{CategoryManager, CategoryRegistry, ItemSubmission};
use crate::config::StoreConfig;
use crate::sync::lock;
use crate::types::{ItemProfile, now_ms};

// ---------------------------------------------------------------------------
// Run statistics
// ---------------------------------------------------------------------------

/// Counters for one housekeeping run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Items whose snapshots were examined.
    pub items_scanned: usize,
    /// Items where a dominant profile caused at least one rewrite.
    pub items_merged: usize,
    /// Submissions rebound to a dominant profile.
    pub submissions_rewritten: usize,
    /// Cache entries removed by the GC phase.
    pub profiles_collected: usize,
}

// ---------------------------------------------------------------------------
// Housekeeper
// ---------------------------------------------------------------------------

pub struct DefragHousekeeper {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    cache: Arc<ItemProfileCache>,
    registry: Arc<CategoryRegistry>,
    sample_size: usize,
    dominance_threshold: usize,
    interval: Duration,
    shutdown: Mutex<bool>,
    wakeup: Condvar,
    enabled: AtomicBool,
    last_run_ms: AtomicI64,
}

impl DefragHousekeeper {
    #[must_use]
    pub fn new(
        cache: Arc<ItemProfileCache>,
        registry: Arc<CategoryRegistry>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                registry,
                sample_size: config.sample_size,
                dominance_threshold: config.dominance_threshold,
                interval: config.housekeeping_interval(),
                shutdown: Mutex::new(false),
                wakeup: Condvar::new(),
                enabled: AtomicBool::new(false),
                last_run_ms: AtomicI64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start the schedule: one run immediately, then every interval.
    /// A second call while running is a no-op.
    pub fn start(&self) {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            warn!("housekeeper already running; start ignored");
            return;
        }
        *lock(&self.inner.shutdown) = false;
        self.inner.enabled.store(true, Ordering::Release);

        let inner = self.inner.clone();
        *handle = Some(std::thread::spawn(move || {
            info!(interval_secs = inner.interval.as_secs(), "housekeeping started");
            loop {
                Inner::guarded_run(&inner);
                if inner.wait_for_next_run() {
                    break;
                }
            }
        }));
    }

    /// Cancel the schedule and wait for any in-flight run to finish.
    /// Blocking, with no timeout. Idempotent.
    pub fn shutdown(&self) {
        let handle = lock(&self.handle).take();
        let Some(handle) = handle else {
            return;
        };
        *lock(&self.inner.shutdown) = true;
        self.inner.wakeup.notify_all();
        if handle.join().is_err() {
            warn!("housekeeper thread panicked during shutdown");
        }
        self.inner.enabled.store(false, Ordering::Release);
        info!("housekeeping stopped");
    }

    /// Run one pass synchronously on the caller's thread.
    ///
    /// Administrative/maintenance entry point; the scheduled thread uses
    /// the same pass internally.
    pub fn run_once(&self) -> RunStats {
        self.inner.run_once()
    }

    /// Whether the scheduled thread is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Completion time of the most recent pass, if any has finished.
    #[must_use]
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        match self.inner.last_run_ms.load(Ordering::Acquire) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

impl std::fmt::Debug for DefragHousekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefragHousekeeper")
            .field("enabled", &self.is_enabled())
            .field("interval", &self.inner.interval)
            .finish()
    }
}

impl Inner {
    /// One pass, with both errors and panics contained to this run.
    fn guarded_run(inner: &Arc<Self>) {
        let started = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| inner.run_once())) {
            Ok(stats) => info!(
                items = stats.items_scanned,
                merged_items = stats.items_merged,
                rewritten = stats.submissions_rewritten,
                collected = stats.profiles_collected,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "housekeeping run complete"
            ),
            Err(_) => warn!("housekeeping run panicked; abandoned until next scheduled run"),
        }
    }

    /// Sleep until the next run is due or shutdown is requested.
    /// Returns `true` on shutdown.
    fn wait_for_next_run(&self) -> bool {
        let deadline = Instant::now() + self.interval;
        let mut stop = lock(&self.shutdown);
        loop {
            if *stop {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .wakeup
                .wait_timeout(stop, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            stop = guard;
        }
    }

    fn run_once(&self) -> RunStats {
        let snapshot_time = now_ms();
        let mut stats = RunStats::default();
        for category in self.registry.iter() {
            self.process_category(category, snapshot_time, &mut stats);
        }
        self.last_run_ms.store(now_ms(), Ordering::Release);
        stats
    }

    fn process_category(
        &self,
        category: &Arc<dyn CategoryManager>,
        snapshot_time: i64,
        stats: &mut RunStats,
    ) {
        let mut referenced: HashSet<Arc<ItemProfile>> = HashSet::new();

        for item in category.feedback_items() {
            let mut snapshot = category.submissions_for_item(&item);
            stats.items_scanned += 1;

            if snapshot.len() >= self.sample_size {
                let sample = select_sample(&snapshot, self.sample_size);
                if let Some(dominant) = dominant_profile(&sample, self.dominance_threshold) {
                    let rewritten = merge_item(category.as_ref(), &dominant, &mut snapshot);
                    if rewritten > 0 {
                        debug!(%item, rewritten, "merged item onto dominant profile");
                        stats.items_merged += 1;
                        stats.submissions_rewritten += rewritten;
                    }
                }
            }

            referenced.extend(snapshot.values().map(|e| e.submission.profile().clone()));
        }

        stats.profiles_collected +=
            self.cache
                .collect_category(category.tag(), snapshot_time, &referenced);
    }
}

/// Rewrite every snapshot entry not already bound to `dominant`, re-checking
/// each account's live state under its lock. Entries whose submission
/// disappeared since the snapshot are left untouched (their profile stays
/// referenced for this pass — the next pass reclaims it).
fn merge_item(
    category: &dyn CategoryManager,
    dominant: &Arc<ItemProfile>,
    snapshot: &mut HashMap<AccountId, ItemSubmission>,
) -> usize {
    let mut rewritten = 0;
    for entry in snapshot.values_mut() {
        if Arc::ptr_eq(entry.submission.profile(), dominant) {
            continue;
        }
        if let Some(live) = category.replace_profile(&entry.account, dominant) {
            entry.submission = live;
            rewritten += 1;
        }
    }
    rewritten
}

/// Greedy most-recent-first sample with at most one entry per network
/// address. Ties on timestamp break by account id for determinism.
pub(crate) fn select_sample(
    snapshot: &HashMap<AccountId, ItemSubmission>,
    sample_size: usize,
) -> Vec<ItemSubmission> {
    let mut candidates: Vec<&ItemSubmission> = snapshot.values().collect();
    candidates.sort_by(|a, b| {
        b.submission
            .submitted_at_ms()
            .cmp(&a.submission.submitted_at_ms())
            .then_with(|| a.account.id().cmp(&b.account.id()))
    });

    let mut seen_addrs = HashSet::new();
    let mut sample = Vec::with_capacity(sample_size);
    for entry in candidates {
        if sample.len() == sample_size {
            break;
        }
        if seen_addrs.insert(entry.account.last_login_addr()) {
            sample.push(entry.clone());
        }
    }
    sample
}

/// Tally profiles by structural equality; the first to reach `threshold`
/// wins. With the threshold a strict majority of the sample size, at most
/// one profile can reach it.
pub(crate) fn dominant_profile(
    sample: &[ItemSubmission],
    threshold: usize,
) -> Option<Arc<ItemProfile>> {
    let mut tallies: HashMap<Arc<ItemProfile>, usize> = HashMap::new();
    for entry in sample {
        let count = tallies
            .entry(entry.submission.profile().clone())
            .or_insert(0);
        *count += 1;
        if *count >= threshold {
            return Some(entry.submission.profile().clone());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
