//! Core value types for the feedback store.
//!
//! Everything in this module is a plain value: equality and hashing are
//! structural, and the only shared-ownership type is the canonical
//! [`ItemProfile`] handle (`Arc<ItemProfile>`) produced by the profile
//! cache. Pointer identity of that handle is an internal fast path only —
//! public contracts are always defined in terms of structural equality.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Checkpoints and housekeeping cutoffs compare these values, so the whole
/// crate goes through this single helper.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// CategoryTag
// ---------------------------------------------------------------------------

/// Discriminant for a feedback category (photos, galleries, ...).
///
/// The `i16` is the on-disk checkpoint tag; registering two categories with
/// the same tag is a composition error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CategoryTag(pub i16);

impl fmt::Display for CategoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "category#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FeedbackItem
// ---------------------------------------------------------------------------

/// Identifier of a feedback target: a category plus the target's natural
/// key within that category (e.g. the photo's site-assigned id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedbackItem {
    pub category: CategoryTag,
    pub key: String,
}

impl FeedbackItem {
    #[must_use]
    pub fn new(category: CategoryTag, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }
}

impl fmt::Display for FeedbackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.key)
    }
}

// ---------------------------------------------------------------------------
// ItemProfile
// ---------------------------------------------------------------------------

/// Immutable description of how an item looked at submission time.
///
/// Two profiles for the same item that differ in any field (a renamed
/// photo, a changed URL, an edited tag list) are distinct values and
/// therefore distinct cache entries. Profiles are created transiently by
/// request decoding and interned through the profile cache immediately;
/// after that only the canonical `Arc` circulates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemProfile {
    pub item: FeedbackItem,
    pub display_name: String,
    pub photo_url: String,
    pub tags: Vec<String>,
}

impl ItemProfile {
    #[must_use]
    pub fn new(
        item: FeedbackItem,
        display_name: impl Into<String>,
        photo_url: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            item,
            display_name: display_name.into(),
            photo_url: photo_url.into(),
            tags,
        }
    }

    #[must_use]
    pub const fn item(&self) -> &FeedbackItem {
        &self.item
    }
}

impl fmt::Display for ItemProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.item, self.display_name)
    }
}

// ---------------------------------------------------------------------------
// SubmissionBody
// ---------------------------------------------------------------------------

/// Category-specific submission payload.
///
/// The store treats this as an opaque value; only category managers look
/// inside (and encode it for checkpoints).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionBody {
    /// A star rating with an optional free-text comment.
    Rating { stars: u8, comment: String },
    /// A moderation flag raised against the item.
    Flag { reason: String },
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// One account's feedback for one item.
///
/// The profile reference is always a cache-canonical instance (see the
/// store invariants); the body and timestamp are preserved verbatim when
/// the housekeeper rebinds a submission to a dominant profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    profile: Arc<ItemProfile>,
    body: SubmissionBody,
    submitted_at_ms: i64,
}

impl Submission {
    #[must_use]
    pub const fn new(profile: Arc<ItemProfile>, body: SubmissionBody, submitted_at_ms: i64) -> Self {
        Self {
            profile,
            body,
            submitted_at_ms,
        }
    }

    #[must_use]
    pub const fn profile(&self) -> &Arc<ItemProfile> {
        &self.profile
    }

    #[must_use]
    pub fn item(&self) -> &FeedbackItem {
        self.profile.item()
    }

    #[must_use]
    pub const fn body(&self) -> &SubmissionBody {
        &self.body
    }

    #[must_use]
    pub const fn submitted_at_ms(&self) -> i64 {
        self.submitted_at_ms
    }

    /// The same submission rebound to a different (canonical) profile.
    ///
    /// Body and timestamp are preserved; this is the merge-phase rewrite.
    #[must_use]
    pub fn with_profile(&self, profile: Arc<ItemProfile>) -> Self {
        Self {
            profile,
            body: self.body.clone(),
            submitted_at_ms: self.submitted_at_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
