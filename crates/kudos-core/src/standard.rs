//! Standard category manager.
//!
//! The production categories (photos, galleries) differ only in their wire
//! tag and item namespace, so they share this implementation: an
//! item-indexed map of submitters layered over the account-indexed store,
//! plus the standard body codec. Snapshot reads go through the store under
//! each account's lock one at a time, so a snapshot is eventually
//! consistent with concurrent traffic by construction.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::accounts::{Account, AccountId};
use crate::category::{CategoryManager, ItemSubmission};
use crate::codec::{read_str, read_u8, read_u16, write_str, write_u8, write_u16};
use crate::store::SubmissionStore;
use crate::sync::{read_lock, write_lock};
use crate::types::{CategoryTag, FeedbackItem, ItemProfile, Submission, SubmissionBody};

const BODY_RATING: u8 = 0;
const BODY_FLAG: u8 = 1;

pub struct StandardCategory {
    tag: CategoryTag,
    store: Arc<SubmissionStore>,
    /// item → submitting accounts. Values are the shared account handles so
    /// snapshot entries can read the last-login address without another
    /// directory lookup.
    index: RwLock<HashMap<FeedbackItem, HashMap<AccountId, Arc<Account>>>>,
}

impl StandardCategory {
    #[must_use]
    pub fn new(tag: CategoryTag, store: Arc<SubmissionStore>) -> Self {
        Self {
            tag,
            store,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Number of items currently indexed (metrics).
    #[must_use]
    pub fn item_count(&self) -> usize {
        read_lock(&self.index).len()
    }

    fn index_insert(&self, account: &Arc<Account>, item: &FeedbackItem) {
        let mut index = write_lock(&self.index);
        index
            .entry(item.clone())
            .or_default()
            .insert(account.id(), account.clone());
    }
}

impl CategoryManager for StandardCategory {
    fn tag(&self) -> CategoryTag {
        self.tag
    }

    fn create_submission(
        &self,
        profile: Arc<ItemProfile>,
        body: SubmissionBody,
        now_ms: i64,
    ) -> Submission {
        Submission::new(profile, body, now_ms)
    }

    fn feedback_items(&self) -> Vec<FeedbackItem> {
        read_lock(&self.index).keys().cloned().collect()
    }

    fn submissions_for_item(&self, item: &FeedbackItem) -> HashMap<AccountId, ItemSubmission> {
        let submitters: Vec<(AccountId, Arc<Account>)> = read_lock(&self.index)
            .get(item)
            .map(|accounts| {
                accounts
                    .iter()
                    .map(|(id, account)| (*id, account.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut snapshot = HashMap::with_capacity(submitters.len());
        for (id, account) in submitters {
            // One account lock at a time; entries that raced a removal are
            // simply absent from the snapshot.
            if let Some(submission) = self.store.get(id, item) {
                snapshot.insert(
                    id,
                    ItemSubmission {
                        account,
                        submission,
                    },
                );
            }
        }
        snapshot
    }

    fn replace_profile(
        &self,
        account: &Arc<Account>,
        profile: &Arc<ItemProfile>,
    ) -> Option<Submission> {
        let live = self.store.replace_profile(account.id(), profile);
        if live.is_none() {
            debug!(account = %account.id(), item = %profile.item(),
                "replace skipped: submission no longer present");
        }
        live
    }

    fn on_added(&self, account: &Arc<Account>, submission: &Submission) {
        self.index_insert(account, submission.item());
    }

    fn on_removed(&self, account: &Arc<Account>, item: &FeedbackItem) {
        let mut index = write_lock(&self.index);
        if let Some(accounts) = index.get_mut(item) {
            accounts.remove(&account.id());
            if accounts.is_empty() {
                index.remove(item);
            }
        }
    }

    // --- checkpoint codec --------------------------------------------------

    fn write_profile(&self, w: &mut dyn Write, profile: &ItemProfile) -> io::Result<()> {
        write_str(w, &profile.item.key)?;
        write_str(w, &profile.display_name)?;
        write_str(w, &profile.photo_url)?;
        let count = u16::try_from(profile.tags.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "profile has too many tags")
        })?;
        write_u16(w, count)?;
        for tag in &profile.tags {
            write_str(w, tag)?;
        }
        Ok(())
    }

    fn read_profile(&self, r: &mut dyn Read) -> io::Result<ItemProfile> {
        let key = read_str(r)?;
        let display_name = read_str(r)?;
        let photo_url = read_str(r)?;
        let count = read_u16(r)? as usize;
        let mut tags = Vec::with_capacity(count);
        for _ in 0..count {
            tags.push(read_str(r)?);
        }
        Ok(ItemProfile::new(
            FeedbackItem::new(self.tag, key),
            display_name,
            photo_url,
            tags,
        ))
    }

    fn write_submission(&self, w: &mut dyn Write, submission: &Submission) -> io::Result<()> {
        match submission.body() {
            SubmissionBody::Rating { stars, comment } => {
                write_u8(w, BODY_RATING)?;
                write_u8(w, *stars)?;
                write_str(w, comment)
            }
            SubmissionBody::Flag { reason } => {
                write_u8(w, BODY_FLAG)?;
                write_str(w, reason)
            }
        }
    }

    fn read_submission(&self, r: &mut dyn Read) -> io::Result<SubmissionBody> {
        match read_u8(r)? {
            BODY_RATING => Ok(SubmissionBody::Rating {
                stars: read_u8(r)?,
                comment: read_str(r)?,
            }),
            BODY_FLAG => Ok(SubmissionBody::Flag {
                reason: read_str(r)?,
            }),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown submission body discriminant {other}"),
            )),
        }
    }

    // --- checkpoint lifecycle ----------------------------------------------

    fn clear_all(&self) {
        write_lock(&self.index).clear();
    }

    fn restore_one(&self, account: &Arc<Account>, submission: &Submission) {
        self.index_insert(account, submission.item());
    }

    // --- category-local housekeeping ---------------------------------------

    fn start_housekeeping(&self) {
        debug!(tag = self.tag.0, "category housekeeping started");
    }

    fn shutdown_housekeeping(&self) {
        debug!(tag = self.tag.0, "category housekeeping stopped");
    }
}

impl std::fmt::Debug for StandardCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardCategory")
            .field("tag", &self.tag)
            .field("items", &self.item_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fixture() -> (Arc<SubmissionStore>, StandardCategory, Arc<Account>) {
        let store = Arc::new(SubmissionStore::new(100));
        let category = StandardCategory::new(CategoryTag(1), store.clone());
        let account = Arc::new(Account::new(AccountId(1), "10.0.0.1".parse().expect("addr")));
        (store, category, account)
    }

    fn profile(key: &str, name: &str) -> ItemProfile {
        ItemProfile::new(
            FeedbackItem::new(CategoryTag(1), key),
            name,
            format!("https://img.example/{key}.jpg"),
            vec!["landscape".into(), "film".into()],
        )
    }

    fn rating(stars: u8) -> SubmissionBody {
        SubmissionBody::Rating {
            stars,
            comment: "nice grain".into(),
        }
    }

    // === Index maintenance =================================================

    #[test]
    fn added_submissions_appear_in_item_snapshot() {
        let (store, category, account) = fixture();
        let submission =
            category.create_submission(Arc::new(profile("p1", "Dawn")), rating(5), 1_000);
        store.add(&account, submission.clone());
        category.on_added(&account, &submission);

        let items = category.feedback_items();
        assert_eq!(items, vec![FeedbackItem::new(CategoryTag(1), "p1")]);

        let snapshot = category.submissions_for_item(&items[0]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&AccountId(1)].submission, submission);
    }

    #[test]
    fn removal_prunes_item_from_index() {
        let (store, category, account) = fixture();
        let item = FeedbackItem::new(CategoryTag(1), "p1");
        let submission =
            category.create_submission(Arc::new(profile("p1", "Dawn")), rating(4), 1_000);
        store.add(&account, submission.clone());
        category.on_added(&account, &submission);

        store.remove(account.id(), &item);
        category.on_removed(&account, &item);
        assert!(category.feedback_items().is_empty());
    }

    #[test]
    fn stale_index_entries_drop_out_of_snapshots() {
        let (store, category, account) = fixture();
        let item = FeedbackItem::new(CategoryTag(1), "p1");
        let submission =
            category.create_submission(Arc::new(profile("p1", "Dawn")), rating(3), 1_000);
        store.add(&account, submission.clone());
        category.on_added(&account, &submission);

        // Store-side removal without the index notification: the snapshot
        // must not invent an entry.
        store.remove(account.id(), &item);
        assert!(category.submissions_for_item(&item).is_empty());
    }

    // === Codec =============================================================

    #[test]
    fn profile_codec_roundtrip() {
        let (_, category, _) = fixture();
        let original = profile("p1", "Dawn, Lake Bled");
        let mut buf = Vec::new();
        category.write_profile(&mut buf, &original).expect("encode");
        let decoded = category
            .read_profile(&mut Cursor::new(buf))
            .expect("decode");
        assert_eq!(decoded, original);
    }

    #[test]
    fn submission_body_codec_roundtrip() {
        let (_, category, _) = fixture();
        for body in [
            SubmissionBody::Rating {
                stars: 4,
                comment: "soft focus".into(),
            },
            SubmissionBody::Flag {
                reason: "stolen upload".into(),
            },
        ] {
            let submission = Submission::new(Arc::new(profile("p1", "Dawn")), body.clone(), 7);
            let mut buf = Vec::new();
            category
                .write_submission(&mut buf, &submission)
                .expect("encode");
            let decoded = category
                .read_submission(&mut Cursor::new(buf))
                .expect("decode");
            assert_eq!(decoded, body);
        }
    }

    #[test]
    fn unknown_body_discriminant_is_rejected() {
        let (_, category, _) = fixture();
        let err = category
            .read_submission(&mut Cursor::new(vec![9u8]))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
