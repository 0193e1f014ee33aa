//! Versioned binary checkpoints of the whole store.
//!
//! File layout:
//!
//! ```text
//! [magic "KCKP": 4] [version: u8] [reserved: 3]
//! [body_len: u64 LE] [created_at_ms: i64 LE] [body blake3: 32]
//! -- body --
//! [account_id: i32] [submission_count: i32]
//!   { [category_tag: i16] [profile: category-encoded]
//!     [submission: category-encoded] [submitted_at_ms: i64] }*
//! ...
//! [account_id = -1]            # sentinel terminates the stream
//! ```
//!
//! Profiles and submission bodies are encoded by their category manager;
//! this module owns only the framing. Restore clears all in-memory state
//! first, then replays the stream through the live intern path, so shared
//! profiles come back as one canonical instance. An account id the
//! directory cannot resolve is a checkpoint/account-database mismatch and
//! aborts the restore — better to fail loudly than run half-populated.
//!
//! Save and restore take an advisory lock on `<path>.lock` so two
//! processes cannot touch the same checkpoint file concurrently. Mutual
//! exclusion with in-process request traffic is the caller's
//! responsibility (the server quiesces around checkpoints).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tracing::info;

use crate::accounts::{Account, AccountDirectory, AccountId};
use crate::cache::ItemProfileCache;
use crate::category::CategoryRegistry;
use crate::codec::{read_i16, read_i32, read_i64, write_i16, write_i32, write_i64};
use crate::store::SubmissionStore;
use crate::types::{CategoryTag, Submission, now_ms};

// ---------------------------------------------------------------------------
// Format constants
// ---------------------------------------------------------------------------

/// The four magic bytes at the start of every checkpoint file.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"KCKP";

/// The format version written to new checkpoint files.
pub const CHECKPOINT_VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 4 + 1 + 3 + 8 + 8 + 32;

/// Account id terminating the stream.
const ACCOUNT_SENTINEL: i32 = -1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from checkpoint save and restore.
///
/// Every variant is fatal to the operation that raised it; restore makes no
/// attempt to keep going past corruption.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// I/O failure reading or writing the checkpoint file.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with `KCKP`.
    #[error("invalid magic bytes: expected KCKP, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// The format version is newer than this library supports.
    #[error("unsupported checkpoint version {0}: maximum supported is {CHECKPOINT_VERSION}")]
    UnsupportedVersion(u8),

    /// Structural or checksum corruption.
    #[error("checkpoint data is corrupted: {0}")]
    Corrupted(String),

    /// The stream references an account the directory cannot resolve —
    /// checkpoint and account database do not match.
    #[error("unknown account id {0} in checkpoint")]
    UnknownAccount(i32),

    /// The stream references a category tag with no registered manager.
    #[error("unknown category tag {0} in checkpoint")]
    UnknownCategory(i16),
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    version: u8,
    body_len: u64,
    created_at_ms: i64,
    body_hash: [u8; 32],
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&CHECKPOINT_MAGIC);
        out[4] = self.version;
        // bytes 5..8 reserved, zero
        out[8..16].copy_from_slice(&self.body_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.created_at_ms.to_le_bytes());
        out[24..56].copy_from_slice(&self.body_hash);
        out
    }

    fn decode(data: &[u8]) -> Result<Self, CheckpointError> {
        if data.len() < HEADER_SIZE {
            return Err(CheckpointError::Corrupted(
                "file shorter than checkpoint header".into(),
            ));
        }
        let magic: [u8; 4] = data[0..4].try_into().expect("slice is 4 bytes");
        if magic != CHECKPOINT_MAGIC {
            return Err(CheckpointError::InvalidMagic(magic));
        }
        let version = data[4];
        if version > CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(version));
        }
        let body_len = u64::from_le_bytes(data[8..16].try_into().expect("slice is 8 bytes"));
        let created_at_ms = i64::from_le_bytes(data[16..24].try_into().expect("slice is 8 bytes"));
        let body_hash: [u8; 32] = data[24..56].try_into().expect("slice is 32 bytes");
        Ok(Self {
            version,
            body_len,
            created_at_ms,
            body_hash,
        })
    }
}

// ---------------------------------------------------------------------------
// Advisory file lock
// ---------------------------------------------------------------------------

/// RAII exclusive advisory lock on `<path>.lock`. Released on drop.
struct CheckpointLock {
    file: File,
}

impl CheckpointLock {
    fn acquire(checkpoint_path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(sibling(checkpoint_path, ".lock"))?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// `path` with `suffix` appended to its final component.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Counters from a completed save or restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointReport {
    pub accounts: usize,
    pub submissions: usize,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct CheckpointCoordinator {
    store: Arc<SubmissionStore>,
    cache: Arc<ItemProfileCache>,
    registry: Arc<CategoryRegistry>,
    directory: Arc<dyn AccountDirectory>,
}

impl CheckpointCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<SubmissionStore>,
        cache: Arc<ItemProfileCache>,
        registry: Arc<CategoryRegistry>,
        directory: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            directory,
        }
    }

    /// Write a checkpoint of every account holding at least one submission.
    ///
    /// The file is written to a temporary sibling and renamed into place,
    /// so a crash mid-save never leaves a truncated checkpoint at `path`.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, on a submission whose category tag has no
    /// registered manager, or when a category hook fails.
    pub fn save(&self, path: &Path) -> Result<CheckpointReport, CheckpointError> {
        let _guard = CheckpointLock::acquire(path)?;

        for category in self.registry.iter() {
            category.pre_save(path)?;
        }

        let (body, report) = self.encode_body()?;
        let header = Header {
            version: CHECKPOINT_VERSION,
            body_len: body.len() as u64,
            created_at_ms: now_ms(),
            body_hash: *blake3::hash(&body).as_bytes(),
        };

        let tmp = sibling(path, ".tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&header.encode())?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        for category in self.registry.iter() {
            category.post_save(path)?;
        }

        info!(
            path = %path.display(),
            accounts = report.accounts,
            submissions = report.submissions,
            bytes = HEADER_SIZE + body.len(),
            "checkpoint saved"
        );
        Ok(report)
    }

    fn encode_body(&self) -> Result<(Vec<u8>, CheckpointReport), CheckpointError> {
        // Snapshot first (one account lock at a time), encode after, so no
        // lock is held while category codecs run.
        let mut records: Vec<(Arc<Account>, Vec<Submission>)> = Vec::new();
        self.store.for_each_account(|account, submissions| {
            let mut subs: Vec<Submission> = submissions.values().cloned().collect();
            subs.sort_by(|a, b| a.item().cmp(b.item()));
            records.push((account.clone(), subs));
        });
        records.sort_by_key(|(account, _)| account.id());

        let mut body = Vec::new();
        let mut report = CheckpointReport::default();
        for (account, subs) in &records {
            write_i32(&mut body, account.id().0)?;
            let count = i32::try_from(subs.len()).map_err(|_| {
                CheckpointError::Corrupted(format!(
                    "account {} holds more submissions than i32 can frame",
                    account.id()
                ))
            })?;
            write_i32(&mut body, count)?;
            for submission in subs {
                let tag = submission.item().category;
                let category = self
                    .registry
                    .by_tag(tag)
                    .ok_or(CheckpointError::UnknownCategory(tag.0))?;
                write_i16(&mut body, tag.0)?;
                category.write_profile(&mut body, submission.profile())?;
                category.write_submission(&mut body, submission)?;
                write_i64(&mut body, submission.submitted_at_ms())?;
                report.submissions += 1;
            }
            report.accounts += 1;
        }
        write_i32(&mut body, ACCOUNT_SENTINEL)?;
        Ok((body, report))
    }

    /// Clear all in-memory state and replay the checkpoint at `path`.
    ///
    /// Decoded profiles are interned through the live cache path, so
    /// profiles shared across accounts come back as a single canonical
    /// instance.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, header or checksum mismatches, malformed
    /// framing, unknown category tags, and unknown account ids. Any
    /// failure aborts the restore; the store may be left partially
    /// populated but the error is always surfaced.
    pub fn restore(&self, path: &Path) -> Result<CheckpointReport, CheckpointError> {
        let _guard = CheckpointLock::acquire(path)?;

        for category in self.registry.iter() {
            category.pre_restore(path)?;
        }

        let data = fs::read(path)?;
        let header = Header::decode(&data)?;
        let body = &data[HEADER_SIZE..];
        if header.body_len != body.len() as u64 {
            return Err(CheckpointError::Corrupted(format!(
                "header claims {} body bytes, file has {}",
                header.body_len,
                body.len()
            )));
        }
        if *blake3::hash(body).as_bytes() != header.body_hash {
            return Err(CheckpointError::Corrupted("body checksum mismatch".into()));
        }

        self.store.clear();
        self.cache.clear();
        for category in self.registry.iter() {
            category.clear_all();
        }

        let report = self.replay(body)?;

        for category in self.registry.iter() {
            category.post_restore(path)?;
        }

        info!(
            path = %path.display(),
            accounts = report.accounts,
            submissions = report.submissions,
            "checkpoint restored"
        );
        Ok(report)
    }

    fn replay(&self, body: &[u8]) -> Result<CheckpointReport, CheckpointError> {
        let mut r = Cursor::new(body);
        let mut report = CheckpointReport::default();
        loop {
            let id = read_i32(&mut r)?;
            if id == ACCOUNT_SENTINEL {
                break;
            }
            if id < 0 {
                return Err(CheckpointError::Corrupted(format!(
                    "invalid account id {id} in stream"
                )));
            }
            let account = self
                .directory
                .account_by_id(AccountId(id))
                .ok_or(CheckpointError::UnknownAccount(id))?;

            let count = read_i32(&mut r)?;
            if count < 0 {
                return Err(CheckpointError::Corrupted(format!(
                    "negative submission count {count} for account {id}"
                )));
            }
            for _ in 0..count {
                let tag = CategoryTag(read_i16(&mut r)?);
                let category = self
                    .registry
                    .by_tag(tag)
                    .ok_or(CheckpointError::UnknownCategory(tag.0))?;
                let profile = category.read_profile(&mut r)?;
                let canonical = self.cache.intern(profile);
                let submission_body = category.read_submission(&mut r)?;
                let submitted_at_ms = read_i64(&mut r)?;
                let submission = Submission::new(canonical, submission_body, submitted_at_ms);
                self.store.restore_insert(&account, submission.clone());
                category.restore_one(&account, &submission);
                report.submissions += 1;
            }
            report.accounts += 1;
        }
        if r.position() != body.len() as u64 {
            return Err(CheckpointError::Corrupted(
                "trailing data after account sentinel".into(),
            ));
        }
        Ok(report)
    }
}

impl std::fmt::Debug for CheckpointCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointCoordinator")
            .field("categories", &self.registry.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
