//! The account boundary.
//!
//! Accounts are owned by the user-account subsystem, not by this crate. The
//! store only needs three things from them: a stable integer id (exactly one
//! `Account` instance exists per id for the process lifetime), the address
//! the account last authenticated from (read during housekeeping sampling),
//! and a way to resolve ids back to accounts during checkpoint restore.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use crate::sync::{read_lock, write_lock};

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// Stable account identifier.
///
/// Checkpoints reserve `-1` as the end-of-stream sentinel, so real ids are
/// non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub i32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acct#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// An externally owned user account.
///
/// This crate never mutates account state except through
/// [`record_login`](Self::record_login), which the authentication layer
/// calls; everything else is read-only.
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    last_login_addr: RwLock<IpAddr>,
}

impl Account {
    #[must_use]
    pub const fn new(id: AccountId, addr: IpAddr) -> Self {
        Self {
            id,
            last_login_addr: RwLock::new(addr),
        }
    }

    #[must_use]
    pub const fn id(&self) -> AccountId {
        self.id
    }

    /// Address of the account's most recent authentication.
    ///
    /// Used only for sampling diversity in the housekeeper.
    #[must_use]
    pub fn last_login_addr(&self) -> IpAddr {
        *read_lock(&self.last_login_addr)
    }

    /// Record a fresh authentication from `addr`.
    pub fn record_login(&self, addr: IpAddr) {
        *write_lock(&self.last_login_addr) = addr;
    }
}

// ---------------------------------------------------------------------------
// AccountDirectory
// ---------------------------------------------------------------------------

/// Resolves account ids to live account instances.
///
/// Implemented by the account subsystem; the store consults it only during
/// checkpoint restore, where an unresolvable id aborts the restore.
pub trait AccountDirectory: Send + Sync {
    fn account_by_id(&self, id: AccountId) -> Option<Arc<Account>>;
}

/// A plain in-memory directory for composition roots and tests.
#[derive(Debug, Default)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<HashMap<AccountId, Arc<Account>>>,
}

impl InMemoryAccountDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account, returning the shared instance.
    ///
    /// Registering the same id twice returns the original instance — ids
    /// map 1:1 to instances for the process lifetime.
    pub fn register(&self, id: AccountId, addr: IpAddr) -> Arc<Account> {
        let mut accounts = write_lock(&self.accounts);
        accounts
            .entry(id)
            .or_insert_with(|| Arc::new(Account::new(id, addr)))
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read_lock(&self.accounts).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        read_lock(&self.accounts).is_empty()
    }
}

impl AccountDirectory for InMemoryAccountDirectory {
    fn account_by_id(&self, id: AccountId) -> Option<Arc<Account>> {
        read_lock(&self.accounts).get(&id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().expect("test address parses")
    }

    #[test]
    fn register_is_idempotent_per_id() {
        let dir = InMemoryAccountDirectory::new();
        let first = dir.register(AccountId(7), addr("10.0.0.1"));
        let second = dir.register(AccountId(7), addr("10.0.0.2"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn lookup_resolves_registered_accounts_only() {
        let dir = InMemoryAccountDirectory::new();
        dir.register(AccountId(1), addr("192.168.1.5"));
        assert!(dir.account_by_id(AccountId(1)).is_some());
        assert!(dir.account_by_id(AccountId(2)).is_none());
    }

    #[test]
    fn record_login_updates_sampling_address() {
        let account = Account::new(AccountId(3), addr("10.0.0.1"));
        assert_eq!(account.last_login_addr(), addr("10.0.0.1"));
        account.record_login(addr("172.16.9.9"));
        assert_eq!(account.last_login_addr(), addr("172.16.9.9"));
    }
}
