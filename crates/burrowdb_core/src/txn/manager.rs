//! Transaction manager: id allocation, active set and key locks.

use crate::error::{CoreError, CoreResult};
use crate::txn::state::TxnShared;
use crate::types::{DbId, TxnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

struct ManagerInner {
    next_id: u64,
    active: HashMap<TxnId, Weak<TxnShared>>,
    /// Owner of every key with a pending change.
    locks: HashMap<(DbId, Vec<u8>), TxnId>,
}

/// Tracks active transactions and which keys they have pending.
///
/// A key written by one transaction is locked until that transaction
/// commits or aborts. Any other write to the key, transactional or not,
/// fails with `TxnConflict` in the meantime. Reads never take locks.
pub(crate) struct TxnManager {
    inner: Mutex<ManagerInner>,
}

impl TxnManager {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                next_id: 1,
                active: HashMap::new(),
                locks: HashMap::new(),
            }),
        }
    }

    /// Registers a new active transaction.
    pub(crate) fn begin(&self) -> Arc<TxnShared> {
        let mut inner = self.inner.lock();
        let id = TxnId(inner.next_id);
        inner.next_id += 1;
        let shared = Arc::new(TxnShared::new(id));
        inner.active.insert(id, Arc::downgrade(&shared));
        shared
    }

    /// Fails if a transaction other than `txn` owns the key.
    pub(crate) fn check_unlocked(&self, db: DbId, key: &[u8], txn: Option<TxnId>) -> CoreResult<()> {
        let inner = self.inner.lock();
        match inner.locks.get(&(db, key.to_vec())) {
            Some(&owner) if Some(owner) != txn => Err(CoreError::txn_conflict(format!(
                "key is locked by {owner}"
            ))),
            _ => Ok(()),
        }
    }

    /// Takes the key for `txn`, or fails if another transaction owns it.
    pub(crate) fn lock_key(&self, db: DbId, key: &[u8], txn: TxnId) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let owner = *inner.locks.entry((db, key.to_vec())).or_insert(txn);
        if owner == txn {
            Ok(())
        } else {
            Err(CoreError::txn_conflict(format!("key is locked by {owner}")))
        }
    }

    /// Drops the transaction and all keys it owns.
    pub(crate) fn release(&self, txn: TxnId) {
        let mut inner = self.inner.lock();
        inner.active.remove(&txn);
        inner.locks.retain(|_, owner| *owner != txn);
    }

    pub(crate) fn db_has_locks(&self, db: DbId) -> bool {
        self.inner.lock().locks.keys().any(|(id, _)| *id == db)
    }

    /// Transactions that are still reachable, ordered by id.
    pub(crate) fn active(&self) -> Vec<Arc<TxnShared>> {
        let inner = self.inner.lock();
        let mut active: Vec<Arc<TxnShared>> =
            inner.active.values().filter_map(Weak::upgrade).collect();
        active.sort_by_key(|txn| txn.id);
        active
    }

    pub(crate) fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn ids_increase() {
        let manager = TxnManager::new();
        let a = manager.begin();
        let b = manager.begin();
        assert!(b.id > a.id);
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn locks_conflict_between_transactions() {
        let manager = TxnManager::new();
        let a = manager.begin();
        let b = manager.begin();

        manager.lock_key(DbId(1), b"k", a.id).unwrap();
        manager.lock_key(DbId(1), b"k", a.id).unwrap();
        let err = manager.lock_key(DbId(1), b"k", b.id).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TxnConflict);

        // same key in another database is independent
        manager.lock_key(DbId(2), b"k", b.id).unwrap();

        assert!(manager.check_unlocked(DbId(1), b"k", Some(a.id)).is_ok());
        assert!(manager.check_unlocked(DbId(1), b"k", None).is_err());
        assert!(manager.check_unlocked(DbId(1), b"other", None).is_ok());
    }

    #[test]
    fn release_frees_keys() {
        let manager = TxnManager::new();
        let a = manager.begin();
        manager.lock_key(DbId(1), b"k", a.id).unwrap();
        assert!(manager.db_has_locks(DbId(1)));

        manager.release(a.id);
        assert!(!manager.db_has_locks(DbId(1)));
        assert!(manager.check_unlocked(DbId(1), b"k", None).is_ok());
        assert!(manager.active().is_empty());
    }

    #[test]
    fn dropped_transactions_are_not_listed() {
        let manager = TxnManager::new();
        let kept = manager.begin();
        drop(manager.begin());
        let active = manager.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);
    }
}
