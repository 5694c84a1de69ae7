//! Transactions.
//!
//! A transaction collects pending changes per database and key. Reads under
//! the transaction see those changes layered over the committed tree; other
//! readers see only committed state. Commit applies every change inside one
//! pager batch, so either all of them land or none do.
//!
//! ```rust,ignore
//! let txn = env.begin_txn()?;
//! db.insert(Some(&txn), b"k", b"v", InsertFlags::NONE)?;
//! txn.commit()?;
//! ```

mod manager;
mod state;

pub(crate) use manager::TxnManager;
pub(crate) use state::{DbChanges, Pending, TxnShared};
pub use state::TxnStatus;

use crate::btree::BTree;
use crate::env::EnvShared;
use crate::error::CoreResult;
use crate::types::TxnId;
use std::fmt;
use std::sync::Arc;

/// Handle of an active transaction.
///
/// Dropping an active transaction aborts it.
pub struct Transaction {
    env: Arc<EnvShared>,
    shared: Arc<TxnShared>,
}

impl Transaction {
    pub(crate) fn new(env: Arc<EnvShared>, shared: Arc<TxnShared>) -> Self {
        Self { env, shared }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.shared.id
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TxnStatus {
        self.shared.state.lock().status
    }

    /// Returns true until the transaction commits or aborts.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == TxnStatus::Active
    }

    /// Applies every pending change.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if the transaction already finished or the
    /// environment was closed. Any failure while applying leaves the
    /// committed state untouched; the transaction is then aborted on drop.
    pub fn commit(self) -> CoreResult<()> {
        let result = commit_shared(&self.env, &self.shared);
        self.env.report(result)
    }

    /// Discards every pending change.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if the transaction already finished.
    pub fn abort(self) -> CoreResult<()> {
        let result = abort_shared(&self.env, &self.shared);
        self.env.report(result)
    }

    pub(crate) fn env(&self) -> &Arc<EnvShared> {
        &self.env
    }

    pub(crate) fn shared(&self) -> &Arc<TxnShared> {
        &self.shared
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(err) = abort_shared(&self.env, &self.shared) {
                tracing::warn!(txn = %self.shared.id, error = %err, "failed to abort dropped transaction");
            }
        }
    }
}

fn commit_shared(env: &EnvShared, shared: &TxnShared) -> CoreResult<()> {
    let has_changes = {
        let state = shared.state.lock();
        state.ensure_active()?;
        state.has_changes()
    };

    let mut applied = 0usize;
    if has_changes {
        env.write_op(|pager, catalog| {
            let mut state = shared.state.lock();
            state.ensure_active()?;
            for changes in state.changes.values() {
                let order = changes.db.order();
                let meta = catalog.require_mut(changes.db.id)?;
                let mut tree = BTree::new(pager, &order, &env.metrics, meta.root);
                for (key, pending) in changes.iter() {
                    let records = pending.records().map(<[Vec<u8>]>::to_vec);
                    tree.modify(key, |_| Ok((records, ())))?;
                    applied += 1;
                }
                meta.root = tree.root();
            }
            state.status = TxnStatus::Committed;
            state.changes.clear();
            Ok(())
        })?;
    } else {
        let mut state = shared.state.lock();
        state.ensure_active()?;
        state.status = TxnStatus::Committed;
        state.changes.clear();
    }

    env.txns.release(shared.id);
    env.metrics.record_commit();
    tracing::debug!(txn = %shared.id, keys = applied, "committed transaction");
    Ok(())
}

pub(crate) fn abort_shared(env: &EnvShared, shared: &TxnShared) -> CoreResult<()> {
    let discarded = {
        let mut state = shared.state.lock();
        state.ensure_active()?;
        state.status = TxnStatus::Aborted;
        let discarded: usize = state.changes.values().map(DbChanges::len).sum();
        state.changes.clear();
        discarded
    };
    env.txns.release(shared.id);
    env.metrics.record_abort();
    tracing::debug!(txn = %shared.id, keys = discarded, "aborted transaction");
    Ok(())
}
