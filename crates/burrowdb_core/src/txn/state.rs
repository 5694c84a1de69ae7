//! Transaction state.

use crate::btree::Seek;
use crate::compare::KeyOrder;
use crate::db::DbShared;
use crate::error::{CoreError, CoreResult};
use crate::types::{DbId, TxnId};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Accepting operations.
    Active,
    /// Changes were applied.
    Committed,
    /// Changes were discarded.
    Aborted,
}

/// Pending state of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Pending {
    /// The key will hold exactly these records.
    Records(Vec<Vec<u8>>),
    /// The key will be removed.
    Erased,
}

impl Pending {
    pub(crate) fn from_records(records: Option<Vec<Vec<u8>>>) -> Self {
        match records.filter(|records| !records.is_empty()) {
            Some(records) => Self::Records(records),
            None => Self::Erased,
        }
    }

    pub(crate) fn records(&self) -> Option<&[Vec<u8>]> {
        match self {
            Self::Records(records) => Some(records),
            Self::Erased => None,
        }
    }
}

/// Pending changes of one database, sorted by the database's key order.
pub(crate) struct DbChanges {
    pub db: Arc<DbShared>,
    entries: Vec<(Vec<u8>, Pending)>,
}

impl DbChanges {
    pub(crate) fn new(db: Arc<DbShared>) -> Self {
        Self {
            db,
            entries: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], &Pending)> {
        self.entries
            .iter()
            .map(|(key, pending)| (key.as_slice(), pending))
    }

    /// Binary search for `key`.
    pub(crate) fn find(&self, order: &KeyOrder, key: &[u8]) -> CoreResult<Result<usize, usize>> {
        let mut low = 0;
        let mut high = self.entries.len();
        while low < high {
            let mid = low + (high - low) / 2;
            match order.compare(&self.entries[mid].0, key)? {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(low))
    }

    pub(crate) fn get(&self, order: &KeyOrder, key: &[u8]) -> CoreResult<Option<&Pending>> {
        Ok(match self.find(order, key)? {
            Ok(index) => Some(&self.entries[index].1),
            Err(_) => None,
        })
    }

    /// Stores `pending` at a position returned by [`find`](Self::find).
    pub(crate) fn put_at(&mut self, position: Result<usize, usize>, key: Vec<u8>, pending: Pending) {
        match position {
            Ok(index) => self.entries[index].1 = pending,
            Err(index) => self.entries.insert(index, (key, pending)),
        }
    }

    /// Nearest key in direction `mode` that is not pending removal.
    pub(crate) fn seek(&self, order: &KeyOrder, key: &[u8], mode: Seek) -> CoreResult<Option<&[u8]>> {
        let position = self.find(order, key)?;
        let live = |index: usize| matches!(self.entries[index].1, Pending::Records(_));
        let found = match mode {
            Seek::Ge | Seek::Gt => {
                let start = match (mode, position) {
                    (Seek::Gt, Ok(index)) => index + 1,
                    (_, Ok(index) | Err(index)) => index,
                };
                (start..self.entries.len()).find(|&index| live(index))
            }
            Seek::Le | Seek::Lt => {
                let end = match (mode, position) {
                    (Seek::Le, Ok(index)) => index + 1,
                    (_, Ok(index) | Err(index)) => index,
                };
                (0..end).rev().find(|&index| live(index))
            }
        };
        Ok(found.map(|index| self.entries[index].0.as_slice()))
    }

    pub(crate) fn first(&self) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(_, pending)| matches!(pending, Pending::Records(_)))
            .map(|(key, _)| key.as_slice())
    }

    pub(crate) fn last(&self) -> Option<&[u8]> {
        self.entries
            .iter()
            .rev()
            .find(|(_, pending)| matches!(pending, Pending::Records(_)))
            .map(|(key, _)| key.as_slice())
    }
}

pub(crate) struct TxnState {
    pub status: TxnStatus,
    pub changes: BTreeMap<DbId, DbChanges>,
}

impl TxnState {
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.status {
            TxnStatus::Active => Ok(()),
            TxnStatus::Committed => Err(CoreError::not_ready("transaction was committed")),
            TxnStatus::Aborted => Err(CoreError::not_ready("transaction was aborted")),
        }
    }

    pub(crate) fn has_changes(&self) -> bool {
        self.changes.values().any(|changes| changes.len() > 0)
    }
}

/// State shared by a transaction handle, its cursors and the manager.
pub(crate) struct TxnShared {
    pub id: TxnId,
    pub state: Mutex<TxnState>,
}

impl TxnShared {
    pub(crate) fn new(id: TxnId) -> Self {
        Self {
            id,
            state: Mutex::new(TxnState {
                status: TxnStatus::Active,
                changes: BTreeMap::new(),
            }),
        }
    }
}
