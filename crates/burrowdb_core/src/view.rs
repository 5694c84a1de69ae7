//! Read view of one database: the committed tree plus, under a
//! transaction, that transaction's pending changes.

use crate::btree::{BTree, Seek};
use crate::compare::KeyOrder;
use crate::error::CoreResult;
use crate::txn::{DbChanges, Pending};
use std::cmp::Ordering;

pub(crate) struct View<'a> {
    tree: BTree<'a>,
    order: &'a KeyOrder,
    changes: Option<&'a DbChanges>,
}

impl<'a> View<'a> {
    pub(crate) fn new(tree: BTree<'a>, order: &'a KeyOrder, changes: Option<&'a DbChanges>) -> Self {
        Self {
            tree,
            order,
            changes,
        }
    }

    pub(crate) fn tree(&self) -> &BTree<'a> {
        &self.tree
    }

    fn pending(&self, key: &[u8]) -> CoreResult<Option<&'a Pending>> {
        match self.changes {
            Some(changes) => changes.get(self.order, key),
            None => Ok(None),
        }
    }

    fn is_erased(&self, key: &[u8]) -> CoreResult<bool> {
        Ok(matches!(self.pending(key)?, Some(Pending::Erased)))
    }

    /// All records of `key`, or `None` if the key is absent.
    pub(crate) fn records(&self, key: &[u8]) -> CoreResult<Option<Vec<Vec<u8>>>> {
        match self.pending(key)? {
            Some(pending) => Ok(pending.records().map(<[Vec<u8>]>::to_vec)),
            None => self.tree.get(key),
        }
    }

    /// Nearest visible key in direction `mode`.
    pub(crate) fn seek(&self, key: &[u8], mode: Seek) -> CoreResult<Option<Vec<u8>>> {
        let committed = self.tree.seek(key, mode)?;
        let committed = self.skip_erased(committed, mode)?;
        let pending = match self.changes {
            Some(changes) => changes.seek(self.order, key, mode)?.map(<[u8]>::to_vec),
            None => None,
        };
        self.nearest(committed, pending, matches!(mode, Seek::Ge | Seek::Gt))
    }

    pub(crate) fn first(&self) -> CoreResult<Option<Vec<u8>>> {
        let committed = self.tree.first()?;
        let committed = self.skip_erased(committed, Seek::Gt)?;
        let pending = self.changes.and_then(DbChanges::first).map(<[u8]>::to_vec);
        self.nearest(committed, pending, true)
    }

    pub(crate) fn last(&self) -> CoreResult<Option<Vec<u8>>> {
        let committed = self.tree.last()?;
        let committed = self.skip_erased(committed, Seek::Lt)?;
        let pending = self.changes.and_then(DbChanges::last).map(<[u8]>::to_vec);
        self.nearest(committed, pending, false)
    }

    /// Walks past committed keys that are pending removal.
    fn skip_erased(&self, mut candidate: Option<Vec<u8>>, mode: Seek) -> CoreResult<Option<Vec<u8>>> {
        let strict = match mode {
            Seek::Ge | Seek::Gt => Seek::Gt,
            Seek::Le | Seek::Lt => Seek::Lt,
        };
        while let Some(key) = candidate {
            if !self.is_erased(&key)? {
                return Ok(Some(key));
            }
            candidate = self.tree.seek(&key, strict)?;
        }
        Ok(None)
    }

    /// Picks the closer of a committed and a pending candidate.
    fn nearest(
        &self,
        committed: Option<Vec<u8>>,
        pending: Option<Vec<u8>>,
        forward: bool,
    ) -> CoreResult<Option<Vec<u8>>> {
        match (committed, pending) {
            (Some(committed), Some(pending)) => {
                let ordering = self.order.compare(&committed, &pending)?;
                let take_committed = match ordering {
                    Ordering::Less => forward,
                    Ordering::Greater => !forward,
                    Ordering::Equal => false,
                };
                Ok(Some(if take_committed { committed } else { pending }))
            }
            (committed, pending) => Ok(committed.or(pending)),
        }
    }

    /// Number of records, or of keys when `distinct` is set.
    pub(crate) fn count(&self, distinct: bool) -> CoreResult<u64> {
        let weight = |records: usize| if distinct { 1 } else { records as u64 };
        let mut total = 0u64;
        self.tree.scan(|_, value| {
            total += weight(value.record_count());
            Ok(true)
        })?;

        if let Some(changes) = self.changes {
            for (key, pending) in changes.iter() {
                let committed = self
                    .tree
                    .get_value(key)?
                    .map_or(0, |value| weight(value.record_count()));
                let pending = pending.records().map_or(0, |records| weight(records.len()));
                total = total - committed + pending;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::db::DbShared;
    use crate::page::{PageStore, Pager, StoreOptions};
    use crate::stats::EnvMetrics;
    use crate::types::{DbId, PageId};
    use burrowdb_storage::InMemoryBackend;
    use std::sync::Arc;

    struct Fixture {
        pager: Pager,
        metrics: EnvMetrics,
        order: KeyOrder,
        root: PageId,
        changes: DbChanges,
    }

    impl Fixture {
        fn new(committed: &[&[u8]]) -> Self {
            let options = StoreOptions {
                page_size: 1024,
                ..StoreOptions::default()
            };
            let store = PageStore::create(Box::new(InMemoryBackend::new()), &options).unwrap();
            let metrics = Arc::new(EnvMetrics::new());
            let pager = Pager::create(store, 1 << 20, false, Arc::clone(&metrics)).unwrap();
            let order = KeyOrder::Bytes;
            let root = BTree::create(&pager).unwrap();
            let mut tree = BTree::new(&pager, &order, &metrics, root);
            for key in committed {
                tree.modify(key, |_| Ok((Some(vec![b"c".to_vec()]), ()))).unwrap();
            }
            let root = tree.root();
            let db = Arc::new(DbShared::new(DbId(1), 1, DbConfig::new(), KeyOrder::Bytes));
            Self {
                pager,
                metrics: EnvMetrics::new(),
                order,
                root,
                changes: DbChanges::new(db),
            }
        }

        fn stage(&mut self, key: &[u8], records: Option<Vec<Vec<u8>>>) {
            let position = self.changes.find(&self.order, key).unwrap();
            self.changes
                .put_at(position, key.to_vec(), Pending::from_records(records));
        }

        fn view(&self) -> View<'_> {
            let tree = BTree::new(&self.pager, &self.order, &self.metrics, self.root);
            View::new(tree, &self.order, Some(&self.changes))
        }
    }

    #[test]
    fn pending_records_override_tree() {
        let mut fixture = Fixture::new(&[b"a", b"b"]);
        fixture.stage(b"a", Some(vec![b"p".to_vec(), b"q".to_vec()]));
        fixture.stage(b"b", None);

        let view = fixture.view();
        assert_eq!(
            view.records(b"a").unwrap(),
            Some(vec![b"p".to_vec(), b"q".to_vec()])
        );
        assert_eq!(view.records(b"b").unwrap(), None);
        assert_eq!(view.count(false).unwrap(), 2);
        assert_eq!(view.count(true).unwrap(), 1);
    }

    #[test]
    fn navigation_merges_both_sources() {
        let mut fixture = Fixture::new(&[b"b", b"d", b"f"]);
        fixture.stage(b"a", Some(vec![b"x".to_vec()]));
        fixture.stage(b"d", None);
        fixture.stage(b"e", Some(vec![b"x".to_vec()]));

        let view = fixture.view();
        assert_eq!(view.first().unwrap(), Some(b"a".to_vec()));
        assert_eq!(view.last().unwrap(), Some(b"f".to_vec()));
        assert_eq!(view.seek(b"b", Seek::Gt).unwrap(), Some(b"e".to_vec()));
        assert_eq!(view.seek(b"c", Seek::Ge).unwrap(), Some(b"e".to_vec()));
        assert_eq!(view.seek(b"e", Seek::Lt).unwrap(), Some(b"b".to_vec()));
        assert_eq!(view.seek(b"d", Seek::Le).unwrap(), Some(b"b".to_vec()));
        assert_eq!(view.seek(b"f", Seek::Gt).unwrap(), None);
    }

    #[test]
    fn erased_edges_are_skipped() {
        let mut fixture = Fixture::new(&[b"a", b"b", b"c"]);
        fixture.stage(b"a", None);
        fixture.stage(b"c", None);

        let view = fixture.view();
        assert_eq!(view.first().unwrap(), Some(b"b".to_vec()));
        assert_eq!(view.last().unwrap(), Some(b"b".to_vec()));

        fixture.stage(b"b", None);
        let view = fixture.view();
        assert_eq!(view.first().unwrap(), None);
        assert_eq!(view.count(false).unwrap(), 0);
    }
}
