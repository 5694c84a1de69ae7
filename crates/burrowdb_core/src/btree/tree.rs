//! B+tree operations.
//!
//! Nodes are decoded from their page, changed in memory and encoded back.
//! Structural repair after a change walks the recorded descent path
//! upwards: an overflowing node is split and its separator pushed into the
//! parent, an underfull node is merged with or redistributed against a
//! sibling, and an internal root left without separators collapses into its
//! only child.

use super::blob;
use super::node::{
    separator_size, EntryValue, InternalNode, LeafEntry, LeafNode, Node, StoredRecord,
    LEAF_HEADER,
};
use crate::compare::KeyOrder;
use crate::error::{CoreError, CoreResult};
use crate::page::Pager;
use crate::stats::EnvMetrics;
use crate::types::PageId;
use std::cmp::Ordering;

/// Nodes filled below this percentage of a page are rebalanced.
const MIN_FILL_PERCENT: usize = 35;
const MAX_DEPTH: usize = 64;

/// Direction of an approximate lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Seek {
    /// Smallest key `>=` the probe.
    Ge,
    /// Smallest key `>` the probe.
    Gt,
    /// Largest key `<=` the probe.
    Le,
    /// Largest key `<` the probe.
    Lt,
}

/// Result of a structural check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TreeReport {
    pub keys: u64,
    pub records: u64,
    pub depth: u32,
    pub leaves: u64,
    pub internal_nodes: u64,
}

struct PathStep {
    page: PageId,
    node: InternalNode,
    index: usize,
}

/// One database index, borrowed for the duration of an operation.
pub(crate) struct BTree<'a> {
    pager: &'a Pager,
    order: &'a KeyOrder,
    metrics: &'a EnvMetrics,
    root: PageId,
}

impl<'a> BTree<'a> {
    pub(crate) fn new(
        pager: &'a Pager,
        order: &'a KeyOrder,
        metrics: &'a EnvMetrics,
        root: PageId,
    ) -> Self {
        Self {
            pager,
            order,
            metrics,
            root,
        }
    }

    /// Allocates an empty root leaf.
    pub(crate) fn create(pager: &Pager) -> CoreResult<PageId> {
        let page = pager.allocate()?;
        let node = Node::Leaf(LeafNode::default());
        pager.write(page, node.encode(pager.page_size())?)?;
        Ok(page)
    }

    /// Current root; changes when the root splits or collapses.
    pub(crate) fn root(&self) -> PageId {
        self.root
    }

    fn load(&self, page: PageId) -> CoreResult<Node> {
        Node::decode(page, &self.pager.read(page)?)
    }

    fn load_leaf(&self, page: PageId) -> CoreResult<LeafNode> {
        match self.load(page)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(CoreError::integrity(format!(
                "{page} is linked as a leaf but is an internal node"
            ))),
        }
    }

    fn store(&self, page: PageId, node: &Node) -> CoreResult<()> {
        self.pager.write(page, node.encode(self.pager.page_size())?)
    }

    /// Binary search over `len` sorted keys.
    fn search<'k>(
        &self,
        len: usize,
        key: &[u8],
        key_at: impl Fn(usize) -> &'k [u8],
    ) -> CoreResult<Result<usize, usize>> {
        let (mut lo, mut hi) = (0, len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.order.compare(key, key_at(mid))? {
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    fn descend(&self, key: &[u8]) -> CoreResult<(Vec<PathStep>, PageId, LeafNode)> {
        let mut path = Vec::new();
        let mut page = self.root;
        loop {
            if path.len() > MAX_DEPTH {
                return Err(CoreError::integrity("B-tree is deeper than possible"));
            }
            match self.load(page)? {
                Node::Leaf(leaf) => return Ok((path, page, leaf)),
                Node::Internal(node) => {
                    let position =
                        self.search(node.keys.len(), key, |i| node.keys[i].as_slice())?;
                    let index = match position {
                        Ok(i) => i + 1,
                        Err(i) => i,
                    };
                    let child = node.children[index];
                    path.push(PathStep { page, node, index });
                    page = child;
                }
            }
        }
    }

    fn edge_leaf(&self, rightmost: bool) -> CoreResult<LeafNode> {
        let mut page = self.root;
        for _ in 0..=MAX_DEPTH {
            match self.load(page)? {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(node) => {
                    page = if rightmost {
                        node.children[node.children.len() - 1]
                    } else {
                        node.children[0]
                    };
                }
            }
        }
        Err(CoreError::integrity("B-tree is deeper than possible"))
    }

    /// Returns the stored value of `key`.
    pub(crate) fn get_value(&self, key: &[u8]) -> CoreResult<Option<EntryValue>> {
        let (_, _, mut leaf) = self.descend(key)?;
        let position =
            self.search(leaf.entries.len(), key, |i| leaf.entries[i].key.as_slice())?;
        match position {
            Ok(index) => Ok(Some(leaf.entries.swap_remove(index).value)),
            Err(_) => Ok(None),
        }
    }

    /// Returns all records of `key` in duplicate order.
    pub(crate) fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<Vec<u8>>>> {
        match self.get_value(key)? {
            Some(value) => Ok(Some(self.load_records(&value)?)),
            None => Ok(None),
        }
    }

    /// Materializes the records of a value.
    pub(crate) fn load_records(&self, value: &EntryValue) -> CoreResult<Vec<Vec<u8>>> {
        match value {
            EntryValue::List(records) => records
                .iter()
                .map(|record| match record {
                    StoredRecord::Inline(bytes) => Ok(bytes.clone()),
                    StoredRecord::Blob { head, len } => {
                        blob::read_blob_exact(self.pager, *head, *len)
                    }
                })
                .collect(),
            EntryValue::Table { head, count } => {
                let data = blob::read_blob(self.pager, *head)?;
                blob::decode_table(*head, &data, *count)
            }
        }
    }

    /// Materializes a single record of a value.
    pub(crate) fn load_record(&self, value: &EntryValue, dup: usize) -> CoreResult<Option<Vec<u8>>> {
        match value {
            EntryValue::List(records) => match records.get(dup) {
                Some(StoredRecord::Inline(bytes)) => Ok(Some(bytes.clone())),
                Some(StoredRecord::Blob { head, len }) => {
                    blob::read_blob_exact(self.pager, *head, *len).map(Some)
                }
                None => Ok(None),
            },
            EntryValue::Table { .. } => {
                let mut records = self.load_records(value)?;
                if dup < records.len() {
                    Ok(Some(records.swap_remove(dup)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Finds the nearest key in direction `mode`.
    pub(crate) fn seek(&self, key: &[u8], mode: Seek) -> CoreResult<Option<Vec<u8>>> {
        let (_, _, leaf) = self.descend(key)?;
        let position =
            self.search(leaf.entries.len(), key, |i| leaf.entries[i].key.as_slice())?;
        match (mode, position) {
            (Seek::Ge, Ok(i) | Err(i)) | (Seek::Gt, Err(i)) => self.forward_from(leaf, i),
            (Seek::Gt, Ok(i)) => self.forward_from(leaf, i + 1),
            (Seek::Le, Ok(i)) => self.backward_from(leaf, i + 1),
            (Seek::Le, Err(i)) | (Seek::Lt, Ok(i) | Err(i)) => self.backward_from(leaf, i),
        }
    }

    /// Smallest key.
    pub(crate) fn first(&self) -> CoreResult<Option<Vec<u8>>> {
        let leaf = self.edge_leaf(false)?;
        self.forward_from(leaf, 0)
    }

    /// Largest key.
    pub(crate) fn last(&self) -> CoreResult<Option<Vec<u8>>> {
        let leaf = self.edge_leaf(true)?;
        let len = leaf.entries.len();
        self.backward_from(leaf, len)
    }

    /// Key at `index`, or the first key of a following leaf.
    fn forward_from(&self, mut leaf: LeafNode, mut index: usize) -> CoreResult<Option<Vec<u8>>> {
        loop {
            if index < leaf.entries.len() {
                return Ok(Some(leaf.entries.swap_remove(index).key));
            }
            match leaf.next {
                Some(next) => {
                    leaf = self.load_leaf(next)?;
                    index = 0;
                }
                None => return Ok(None),
            }
        }
    }

    /// Key at `index - 1`, or the last key of a preceding leaf.
    fn backward_from(&self, mut leaf: LeafNode, mut index: usize) -> CoreResult<Option<Vec<u8>>> {
        loop {
            if index > 0 {
                return Ok(Some(leaf.entries.swap_remove(index - 1).key));
            }
            match leaf.prev {
                Some(prev) => {
                    leaf = self.load_leaf(prev)?;
                    index = leaf.entries.len();
                }
                None => return Ok(None),
            }
        }
    }

    /// Visits every entry in key order until `f` returns `false`.
    pub(crate) fn scan(
        &self,
        mut f: impl FnMut(&[u8], &EntryValue) -> CoreResult<bool>,
    ) -> CoreResult<()> {
        let mut leaf = self.edge_leaf(false)?;
        loop {
            for entry in &leaf.entries {
                if !f(&entry.key, &entry.value)? {
                    return Ok(());
                }
            }
            match leaf.next {
                Some(next) => leaf = self.load_leaf(next)?,
                None => return Ok(()),
            }
        }
    }

    /// Reads, changes and writes back the records of `key`.
    ///
    /// `f` receives the current records (`None` if the key is absent) and
    /// returns the new records (`None` or empty to remove the key) plus a
    /// result passed through to the caller. An error from `f` leaves the
    /// tree untouched.
    pub(crate) fn modify<T>(
        &mut self,
        key: &[u8],
        f: impl FnOnce(Option<Vec<Vec<u8>>>) -> CoreResult<(Option<Vec<Vec<u8>>>, T)>,
    ) -> CoreResult<T> {
        let (path, page, mut leaf) = self.descend(key)?;
        let position =
            self.search(leaf.entries.len(), key, |i| leaf.entries[i].key.as_slice())?;
        let current = match position {
            Ok(index) => Some(self.load_records(&leaf.entries[index].value)?),
            Err(_) => None,
        };

        let (records, output) = f(current)?;
        match (position, records.filter(|records| !records.is_empty())) {
            (Err(_), None) => return Ok(output),
            (Ok(index), None) => {
                let removed = leaf.entries.remove(index);
                self.free_value(&removed.value)?;
            }
            (Ok(index), Some(records)) => {
                self.free_value(&leaf.entries[index].value)?;
                leaf.entries[index].value = self.store_value(records)?;
            }
            (Err(index), Some(records)) => {
                let value = self.store_value(records)?;
                leaf.entries.insert(
                    index,
                    LeafEntry {
                        key: key.to_vec(),
                        value,
                    },
                );
            }
        }

        self.rebalance(path, page, Node::Leaf(leaf))?;
        Ok(output)
    }

    fn store_value(&self, records: Vec<Vec<u8>>) -> CoreResult<EntryValue> {
        let page_size = self.pager.page_size();
        let inline_limit = page_size / 16;
        let list_size = 5 + records
            .iter()
            .map(|r| if r.len() > inline_limit { 17 } else { 5 + r.len() })
            .sum::<usize>();

        if records.len() > 1 && list_size > page_size / 8 {
            let count = u32::try_from(records.len())
                .map_err(|_| CoreError::limits_reached("too many duplicates"))?;
            let head = blob::write_blob(self.pager, &blob::encode_table(&records))?;
            return Ok(EntryValue::Table { head, count });
        }

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            if record.len() > inline_limit {
                let head = blob::write_blob(self.pager, &record)?;
                stored.push(StoredRecord::Blob {
                    head,
                    len: record.len() as u64,
                });
            } else {
                stored.push(StoredRecord::Inline(record));
            }
        }
        Ok(EntryValue::List(stored))
    }

    fn free_value(&self, value: &EntryValue) -> CoreResult<()> {
        match value {
            EntryValue::List(records) => {
                for record in records {
                    if let StoredRecord::Blob { head, .. } = record {
                        blob::free_blob(self.pager, *head)?;
                    }
                }
                Ok(())
            }
            EntryValue::Table { head, .. } => blob::free_blob(self.pager, *head),
        }
    }

    fn is_underfull(&self, node: &Node) -> bool {
        node.encoded_size() * 100 < self.pager.page_size() * MIN_FILL_PERCENT
    }

    fn rebalance(&mut self, mut path: Vec<PathStep>, mut page: PageId, mut node: Node) -> CoreResult<()> {
        loop {
            if node.encoded_size() > self.pager.page_size() {
                let (right, separator) = self.split(page, node)?;
                let Some(step) = path.pop() else {
                    let new_root = self.pager.allocate()?;
                    let root = Node::Internal(InternalNode {
                        keys: vec![separator],
                        children: vec![page, right],
                    });
                    self.store(new_root, &root)?;
                    self.root = new_root;
                    tracing::debug!(root = %new_root, "root split");
                    return Ok(());
                };
                let mut parent = step.node;
                parent.keys.insert(step.index, separator);
                parent.children.insert(step.index + 1, right);
                page = step.page;
                node = Node::Internal(parent);
                continue;
            }

            match path.pop() {
                None => return self.store_root(page, node),
                Some(step) if self.is_underfull(&node) => {
                    let parent = self.rebalance_child(step.node, step.index, page, node)?;
                    page = step.page;
                    node = Node::Internal(parent);
                }
                Some(_) => return self.store(page, &node),
            }
        }
    }

    fn store_root(&mut self, page: PageId, node: Node) -> CoreResult<()> {
        if let Node::Internal(internal) = &node {
            if internal.keys.is_empty() {
                let child = internal.children[0];
                self.pager.free(page)?;
                self.root = child;
                tracing::debug!(root = %child, "root collapsed");
                return Ok(());
            }
        }
        self.store(page, &node)
    }

    /// Splits an overflowing node; `page` keeps the left half.
    fn split(&self, page: PageId, node: Node) -> CoreResult<(PageId, Vec<u8>)> {
        let right_page = self.pager.allocate()?;
        let separator = match node {
            Node::Leaf(mut left) => {
                let sizes: Vec<usize> = left.entries.iter().map(LeafEntry::encoded_size).collect();
                let at = split_point(&sizes, 1)?;
                let right = LeafNode {
                    prev: Some(page),
                    next: left.next,
                    entries: left.entries.split_off(at),
                };
                if let Some(next) = left.next {
                    self.relink_prev(next, right_page)?;
                }
                left.next = Some(right_page);
                let separator = right.entries[0].key.clone();
                self.store(page, &Node::Leaf(left))?;
                self.store(right_page, &Node::Leaf(right))?;
                separator
            }
            Node::Internal(mut left) => {
                let sizes: Vec<usize> = left.keys.iter().map(|k| separator_size(k)).collect();
                let at = split_point(&sizes, 2)?;
                let mut right_keys = left.keys.split_off(at);
                let separator = right_keys.remove(0);
                let right = InternalNode {
                    keys: right_keys,
                    children: left.children.split_off(at + 1),
                };
                self.store(page, &Node::Internal(left))?;
                self.store(right_page, &Node::Internal(right))?;
                separator
            }
        };
        self.metrics.record_split();
        tracing::trace!(left = %page, right = %right_page, "split node");
        Ok((right_page, separator))
    }

    fn relink_prev(&self, page: PageId, prev: PageId) -> CoreResult<()> {
        let mut leaf = self.load_leaf(page)?;
        leaf.prev = Some(prev);
        self.store(page, &Node::Leaf(leaf))
    }

    /// Merges the underfull child at `index` with a sibling, or evens out
    /// their contents, and returns the updated parent.
    fn rebalance_child(
        &self,
        mut parent: InternalNode,
        index: usize,
        page: PageId,
        node: Node,
    ) -> CoreResult<InternalNode> {
        if parent.children.len() < 2 {
            self.store(page, &node)?;
            return Ok(parent);
        }
        let left_index = index.saturating_sub(1);
        let right_index = left_index + 1;
        let left_page = parent.children[left_index];
        let right_page = parent.children[right_index];
        let (left, right) = if index == left_index {
            (node, self.load(right_page)?)
        } else {
            (self.load(left_page)?, node)
        };
        let page_size = self.pager.page_size();

        match (left, right) {
            (Node::Leaf(mut left), Node::Leaf(right)) => {
                let combined = left.encoded_size() + right.encoded_size() - LEAF_HEADER;
                if combined <= page_size {
                    left.entries.extend(right.entries);
                    left.next = right.next;
                    if let Some(next) = right.next {
                        self.relink_prev(next, left_page)?;
                    }
                    self.store(left_page, &Node::Leaf(left))?;
                    self.pager.free(right_page)?;
                    parent.keys.remove(left_index);
                    parent.children.remove(right_index);
                    tracing::trace!(left = %left_page, right = %right_page, "merged leaves");
                } else {
                    let mut entries = left.entries;
                    entries.extend(right.entries);
                    let sizes: Vec<usize> = entries.iter().map(LeafEntry::encoded_size).collect();
                    let at = split_point(&sizes, 1)?;
                    let moved = entries.split_off(at);
                    parent.keys[left_index] = moved[0].key.clone();
                    self.store(
                        left_page,
                        &Node::Leaf(LeafNode {
                            prev: left.prev,
                            next: Some(right_page),
                            entries,
                        }),
                    )?;
                    self.store(
                        right_page,
                        &Node::Leaf(LeafNode {
                            prev: Some(left_page),
                            next: right.next,
                            entries: moved,
                        }),
                    )?;
                    tracing::trace!(left = %left_page, right = %right_page, "redistributed leaves");
                }
            }
            (Node::Internal(left), Node::Internal(right)) => {
                let mut keys = left.keys;
                keys.push(parent.keys[left_index].clone());
                keys.extend(right.keys);
                let mut children = left.children;
                children.extend(right.children);
                let mut merged = InternalNode { keys, children };

                if merged.encoded_size() <= page_size {
                    self.store(left_page, &Node::Internal(merged))?;
                    self.pager.free(right_page)?;
                    parent.keys.remove(left_index);
                    parent.children.remove(right_index);
                    tracing::trace!(left = %left_page, right = %right_page, "merged internal nodes");
                } else {
                    let sizes: Vec<usize> = merged.keys.iter().map(|k| separator_size(k)).collect();
                    let at = split_point(&sizes, 2)?;
                    let mut right_keys = merged.keys.split_off(at);
                    parent.keys[left_index] = right_keys.remove(0);
                    let right = InternalNode {
                        keys: right_keys,
                        children: merged.children.split_off(at + 1),
                    };
                    self.store(left_page, &Node::Internal(merged))?;
                    self.store(right_page, &Node::Internal(right))?;
                    tracing::trace!(left = %left_page, right = %right_page, "redistributed internal nodes");
                }
            }
            _ => {
                return Err(CoreError::integrity(format!(
                    "siblings {left_page} and {right_page} are at different depths"
                )))
            }
        }
        self.metrics.record_merge();
        Ok(parent)
    }

    /// Frees every page of the tree, blobs included.
    pub(crate) fn destroy(self) -> CoreResult<()> {
        let mut stack = vec![self.root];
        while let Some(page) = stack.pop() {
            match self.load(page)? {
                Node::Leaf(leaf) => {
                    for entry in &leaf.entries {
                        self.free_value(&entry.value)?;
                    }
                }
                Node::Internal(node) => stack.extend(node.children),
            }
            self.pager.free(page)?;
        }
        Ok(())
    }

    /// Verifies ordering, separator bounds, leaf depth, the leaf chain and
    /// duplicate storage.
    pub(crate) fn check(&self) -> CoreResult<TreeReport> {
        let mut report = TreeReport::default();
        let mut leaves = Vec::new();
        self.check_node(self.root, None, None, 1, &mut report, &mut leaves)?;

        for (index, (page, prev, next)) in leaves.iter().enumerate() {
            let expected_prev = index.checked_sub(1).map(|i| leaves[i].0);
            let expected_next = leaves.get(index + 1).map(|leaf| leaf.0);
            if *prev != expected_prev || *next != expected_next {
                return Err(CoreError::integrity(format!(
                    "leaf chain is broken at {page}"
                )));
            }
        }
        Ok(report)
    }

    fn check_node(
        &self,
        page: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: u32,
        report: &mut TreeReport,
        leaves: &mut Vec<(PageId, Option<PageId>, Option<PageId>)>,
    ) -> CoreResult<()> {
        if depth as usize > MAX_DEPTH {
            return Err(CoreError::integrity("B-tree is deeper than possible"));
        }
        match self.load(page)? {
            Node::Leaf(leaf) => {
                if report.depth == 0 {
                    report.depth = depth;
                } else if report.depth != depth {
                    return Err(CoreError::integrity(format!(
                        "leaf {page} is at depth {depth}, expected {}",
                        report.depth
                    )));
                }
                let keys: Vec<&[u8]> = leaf.entries.iter().map(|e| e.key.as_slice()).collect();
                self.check_keys(page, &keys, lower, upper)?;

                for entry in &leaf.entries {
                    let records = self.load_records(&entry.value)?;
                    if records.is_empty() {
                        return Err(CoreError::integrity(format!(
                            "{page} holds a key without records"
                        )));
                    }
                    report.keys += 1;
                    report.records += records.len() as u64;
                }
                report.leaves += 1;
                leaves.push((page, leaf.prev, leaf.next));
            }
            Node::Internal(node) => {
                let keys: Vec<&[u8]> = node.keys.iter().map(Vec::as_slice).collect();
                self.check_keys(page, &keys, lower, upper)?;
                report.internal_nodes += 1;

                for (index, child) in node.children.iter().enumerate() {
                    let child_lower = if index == 0 { lower } else { Some(keys[index - 1]) };
                    let child_upper = keys.get(index).copied().or(upper);
                    self.check_node(*child, child_lower, child_upper, depth + 1, report, leaves)?;
                }
            }
        }
        Ok(())
    }

    fn check_keys(
        &self,
        page: PageId,
        keys: &[&[u8]],
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> CoreResult<()> {
        for pair in keys.windows(2) {
            if self.order.compare(pair[0], pair[1])? != Ordering::Less {
                return Err(CoreError::integrity(format!("{page} keys are out of order")));
            }
        }
        if let (Some(lower), Some(first)) = (lower, keys.first()) {
            if self.order.compare(first, lower)? == Ordering::Less {
                return Err(CoreError::integrity(format!(
                    "{page} holds a key below its separator"
                )));
            }
        }
        if let (Some(upper), Some(last)) = (upper, keys.last()) {
            if self.order.compare(last, upper)? != Ordering::Less {
                return Err(CoreError::integrity(format!(
                    "{page} holds a key above its separator"
                )));
            }
        }
        Ok(())
    }
}

/// Chooses where to cut a node so both halves hold about the same bytes.
///
/// Returns an index in `1..=len - min_right`.
fn split_point(sizes: &[usize], min_right: usize) -> CoreResult<usize> {
    if sizes.len() < min_right + 1 {
        return Err(CoreError::internal("node has too few entries to split"));
    }
    let total: usize = sizes.iter().sum();
    let mut acc = 0;
    let mut at = sizes.len() - min_right;
    for (index, size) in sizes.iter().enumerate() {
        acc += size;
        if acc * 2 >= total {
            at = index + 1;
            break;
        }
    }
    Ok(at.clamp(1, sizes.len() - min_right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::compare_fn;
    use crate::error::ErrorCode;
    use crate::page::{PageStore, StoreOptions};
    use burrowdb_storage::InMemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    struct Fixture {
        pager: Pager,
        order: KeyOrder,
        metrics: Arc<EnvMetrics>,
        root: PageId,
    }

    impl Fixture {
        fn new(order: KeyOrder) -> Self {
            let metrics = Arc::new(EnvMetrics::new());
            let options = StoreOptions {
                page_size: 1024,
                ..StoreOptions::default()
            };
            let store = PageStore::create(Box::new(InMemoryBackend::new()), &options).unwrap();
            let pager = Pager::create(store, 1 << 20, false, Arc::clone(&metrics)).unwrap();
            let root = BTree::create(&pager).unwrap();
            Self {
                pager,
                order,
                metrics,
                root,
            }
        }

        fn tree(&self) -> BTree<'_> {
            BTree::new(&self.pager, &self.order, &self.metrics, self.root)
        }

        fn put(&mut self, key: &[u8], record: &[u8]) {
            let mut tree = self.tree();
            tree.modify(key, |_| Ok((Some(vec![record.to_vec()]), ())))
                .unwrap();
            self.root = tree.root();
        }

        fn append(&mut self, key: &[u8], record: &[u8]) {
            let mut tree = self.tree();
            tree.modify(key, |current| {
                let mut records = current.unwrap_or_default();
                records.push(record.to_vec());
                Ok((Some(records), ()))
            })
            .unwrap();
            self.root = tree.root();
        }

        fn remove(&mut self, key: &[u8]) {
            let mut tree = self.tree();
            tree.modify(key, |_| Ok((None, ()))).unwrap();
            self.root = tree.root();
        }

        fn keys(&self) -> Vec<Vec<u8>> {
            let mut keys = Vec::new();
            self.tree()
                .scan(|key, _| {
                    keys.push(key.to_vec());
                    Ok(true)
                })
                .unwrap();
            keys
        }
    }

    fn key(i: u32) -> Vec<u8> {
        format!("key-{i:06}").into_bytes()
    }

    #[test]
    fn insert_and_get() {
        let mut fx = Fixture::new(KeyOrder::Bytes);
        fx.put(b"b", b"2");
        fx.put(b"a", b"1");
        assert_eq!(fx.tree().get(b"a").unwrap(), Some(vec![b"1".to_vec()]));
        assert_eq!(fx.tree().get(b"c").unwrap(), None);
        assert_eq!(fx.keys(), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn many_inserts_split_and_stay_ordered() {
        let mut fx = Fixture::new(KeyOrder::Bytes);
        for i in (0..2000).rev() {
            fx.put(&key(i), &[i as u8; 20]);
        }
        let report = fx.tree().check().unwrap();
        assert_eq!(report.keys, 2000);
        assert!(report.depth >= 3);
        assert!(fx.metrics.snapshot().splits > 0);

        let keys = fx.keys();
        assert_eq!(keys.len(), 2000);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn erasing_everything_shrinks_tree() {
        let mut fx = Fixture::new(KeyOrder::Bytes);
        for i in 0..1500 {
            fx.put(&key(i), b"value");
        }
        let grown = fx.pager.gauges().page_count;
        for i in 0..1500 {
            fx.remove(&key(i));
            if i % 250 == 0 {
                fx.tree().check().unwrap();
            }
        }
        let report = fx.tree().check().unwrap();
        assert_eq!(report.keys, 0);
        assert_eq!(report.depth, 1);
        assert!(fx.metrics.snapshot().merges > 0);

        // Freed pages are reused instead of growing the file.
        for i in 0..1500 {
            fx.put(&key(i), b"value");
        }
        assert!(fx.pager.gauges().page_count <= grown);
    }

    #[test]
    fn interleaved_erase_keeps_invariants() {
        let mut fx = Fixture::new(KeyOrder::Bytes);
        for i in 0..1200 {
            fx.put(&key(i), &vec![b'x'; (i % 40) as usize]);
        }
        for i in (0..1200).filter(|i| i % 3 != 0) {
            fx.remove(&key(i));
        }
        let report = fx.tree().check().unwrap();
        assert_eq!(report.keys, 400);
        assert_eq!(fx.tree().get(&key(3)).unwrap().unwrap()[0].len(), 3);
        assert!(fx.tree().get(&key(4)).unwrap().is_none());
    }

    #[test]
    fn seek_modes() {
        let mut fx = Fixture::new(KeyOrder::Unsigned);
        for i in (10u32..=1000).step_by(10) {
            fx.put(&i.to_le_bytes(), b"r");
        }
        let tree = fx.tree();
        let probe = |k: u32, mode| {
            tree.seek(&k.to_le_bytes(), mode)
                .unwrap()
                .map(|bytes| u32::from_le_bytes(bytes.try_into().unwrap()))
        };

        assert_eq!(probe(15, Seek::Ge), Some(20));
        assert_eq!(probe(20, Seek::Ge), Some(20));
        assert_eq!(probe(20, Seek::Gt), Some(30));
        assert_eq!(probe(15, Seek::Le), Some(10));
        assert_eq!(probe(20, Seek::Le), Some(20));
        assert_eq!(probe(20, Seek::Lt), Some(10));
        assert_eq!(probe(5, Seek::Lt), None);
        assert_eq!(probe(1000, Seek::Gt), None);
        assert_eq!(probe(5000, Seek::Le), Some(1000));

        assert_eq!(tree.first().unwrap(), Some(10u32.to_le_bytes().to_vec()));
        assert_eq!(tree.last().unwrap(), Some(1000u32.to_le_bytes().to_vec()));
    }

    #[test]
    fn empty_tree_edges() {
        let fx = Fixture::new(KeyOrder::Bytes);
        let tree = fx.tree();
        assert_eq!(tree.first().unwrap(), None);
        assert_eq!(tree.last().unwrap(), None);
        assert_eq!(tree.seek(b"x", Seek::Ge).unwrap(), None);
    }

    #[test]
    fn large_records_use_blobs() {
        let mut fx = Fixture::new(KeyOrder::Bytes);
        let big = vec![0xCD; 10_000];
        fx.put(b"big", &big);
        assert_eq!(fx.tree().get(b"big").unwrap(), Some(vec![big]));

        let before = fx.pager.gauges().freelist_pages;
        fx.remove(b"big");
        assert!(fx.pager.gauges().freelist_pages > before + 5);
    }

    #[test]
    fn duplicates_move_to_table() {
        let mut fx = Fixture::new(KeyOrder::Bytes);
        for i in 0..100u32 {
            fx.append(b"dup", &i.to_le_bytes());
        }
        let value = fx.tree().get_value(b"dup").unwrap().unwrap();
        assert!(matches!(value, EntryValue::Table { count: 100, .. }));

        let records = fx.tree().get(b"dup").unwrap().unwrap();
        assert_eq!(records.len(), 100);
        assert_eq!(records[42], 42u32.to_le_bytes().to_vec());
        assert_eq!(
            fx.tree().load_record(&value, 99).unwrap(),
            Some(99u32.to_le_bytes().to_vec())
        );
        assert_eq!(fx.tree().load_record(&value, 100).unwrap(), None);
        assert_eq!(fx.tree().check().unwrap().records, 100);
    }

    #[test]
    fn failing_callback_changes_nothing() {
        let mut fx = Fixture::new(KeyOrder::Bytes);
        fx.put(b"a", b"1");
        let mut tree = fx.tree();
        let err = tree
            .modify(b"a", |_| -> CoreResult<(Option<Vec<Vec<u8>>>, ())> {
                Err(CoreError::DuplicateKey)
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateKey);
        assert_eq!(fx.tree().get(b"a").unwrap(), Some(vec![b"1".to_vec()]));
    }

    #[test]
    fn comparator_calls_on_sequential_insert() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let order = KeyOrder::Custom(Some(compare_fn(move |a: &[u8], b: &[u8]| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(a.cmp(b))
        })));
        let mut fx = Fixture::new(order);
        fx.put(b"1", b"");
        fx.put(b"2", b"");
        fx.put(b"3", b"");
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn comparator_error_propagates() {
        let order = KeyOrder::Custom(Some(compare_fn(|_: &[u8], _: &[u8]| {
            Err("boom".into())
        })));
        let mut fx = Fixture::new(order);
        fx.put(b"only", b"");
        let mut tree = fx.tree();
        let err = tree
            .modify(b"other", |_| Ok((Some(vec![Vec::new()]), ())))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CallbackFailed);
    }

    #[test]
    fn destroy_frees_pages() {
        let mut fx = Fixture::new(KeyOrder::Bytes);
        for i in 0..500 {
            fx.put(&key(i), &[0u8; 100]);
        }
        let allocated = fx.pager.gauges().page_count - 1;
        fx.tree().destroy().unwrap();
        assert_eq!(fx.pager.gauges().freelist_pages, allocated);
    }

    #[test]
    fn split_point_balances_bytes() {
        assert_eq!(split_point(&[10, 10, 10, 10], 1).unwrap(), 2);
        assert_eq!(split_point(&[100, 1, 1], 1).unwrap(), 1);
        assert_eq!(split_point(&[1, 1, 100], 1).unwrap(), 2);
        assert_eq!(split_point(&[1, 1, 100], 2).unwrap(), 1);
        assert!(split_point(&[5], 1).is_err());
    }
}
