//! LRU page cache.

use crate::types::PageId;
use std::collections::HashMap;
use std::sync::Arc;

/// A cached page.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub data: Arc<Vec<u8>>,
    pub dirty: bool,
    last_used: u64,
}

/// Holds decoded pages, bounded by a page count unless unlimited.
///
/// Pages are shared as `Arc<Vec<u8>>`, so evicting a page that a reader
/// still holds is harmless. Dirty frames must be written back by the
/// caller before they are dropped.
#[derive(Debug)]
pub(crate) struct PageCache {
    frames: HashMap<PageId, Frame>,
    capacity: usize,
    unlimited: bool,
    tick: u64,
}

impl PageCache {
    pub(crate) fn new(capacity: usize, unlimited: bool) -> Self {
        Self {
            frames: HashMap::new(),
            capacity: capacity.max(1),
            unlimited,
            tick: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn get(&mut self, page: PageId) -> Option<Arc<Vec<u8>>> {
        self.tick += 1;
        let tick = self.tick;
        self.frames.get_mut(&page).map(|frame| {
            frame.last_used = tick;
            Arc::clone(&frame.data)
        })
    }

    /// Inserts or replaces a page. A dirty page stays dirty.
    pub(crate) fn put(&mut self, page: PageId, data: Arc<Vec<u8>>, dirty: bool) {
        self.tick += 1;
        let tick = self.tick;
        self.frames
            .entry(page)
            .and_modify(|frame| {
                frame.data = Arc::clone(&data);
                frame.dirty |= dirty;
                frame.last_used = tick;
            })
            .or_insert(Frame {
                data,
                dirty,
                last_used: tick,
            });
    }

    pub(crate) fn remove(&mut self, page: PageId) -> Option<Frame> {
        self.frames.remove(&page)
    }

    /// Returns true if adding `page` would exceed the budget.
    pub(crate) fn needs_room(&self, page: PageId) -> bool {
        !self.unlimited && !self.frames.contains_key(&page) && self.frames.len() >= self.capacity
    }

    /// Returns true if the cache holds more frames than the budget.
    pub(crate) fn over_budget(&self) -> bool {
        !self.unlimited && self.frames.len() > self.capacity
    }

    /// Removes the least recently used frame.
    pub(crate) fn pop_lru(&mut self) -> Option<(PageId, Frame)> {
        let victim = self
            .frames
            .iter()
            .min_by_key(|(_, frame)| frame.last_used)
            .map(|(page, _)| *page)?;
        self.frames.remove(&victim).map(|frame| (victim, frame))
    }

    /// Dirty pages in page order.
    pub(crate) fn dirty_pages(&self) -> Vec<(PageId, Arc<Vec<u8>>)> {
        let mut dirty: Vec<_> = self
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(page, frame)| (*page, Arc::clone(&frame.data)))
            .collect();
        dirty.sort_by_key(|(page, _)| *page);
        dirty
    }

    pub(crate) fn mark_clean(&mut self, page: PageId) {
        if let Some(frame) = self.frames.get_mut(&page) {
            frame.dirty = false;
        }
    }
}
