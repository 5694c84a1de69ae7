//! Page allocation, caching and write batches.
//!
//! The pager owns the page store, the cache and the header page. Page 0
//! stores the allocation state and the serialized catalog:
//!
//! ```text
//! | type (1) | pad (7) | page_count (8) | free_head (8) | free_count (8) |
//! | catalog_len (4) | catalog bytes ... |
//! ```
//!
//! Freed pages form a singly linked list through byte offset 8 of each
//! free page.
//!
//! A write batch records the pre-image of every page it touches so that a
//! failed operation can be undone in memory before anything is flushed.

use crate::error::{CoreError, CoreResult};
use crate::page::cache::PageCache;
use crate::page::store::PageStore;
use crate::page::PageType;
use crate::stats::EnvMetrics;
use crate::types::PageId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const HEADER_FIXED: usize = 36;
const FREE_NEXT_OFFSET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeaderState {
    page_count: u64,
    free_head: u64,
    free_count: u64,
}

struct Batch {
    pre_images: HashMap<PageId, Option<Arc<Vec<u8>>>>,
    header: HeaderState,
}

struct PagerInner {
    store: PageStore,
    cache: PageCache,
    header: HeaderState,
    batch: Option<Batch>,
}

/// Page-level access for the B-tree and the environment.
pub(crate) struct Pager {
    inner: Mutex<PagerInner>,
    page_size: usize,
    read_only: bool,
    metrics: Arc<EnvMetrics>,
}

/// Gauges reported through the environment metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PagerGauges {
    pub page_count: u64,
    pub freelist_pages: u64,
    pub cached_pages: u64,
}

impl Pager {
    /// Initializes a fresh store with an empty header page.
    pub(crate) fn create(
        store: PageStore,
        cache_bytes: u64,
        cache_unlimited: bool,
        metrics: Arc<EnvMetrics>,
    ) -> CoreResult<Self> {
        let pager = Self::assemble(
            store,
            cache_bytes,
            cache_unlimited,
            false,
            HeaderState {
                page_count: 1,
                free_head: 0,
                free_count: 0,
            },
            metrics,
        );
        pager.flush(&[], false)?;
        Ok(pager)
    }

    /// Loads the header page and returns the pager with the stored catalog
    /// bytes.
    pub(crate) fn open(
        store: PageStore,
        cache_bytes: u64,
        cache_unlimited: bool,
        read_only: bool,
        metrics: Arc<EnvMetrics>,
    ) -> CoreResult<(Self, Vec<u8>)> {
        let page = store.read_page(PageId::HEADER)?;
        metrics.record_page_read();

        if page[0] != PageType::Header as u8 {
            return Err(CoreError::integrity("page 0 is not a header page"));
        }
        let header = HeaderState {
            page_count: read_u64(&page, 8),
            free_head: read_u64(&page, 16),
            free_count: read_u64(&page, 24),
        };
        if header.page_count == 0 || header.free_head >= header.page_count {
            return Err(CoreError::integrity("header page allocation state is damaged"));
        }
        let catalog_len = read_u32(&page, 32) as usize;
        if HEADER_FIXED + catalog_len > page.len() {
            return Err(CoreError::integrity("catalog length exceeds header page"));
        }
        let catalog = page[HEADER_FIXED..HEADER_FIXED + catalog_len].to_vec();

        let pager = Self::assemble(
            store,
            cache_bytes,
            cache_unlimited,
            read_only,
            header,
            metrics,
        );
        Ok((pager, catalog))
    }

    fn assemble(
        store: PageStore,
        cache_bytes: u64,
        cache_unlimited: bool,
        read_only: bool,
        header: HeaderState,
        metrics: Arc<EnvMetrics>,
    ) -> Self {
        let page_size = store.page_size();
        let capacity = usize::try_from(cache_bytes / page_size as u64).unwrap_or(usize::MAX);
        Self {
            inner: Mutex::new(PagerInner {
                store,
                cache: PageCache::new(capacity, cache_unlimited),
                header,
                batch: None,
            }),
            page_size,
            read_only,
            metrics,
        }
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes available for the serialized catalog.
    pub(crate) fn catalog_capacity(&self) -> usize {
        self.page_size - HEADER_FIXED
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        self.inner.lock().store.is_encrypted()
    }

    pub(crate) fn has_crc32(&self) -> bool {
        self.inner.lock().store.has_crc32()
    }

    pub(crate) fn format_version(&self) -> (u16, u16) {
        self.inner.lock().store.version()
    }

    pub(crate) fn gauges(&self) -> PagerGauges {
        let inner = self.inner.lock();
        PagerGauges {
            page_count: inner.header.page_count,
            freelist_pages: inner.header.free_count,
            cached_pages: inner.cache.len() as u64,
        }
    }

    /// Returns the contents of a page.
    pub(crate) fn read(&self, page: PageId) -> CoreResult<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        self.read_locked(&mut inner, page)
    }

    fn read_locked(&self, inner: &mut PagerInner, page: PageId) -> CoreResult<Arc<Vec<u8>>> {
        if page == PageId::HEADER || page.as_u64() >= inner.header.page_count {
            return Err(CoreError::integrity(format!(
                "{page} is outside the allocated range"
            )));
        }
        if let Some(data) = inner.cache.get(page) {
            self.metrics.record_cache_hit();
            return Ok(data);
        }
        self.metrics.record_cache_miss();

        self.make_room(inner, page)?;
        let data = Arc::new(inner.store.read_page(page)?);
        self.metrics.record_page_read();
        inner.cache.put(page, Arc::clone(&data), false);
        Ok(data)
    }

    /// Replaces the contents of a page.
    pub(crate) fn write(&self, page: PageId, data: Vec<u8>) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        self.write_locked(&mut inner, page, data)
    }

    fn write_locked(&self, inner: &mut PagerInner, page: PageId, data: Vec<u8>) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::WriteProtected);
        }
        if data.len() != self.page_size {
            return Err(CoreError::internal(format!(
                "{page} write of {} bytes, page size is {}",
                data.len(),
                self.page_size
            )));
        }
        self.record_pre_image(inner, page)?;
        self.make_room(inner, page)?;
        inner.cache.put(page, Arc::new(data), true);
        Ok(())
    }

    fn record_pre_image(&self, inner: &mut PagerInner, page: PageId) -> CoreResult<()> {
        let needs_image = match &inner.batch {
            Some(batch) => !batch.pre_images.contains_key(&page),
            None => false,
        };
        if !needs_image {
            return Ok(());
        }
        let start_count = inner
            .batch
            .as_ref()
            .map_or(0, |batch| batch.header.page_count);
        let image = if page.as_u64() >= start_count {
            None
        } else {
            Some(self.read_locked(inner, page)?)
        };
        if let Some(batch) = inner.batch.as_mut() {
            batch.pre_images.insert(page, image);
        }
        Ok(())
    }

    fn make_room(&self, inner: &mut PagerInner, page: PageId) -> CoreResult<()> {
        while inner.cache.needs_room(page) {
            self.evict_one(inner)?;
        }
        Ok(())
    }

    fn shrink_to_budget(&self, inner: &mut PagerInner) -> CoreResult<()> {
        while inner.cache.over_budget() {
            self.evict_one(inner)?;
        }
        Ok(())
    }

    fn evict_one(&self, inner: &mut PagerInner) -> CoreResult<()> {
        let Some((victim, frame)) = inner.cache.pop_lru() else {
            return Err(CoreError::limits_reached("page cache is full"));
        };
        if frame.dirty {
            if let Err(err) = inner.store.write_page(victim, &frame.data) {
                inner.cache.put(victim, frame.data, true);
                return Err(err);
            }
            self.metrics.record_page_write();
        }
        self.metrics.record_eviction();
        tracing::trace!(page = %victim, dirty = frame.dirty, "evicted page");
        Ok(())
    }

    /// Allocates a page, reusing the freelist first.
    ///
    /// The caller must write the page before reading it.
    pub(crate) fn allocate(&self) -> CoreResult<PageId> {
        if self.read_only {
            return Err(CoreError::WriteProtected);
        }
        let mut inner = self.inner.lock();

        if let Some(head) = PageId::from_link(inner.header.free_head) {
            let data = self.read_locked(&mut inner, head)?;
            if data[0] != PageType::Free as u8 {
                return Err(CoreError::integrity(format!(
                    "{head} on the freelist is not a free page"
                )));
            }
            inner.header.free_head = read_u64(&data, FREE_NEXT_OFFSET);
            inner.header.free_count = inner.header.free_count.saturating_sub(1);
            return Ok(head);
        }

        let page = PageId(inner.header.page_count);
        inner.store.check_capacity(page.as_u64() + 1)?;
        inner.header.page_count += 1;
        Ok(page)
    }

    /// Returns a page to the freelist.
    pub(crate) fn free(&self, page: PageId) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let mut data = vec![0u8; self.page_size];
        data[0] = PageType::Free as u8;
        data[FREE_NEXT_OFFSET..FREE_NEXT_OFFSET + 8]
            .copy_from_slice(&inner.header.free_head.to_le_bytes());
        self.write_locked(&mut inner, page, data)?;
        inner.header.free_head = page.as_u64();
        inner.header.free_count += 1;
        Ok(())
    }

    /// Starts recording pre-images.
    pub(crate) fn begin_batch(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.batch.is_some() {
            return Err(CoreError::internal("a write batch is already active"));
        }
        inner.batch = Some(Batch {
            pre_images: HashMap::new(),
            header: inner.header,
        });
        Ok(())
    }

    /// Keeps every change made since `begin_batch`.
    pub(crate) fn commit_batch(&self) {
        self.inner.lock().batch = None;
    }

    /// Undoes every change made since `begin_batch`.
    pub(crate) fn rollback_batch(&self) {
        let mut inner = self.inner.lock();
        let Some(batch) = inner.batch.take() else {
            return;
        };
        let restored = batch.pre_images.len();
        for (page, image) in batch.pre_images {
            match image {
                Some(data) => inner.cache.put(page, data, true),
                None => {
                    inner.cache.remove(page);
                }
            }
        }
        inner.header = batch.header;
        // Restored pre-images bypass make_room.
        if let Err(err) = self.shrink_to_budget(&mut inner) {
            tracing::warn!(error = %err, "failed to evict after rollback");
        }
        tracing::debug!(pages = restored, "rolled back write batch");
    }

    /// Writes the header page and every dirty page, then flushes the store.
    pub(crate) fn flush(&self, catalog: &[u8], sync: bool) -> CoreResult<()> {
        if self.read_only {
            return Ok(());
        }
        if catalog.len() > self.catalog_capacity() {
            return Err(CoreError::limits_reached(format!(
                "catalog needs {} bytes, header page holds {}",
                catalog.len(),
                self.catalog_capacity()
            )));
        }

        let mut inner = self.inner.lock();
        let header = encode_header(self.page_size, inner.header, catalog);
        inner.store.write_page(PageId::HEADER, &header)?;
        self.metrics.record_page_write();

        let dirty = inner.cache.dirty_pages();
        let count = dirty.len();
        for (page, data) in dirty {
            inner.store.write_page(page, &data)?;
            inner.cache.mark_clean(page);
            self.metrics.record_page_write();
        }
        inner.store.flush(sync)?;
        tracing::debug!(pages = count, sync, "flushed pages");
        Ok(())
    }

    /// Re-encrypts every page with `key`.
    ///
    /// Flushes first, so the catalog must be passed in.
    pub(crate) fn encrypt_all(&self, key: &[u8], catalog: &[u8]) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::WriteProtected);
        }
        self.flush(catalog, false)?;

        let mut inner = self.inner.lock();
        let mut pages = Vec::with_capacity(inner.header.page_count as usize);
        for id in 0..inner.header.page_count {
            pages.push(inner.store.read_page(PageId(id))?);
        }
        inner.store.encrypt_all(key, &pages)?;
        inner.store.flush(true)?;
        tracing::info!(pages = pages.len(), "encrypted all pages");
        Ok(())
    }
}

fn encode_header(page_size: usize, header: HeaderState, catalog: &[u8]) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    page[0] = PageType::Header as u8;
    page[8..16].copy_from_slice(&header.page_count.to_le_bytes());
    page[16..24].copy_from_slice(&header.free_head.to_le_bytes());
    page[24..32].copy_from_slice(&header.free_count.to_le_bytes());
    page[32..36].copy_from_slice(&(catalog.len() as u32).to_le_bytes());
    page[HEADER_FIXED..HEADER_FIXED + catalog.len()].copy_from_slice(catalog);
    page
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::page::store::StoreOptions;
    use burrowdb_storage::InMemoryBackend;

    const PAGE: usize = 1024;

    fn options() -> StoreOptions {
        StoreOptions {
            page_size: PAGE as u32,
            ..StoreOptions::default()
        }
    }

    fn pager(cache_pages: u64) -> Pager {
        let store = PageStore::create(Box::new(InMemoryBackend::new()), &options()).unwrap();
        Pager::create(
            store,
            cache_pages * PAGE as u64,
            false,
            Arc::new(EnvMetrics::new()),
        )
        .unwrap()
    }

    fn filled(byte: u8) -> Vec<u8> {
        let mut page = vec![byte; PAGE];
        page[0] = PageType::Leaf as u8;
        page
    }

    #[test]
    fn allocate_write_read() {
        let pager = pager(16);
        let a = pager.allocate().unwrap();
        let b = pager.allocate().unwrap();
        assert_eq!(a, PageId(1));
        assert_eq!(b, PageId(2));

        pager.write(a, filled(1)).unwrap();
        pager.write(b, filled(2)).unwrap();
        assert_eq!(pager.read(a).unwrap()[1], 1);
        assert_eq!(pager.read(b).unwrap()[1], 2);
        assert_eq!(pager.gauges().page_count, 3);
    }

    #[test]
    fn header_page_is_not_readable() {
        let pager = pager(4);
        let err = pager.read(PageId::HEADER).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IntegrityViolated);
        let err = pager.read(PageId(9)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IntegrityViolated);
    }

    #[test]
    fn freelist_reuses_pages() {
        let pager = pager(16);
        let a = pager.allocate().unwrap();
        pager.write(a, filled(1)).unwrap();
        let b = pager.allocate().unwrap();
        pager.write(b, filled(2)).unwrap();

        pager.free(a).unwrap();
        pager.free(b).unwrap();
        assert_eq!(pager.gauges().freelist_pages, 2);

        assert_eq!(pager.allocate().unwrap(), b);
        assert_eq!(pager.allocate().unwrap(), a);
        assert_eq!(pager.gauges().freelist_pages, 0);
        assert_eq!(pager.allocate().unwrap(), PageId(3));
    }

    #[test]
    fn eviction_writes_back_dirty_pages() {
        let pager = pager(2);
        let pages: Vec<_> = (0..6u8)
            .map(|i| {
                let page = pager.allocate().unwrap();
                pager.write(page, filled(i)).unwrap();
                page
            })
            .collect();

        assert!(pager.gauges().cached_pages <= 2);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(pager.read(*page).unwrap()[1], i as u8);
        }
        assert!(pager.metrics.snapshot().cache_evictions > 0);
    }

    #[test]
    fn rollback_restores_pages_and_header() {
        let pager = pager(16);
        let a = pager.allocate().unwrap();
        pager.write(a, filled(1)).unwrap();

        pager.begin_batch().unwrap();
        pager.write(a, filled(9)).unwrap();
        let b = pager.allocate().unwrap();
        pager.write(b, filled(2)).unwrap();
        pager.free(a).unwrap();
        pager.rollback_batch();

        assert_eq!(pager.read(a).unwrap()[1], 1);
        let gauges = pager.gauges();
        assert_eq!(gauges.page_count, 2);
        assert_eq!(gauges.freelist_pages, 0);
        assert_eq!(pager.allocate().unwrap(), PageId(2));
    }

    #[test]
    fn rollback_stays_within_cache_budget() {
        let pager = pager(2);
        let pages: Vec<_> = (0..6u8)
            .map(|i| {
                let page = pager.allocate().unwrap();
                pager.write(page, filled(i)).unwrap();
                page
            })
            .collect();

        pager.begin_batch().unwrap();
        for page in &pages {
            pager.write(*page, filled(0xEE)).unwrap();
        }
        pager.rollback_batch();

        assert!(pager.gauges().cached_pages <= 2);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(pager.read(*page).unwrap()[1], i as u8);
        }
    }

    #[test]
    fn commit_keeps_changes() {
        let pager = pager(16);
        pager.begin_batch().unwrap();
        let a = pager.allocate().unwrap();
        pager.write(a, filled(4)).unwrap();
        pager.commit_batch();
        pager.rollback_batch();
        assert_eq!(pager.read(a).unwrap()[1], 4);
    }

    #[test]
    fn nested_batches_rejected() {
        let pager = pager(4);
        pager.begin_batch().unwrap();
        assert_eq!(
            pager.begin_batch().unwrap_err().code(),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn flush_and_reopen() {
        use burrowdb_storage::FileBackend;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pager.db");

        let backend = FileBackend::create(&path, 0o644).unwrap();
        let store = PageStore::create(Box::new(backend), &options()).unwrap();
        let pager = Pager::create(store, 1 << 20, false, Arc::new(EnvMetrics::new())).unwrap();
        let a = pager.allocate().unwrap();
        pager.write(a, filled(7)).unwrap();
        pager.flush(b"catalog", false).unwrap();
        drop(pager);

        let backend = FileBackend::open(&path, false).unwrap();
        let store = PageStore::open(Box::new(backend), &options()).unwrap();
        let (pager, catalog) =
            Pager::open(store, 1 << 20, false, false, Arc::new(EnvMetrics::new())).unwrap();
        assert_eq!(catalog, b"catalog");
        assert_eq!(pager.read(a).unwrap()[1], 7);
        assert_eq!(pager.gauges().page_count, 2);
    }

    #[test]
    fn oversized_catalog_rejected() {
        let pager = pager(4);
        let big = vec![0u8; PAGE];
        let err = pager.flush(&big, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::LimitsReached);
    }
}
