//! Environment statistics.
//!
//! Counters are updated by the pager, the B-tree and the transaction code
//! and can be read while operations are in progress.
//!
//! # Usage
//!
//! ```rust,ignore
//! let env = Environment::create_in_memory(EnvConfig::default())?;
//! // ... work ...
//! let metrics = env.metrics()?;
//! println!("cache hits: {}", metrics.cache_hits);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one environment.
#[derive(Debug, Default)]
pub struct EnvMetrics {
    // Page I/O
    page_reads: AtomicU64,
    page_writes: AtomicU64,

    // Cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,

    // B-tree structure changes
    splits: AtomicU64,
    merges: AtomicU64,

    // Transactions
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl EnvMetrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_page_read(&self) {
        self.page_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_page_write(&self) {
        self.page_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_split(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counters.
    ///
    /// Gauges owned by the pager (`page_count`, `freelist_pages`,
    /// `cached_pages`) are zero here; the environment fills them in.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            page_reads: self.page_reads.load(Ordering::Relaxed),
            page_writes: self.page_writes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            page_count: 0,
            freelist_pages: 0,
            cached_pages: 0,
        }
    }
}

/// A point-in-time copy of [`EnvMetrics`] plus pager gauges.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Pages read from the backing store.
    pub page_reads: u64,
    /// Pages written to the backing store.
    pub page_writes: u64,
    /// Page requests served from the cache.
    pub cache_hits: u64,
    /// Page requests that went to the backing store.
    pub cache_misses: u64,
    /// Pages evicted from the cache.
    pub cache_evictions: u64,
    /// Node splits.
    pub splits: u64,
    /// Node merges and redistributions.
    pub merges: u64,
    /// Committed transactions.
    pub commits: u64,
    /// Aborted transactions.
    pub aborts: u64,
    /// Pages in the store, header included.
    pub page_count: u64,
    /// Pages on the freelist.
    pub freelist_pages: u64,
    /// Pages currently cached.
    pub cached_pages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = EnvMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn counters_accumulate() {
        let metrics = EnvMetrics::new();
        metrics.record_page_read();
        metrics.record_page_read();
        metrics.record_cache_hit();
        metrics.record_split();
        metrics.record_commit();
        metrics.record_abort();

        let snap = metrics.snapshot();
        assert_eq!(snap.page_reads, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.splits, 1);
        assert_eq!(snap.commits, 1);
        assert_eq!(snap.aborts, 1);
        assert_eq!(snap.merges, 0);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(EnvMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_page_write();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().page_writes, 4000);
    }
}
