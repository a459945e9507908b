use crate::meta::Layout;
use crate::recycler::RecyclerHealth;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    slice_loads: AtomicU64,
    flushes: AtomicU64,
    evictions: AtomicU64,
}

impl StoreCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn slice_loaded(&self) {
        self.slice_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn flushed(&self, n: u64) {
        self.flushes.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time view of a cached store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub root: PathBuf,
    pub layout: Layout,
    pub prefix_len: usize,
    pub loaded_slices: usize,
    pub dirty_slices: usize,
    pub hits: u64,
    pub misses: u64,
    pub slice_loads: u64,
    pub flushes: u64,
    pub evictions: u64,
    pub recycler: RecyclerHealth,
}

impl StoreStats {
    pub(crate) fn collect(
        root: PathBuf,
        layout: Layout,
        prefix_len: usize,
        loaded_slices: usize,
        dirty_slices: usize,
        counters: &StoreCounters,
        recycler: RecyclerHealth,
    ) -> Self {
        Self {
            root,
            layout,
            prefix_len,
            loaded_slices,
            dirty_slices,
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            slice_loads: counters.slice_loads.load(Ordering::Relaxed),
            flushes: counters.flushes.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            recycler,
        }
    }

    /// Share of lookups that found their key.
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            return None;
        }
        Some(self.hits as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_ratio_needs_lookups() {
        let counters = StoreCounters::default();
        let collect = |c: &StoreCounters| {
            StoreStats::collect(
                PathBuf::from("db"),
                Layout::Cached,
                2,
                0,
                0,
                c,
                RecyclerHealth::default(),
            )
        };
        assert_eq!(collect(&counters).hit_ratio(), None);

        counters.hit();
        counters.hit();
        counters.hit();
        counters.miss();
        counters.flushed(4);
        let stats = collect(&counters);
        assert_eq!(stats.hit_ratio(), Some(0.75));
        assert_eq!(stats.flushes, 4);
    }
}
