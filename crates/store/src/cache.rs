use crate::hashing::SliceId;
use crate::slice::Slice;
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug)]
struct CachedSlice {
    slice: Slice,
    vitality: u32,
}

/// Loaded slices, bounded by capacity and aged by vitality.
///
/// Every access refills a slice's vitality; each recycler tick drains one
/// point from every slice. A slice whose vitality reaches zero is handed
/// back to the caller for persistence and dropped from memory.
///
/// The cache never drops a slice on its own: callers make room with
/// [`SliceCache::pop_lru_if_full`] before inserting, so a dirty slice always
/// passes through their hands first.
pub(crate) struct SliceCache {
    entries: LruCache<SliceId, CachedSlice>,
    capacity: usize,
    vitality: u32,
}

impl SliceCache {
    pub(crate) fn new(capacity: usize, vitality: u32) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            capacity: capacity.get(),
            vitality: vitality.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, id: &SliceId) -> bool {
        self.entries.contains(id)
    }

    pub(crate) fn ids(&self) -> Vec<SliceId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub(crate) fn dirty_ids(&self) -> Vec<SliceId> {
        self.entries
            .iter()
            .filter(|(_, c)| c.slice.is_dirty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn dirty_count(&self) -> usize {
        self.entries.iter().filter(|(_, c)| c.slice.is_dirty()).count()
    }

    /// Access a loaded slice, refreshing its vitality and recency.
    pub(crate) fn touch(&mut self, id: &SliceId) -> Option<&mut Slice> {
        let vitality = self.vitality;
        let cached = self.entries.get_mut(id)?;
        cached.vitality = vitality;
        Some(&mut cached.slice)
    }

    /// Look at a loaded slice without counting it as an access.
    pub(crate) fn peek(&self, id: &SliceId) -> Option<&Slice> {
        self.entries.peek(id).map(|c| &c.slice)
    }

    pub(crate) fn peek_mut(&mut self, id: &SliceId) -> Option<&mut Slice> {
        self.entries.peek_mut(id).map(|c| &mut c.slice)
    }

    /// Remove the least recently used slice when the cache is at capacity.
    pub(crate) fn pop_lru_if_full(&mut self) -> Option<(SliceId, Slice)> {
        if self.entries.len() < self.capacity {
            return None;
        }
        self.entries.pop_lru().map(|(id, c)| (id, c.slice))
    }

    /// Insert a slice with full vitality. Call `pop_lru_if_full` first.
    pub(crate) fn insert(&mut self, id: SliceId, slice: Slice) {
        let vitality = self.vitality;
        self.put(id, slice, vitality);
    }

    /// Put back a slice that could not be persisted. It keeps a single point
    /// of vitality so the next tick retries it.
    pub(crate) fn restore(&mut self, id: SliceId, slice: Slice) {
        self.put(id, slice, 1);
    }

    fn put(&mut self, id: SliceId, slice: Slice, vitality: u32) {
        let cached = CachedSlice { slice, vitality };
        if let Some((dropped, cached)) = self.entries.push(id.clone(), cached) {
            if dropped != id && cached.slice.is_dirty() {
                log::error!("Slice cache dropped dirty slice {dropped} on insert of {id}");
            }
        }
    }

    /// Age every slice by one point and remove the ones that ran out.
    pub(crate) fn tick(&mut self) -> Vec<(SliceId, Slice)> {
        let mut expired = Vec::new();
        for (id, cached) in self.entries.iter_mut() {
            cached.vitality = cached.vitality.saturating_sub(1);
            if cached.vitality == 0 {
                expired.push(id.clone());
            }
        }
        expired
            .into_iter()
            .filter_map(|id| self.entries.pop(&id).map(|c| (id, c.slice)))
            .collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<(SliceId, Slice)> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some((id, cached)) = self.entries.pop_lru() {
            out.push((id, cached.slice));
        }
        out
    }
}
