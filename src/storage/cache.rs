//! # Page Cache
//!
//! This module implements Tessera's pinned-page cache: a fixed-capacity pool
//! of page frames with pin counting, dirty tracking, and a two-region LRU
//! eviction policy.
//!
//! ## Why Two LRU Regions?
//!
//! Every B-tree descent touches one internal page per level but only one
//! leaf at the bottom, so internal pages are re-visited far more often than
//! leaves. A single LRU list lets a leaf-heavy scan flush the internal pages
//! a navigation path needs on every descent. The cache therefore keeps two
//! regions:
//!
//! ```text
//! leaf region:      [LRU leaf ........ MRU leaf]      <- evicted first
//! internal region:  [LRU internal .. MRU internal]    <- evicted last
//! ```
//!
//! Eviction drains the leaf region before touching the internal region,
//! biasing retention toward the pages with the highest reuse.
//!
//! ## Pin/Unpin Protocol
//!
//! 1. `load()` returns a pinned [`PageGuard`] (first pin unlinks the frame
//!    from its LRU region)
//! 2. the caller reads or writes the page bytes through the guard
//! 3. dropping the guard unpins; the last unpin re-links the frame at the
//!    MRU end of its region
//!
//! Pinned frames are never eviction candidates. If every frame is pinned and
//! a new page is needed, the cache reports a fatal error — an embedded
//! engine cannot spill pinned pages.
//!
//! ## Busy-Flag Load Protocol
//!
//! Reading page bytes from storage happens **without holding the cache
//! lock** so other cache users are not blocked behind I/O. The loading
//! thread inserts the frame with its busy flag set, releases the lock,
//! performs the read into the detached frame buffer, then re-locks, clears
//! the flag and notifies. A concurrent `load()` of the same page waits on
//! the condvar while the flag is set, which also guarantees a page is never
//! fetched twice.
//!
//! ## Dirty Tracking
//!
//! Dirty frames are enqueued in a dirty list; each frame records its 1-based
//! list index so removal (on eviction or page free) is O(1) via
//! swap-remove. `flush()` sorts the list by file offset to turn scattered
//! write-back into a mostly-sequential I/O pattern.
//!
//! ## Thread Safety
//!
//! One `parking_lot::Mutex` guards all cache state. Frame page buffers are
//! separately heap-allocated boxes, so a pinned frame's bytes stay at a
//! stable address even while the frame table grows.

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use super::{PageId, Storage};

const NIL: u32 = u32::MAX;

/// Intent of a page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    ReadOnly,
    ReadWrite,
    /// Fresh page: no bytes are read from storage; the frame starts zeroed
    /// and dirty.
    New,
}

/// Caller-supplied classification used by the eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    Leaf,
    Internal,
}

struct Frame {
    id: PageId,
    data: Box<[u8]>,
    pin: u32,
    busy: bool,
    leaf: bool,
    /// 1-based index into the dirty list; 0 = clean.
    dirty_idx: u32,
    prev: u32,
    next: u32,
}

impl Frame {
    fn new(page_size: usize) -> Self {
        Self {
            id: PageId::NONE,
            data: vec![0u8; page_size].into_boxed_slice(),
            pin: 0,
            busy: false,
            leaf: true,
            dirty_idx: 0,
            prev: NIL,
            next: NIL,
        }
    }
}

#[derive(Clone, Copy)]
struct LruList {
    head: u32,
    tail: u32,
}

impl LruList {
    const EMPTY: LruList = LruList {
        head: NIL,
        tail: NIL,
    };
}

struct CacheInner {
    frames: Vec<Frame>,
    map: HashMap<PageId, u32>,
    free_frames: Vec<u32>,
    dirty: Vec<u32>,
    leaf_lru: LruList,
    internal_lru: LruList,
}

impl CacheInner {
    fn list(&self, leaf: bool) -> LruList {
        if leaf {
            self.leaf_lru
        } else {
            self.internal_lru
        }
    }

    fn set_list(&mut self, leaf: bool, list: LruList) {
        if leaf {
            self.leaf_lru = list;
        } else {
            self.internal_lru = list;
        }
    }

    fn link_tail(&mut self, fi: u32) {
        let leaf = self.frames[fi as usize].leaf;
        let mut list = self.list(leaf);
        self.frames[fi as usize].prev = list.tail;
        self.frames[fi as usize].next = NIL;
        if list.tail != NIL {
            self.frames[list.tail as usize].next = fi;
        } else {
            list.head = fi;
        }
        list.tail = fi;
        self.set_list(leaf, list);
    }

    fn unlink(&mut self, fi: u32) {
        let frame = &self.frames[fi as usize];
        let (leaf, prev, next) = (frame.leaf, frame.prev, frame.next);
        let mut list = self.list(leaf);
        if prev != NIL {
            self.frames[prev as usize].next = next;
        } else {
            list.head = next;
        }
        if next != NIL {
            self.frames[next as usize].prev = prev;
        } else {
            list.tail = prev;
        }
        self.set_list(leaf, list);
        self.frames[fi as usize].prev = NIL;
        self.frames[fi as usize].next = NIL;
    }

    fn pop_lru(&mut self, leaf: bool) -> Option<u32> {
        let head = self.list(leaf).head;
        if head == NIL {
            return None;
        }
        self.unlink(head);
        Some(head)
    }

    fn pin(&mut self, fi: u32) {
        if self.frames[fi as usize].pin == 0 {
            self.unlink(fi);
        }
        self.frames[fi as usize].pin += 1;
    }

    fn unpin(&mut self, fi: u32) {
        let frame = &mut self.frames[fi as usize];
        debug_assert!(frame.pin > 0, "unpin of unpinned frame");
        frame.pin -= 1;
        if frame.pin == 0 {
            self.link_tail(fi);
        }
    }

    fn mark_dirty(&mut self, fi: u32) {
        if self.frames[fi as usize].dirty_idx == 0 {
            self.dirty.push(fi);
            self.frames[fi as usize].dirty_idx = self.dirty.len() as u32;
        }
    }

    fn clear_dirty(&mut self, fi: u32) {
        let idx = self.frames[fi as usize].dirty_idx;
        if idx == 0 {
            return;
        }
        let last = self.dirty.len() as u32;
        self.dirty.swap_remove(idx as usize - 1);
        if idx != last {
            let moved = self.dirty[idx as usize - 1];
            self.frames[moved as usize].dirty_idx = idx;
        }
        self.frames[fi as usize].dirty_idx = 0;
    }
}

/// Fixed-capacity page cache with pin counting and two-region LRU eviction.
pub struct PageCache {
    inner: Mutex<CacheInner>,
    loaded: Condvar,
    page_size: usize,
    capacity: usize,
}

impl PageCache {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                frames: Vec::new(),
                map: HashMap::with_capacity(capacity),
                free_frames: Vec::new(),
                dirty: Vec::new(),
                leaf_lru: LruList::EMPTY,
                internal_lru: LruList::EMPTY,
            }),
            loaded: Condvar::new(),
            page_size,
            capacity,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads `id` into the cache, returning a pinned guard.
    pub fn load(
        &self,
        storage: &dyn Storage,
        id: PageId,
        mode: LoadMode,
        class: PageClass,
    ) -> Result<PageGuard<'_>> {
        ensure!(!id.is_none(), "load of null page reference");
        let mut inner = self.inner.lock();
        loop {
            if let Some(&fi) = inner.map.get(&id) {
                if inner.frames[fi as usize].busy {
                    // Another thread is fetching this page; wait it out.
                    self.loaded.wait(&mut inner);
                    continue;
                }
                inner.pin(fi);
                if mode != LoadMode::ReadOnly {
                    inner.mark_dirty(fi);
                }
                return Ok(PageGuard {
                    cache: self,
                    idx: fi,
                });
            }

            let fi = self.obtain_frame(storage, &mut inner)?;
            {
                let frame = &mut inner.frames[fi as usize];
                frame.id = id;
                frame.pin = 1;
                frame.leaf = class == PageClass::Leaf;
                frame.busy = mode != LoadMode::New;
                frame.dirty_idx = 0;
                frame.prev = NIL;
                frame.next = NIL;
            }
            inner.map.insert(id, fi);

            if mode == LoadMode::New {
                inner.frames[fi as usize].data.fill(0);
                inner.mark_dirty(fi);
                return Ok(PageGuard {
                    cache: self,
                    idx: fi,
                });
            }

            // Detach the buffer and read without the lock; the busy flag
            // keeps other threads off this frame.
            let mut buf = std::mem::take(&mut inner.frames[fi as usize].data);
            drop(inner);
            let read = storage.read(id.offset(), &mut buf);
            inner = self.inner.lock();
            inner.frames[fi as usize].data = buf;
            inner.frames[fi as usize].busy = false;
            self.loaded.notify_all();

            match read {
                Ok(true) => {
                    if mode != LoadMode::ReadOnly {
                        inner.mark_dirty(fi);
                    }
                    return Ok(PageGuard {
                        cache: self,
                        idx: fi,
                    });
                }
                Ok(false) => {
                    self.discard_failed_load(&mut inner, id, fi);
                    bail!("{} lies beyond the end of storage", id);
                }
                Err(e) => {
                    self.discard_failed_load(&mut inner, id, fi);
                    return Err(e.wrap_err(format!("failed to read {}", id)));
                }
            }
        }
    }

    fn discard_failed_load(&self, inner: &mut CacheInner, id: PageId, fi: u32) {
        inner.map.remove(&id);
        inner.frames[fi as usize].pin = 0;
        inner.free_frames.push(fi);
    }

    /// Finds a frame for a new page: free frame, growth, then eviction of
    /// the least-recently-used unpinned entry (leaf region first).
    fn obtain_frame(&self, storage: &dyn Storage, inner: &mut CacheInner) -> Result<u32> {
        if let Some(fi) = inner.free_frames.pop() {
            return Ok(fi);
        }
        if inner.frames.len() < self.capacity {
            inner.frames.push(Frame::new(self.page_size));
            return Ok(inner.frames.len() as u32 - 1);
        }

        let Some(fi) = inner.pop_lru(true).or_else(|| inner.pop_lru(false)) else {
            bail!(
                "page cache exhausted: all {} frames are pinned",
                self.capacity
            );
        };

        if inner.frames[fi as usize].dirty_idx != 0 {
            let victim = inner.frames[fi as usize].id;
            tracing::debug!(page = victim.offset(), "evicting dirty page, writing back");
            storage.write(victim.offset(), &inner.frames[fi as usize].data)?;
            inner.clear_dirty(fi);
        }
        let victim = inner.frames[fi as usize].id;
        inner.map.remove(&victim);
        Ok(fi)
    }

    fn unpin(&self, fi: u32) {
        let mut inner = self.inner.lock();
        inner.unpin(fi);
    }

    /// Writes every dirty page back to storage in offset order.
    pub fn flush(&self, storage: &dyn Storage) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut pending = std::mem::take(&mut inner.dirty);
        pending.sort_unstable_by_key(|&fi| inner.frames[fi as usize].id);
        for &fi in &pending {
            inner.frames[fi as usize].dirty_idx = 0;
        }
        for &fi in &pending {
            let frame = &inner.frames[fi as usize];
            storage.write(frame.id.offset(), &frame.data)?;
        }
        let flushed = pending.len();
        if flushed > 0 {
            tracing::debug!(pages = flushed, "flushed dirty pages");
        }
        Ok(flushed)
    }

    /// Drops a page from the cache on deallocation. The page must be
    /// unpinned; its dirty state is discarded (a freed page has no contents
    /// worth writing back).
    pub fn forget(&self, id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(&fi) = inner.map.get(&id) else {
            return Ok(());
        };
        ensure!(
            inner.frames[fi as usize].pin == 0,
            "cannot free pinned {}",
            id
        );
        inner.clear_dirty(fi);
        inner.unlink(fi);
        inner.map.remove(&id);
        inner.free_frames.push(fi);
        Ok(())
    }

    fn frame_ptr(&self, fi: u32) -> (*mut u8, usize) {
        let inner = self.inner.lock();
        let frame = &inner.frames[fi as usize];
        (frame.data.as_ptr() as *mut u8, frame.data.len())
    }

    fn mark_frame_dirty(&self, fi: u32) {
        let mut inner = self.inner.lock();
        inner.mark_dirty(fi);
    }
}

/// RAII pin on a cached page. Dropping the guard unpins the frame, making it
/// an eviction candidate again.
pub struct PageGuard<'a> {
    cache: &'a PageCache,
    idx: u32,
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard").field("idx", &self.idx).finish()
    }
}

impl PageGuard<'_> {
    pub fn data(&self) -> &[u8] {
        let (ptr, len) = self.cache.frame_ptr(self.idx);
        // SAFETY: the frame is pinned for the guard's lifetime, so it cannot
        // be evicted and its buffer box is never replaced (the box is only
        // swapped out during the initial busy load, before any guard
        // exists). Box contents have a stable address even when the frame
        // table reallocates. Shared access is sound because mutation goes
        // through `data_mut`, which takes `&mut self`.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.cache.mark_frame_dirty(self.idx);
        let (ptr, len) = self.cache.frame_ptr(self.idx);
        // SAFETY: as in `data()`, the pinned frame's buffer is stable.
        // `&mut self` guarantees this is the only reference derived from
        // this guard, and the cache hands out at most one guard per load
        // call; callers mutating a page hold the only write-intent guard.
        unsafe { std::slice::from_raw_parts_mut(ptr, len) }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.cache.unpin(self.idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    fn page(n: u64) -> PageId {
        PageId(n * 256)
    }

    #[test]
    fn new_page_starts_zeroed_and_dirty() {
        let storage = MemStorage::new();
        let cache = PageCache::new(8, 256);

        let guard = cache
            .load(&storage, page(1), LoadMode::New, PageClass::Leaf)
            .unwrap();
        assert!(guard.data().iter().all(|&b| b == 0));
        drop(guard);

        assert_eq!(cache.flush(&storage).unwrap(), 1);
        assert_eq!(storage.len().unwrap(), 512);
    }

    #[test]
    fn load_round_trip_through_storage() {
        let storage = MemStorage::new();
        let cache = PageCache::new(8, 256);

        {
            let mut guard = cache
                .load(&storage, page(1), LoadMode::New, PageClass::Leaf)
                .unwrap();
            guard.data_mut()[0] = 42;
        }
        cache.flush(&storage).unwrap();

        // A different cache instance must read the flushed bytes back.
        let other = PageCache::new(8, 256);
        let guard = other
            .load(&storage, page(1), LoadMode::ReadOnly, PageClass::Leaf)
            .unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn eviction_prefers_leaf_pages() {
        let storage = MemStorage::new();
        let cache = PageCache::new(2, 256);

        drop(
            cache
                .load(&storage, page(1), LoadMode::New, PageClass::Internal)
                .unwrap(),
        );
        drop(
            cache
                .load(&storage, page(2), LoadMode::New, PageClass::Leaf)
                .unwrap(),
        );
        // Forces an eviction; the leaf (page 2) must be the victim.
        drop(
            cache
                .load(&storage, page(3), LoadMode::New, PageClass::Leaf)
                .unwrap(),
        );

        let inner = cache.inner.lock();
        assert!(inner.map.contains_key(&page(1)));
        assert!(!inner.map.contains_key(&page(2)));
        assert!(inner.map.contains_key(&page(3)));
    }

    #[test]
    fn evicting_dirty_page_writes_it_back() {
        let storage = MemStorage::new();
        let cache = PageCache::new(2, 256);

        {
            let mut guard = cache
                .load(&storage, page(1), LoadMode::New, PageClass::Leaf)
                .unwrap();
            guard.data_mut()[10] = 7;
        }
        drop(
            cache
                .load(&storage, page(2), LoadMode::New, PageClass::Leaf)
                .unwrap(),
        );
        drop(
            cache
                .load(&storage, page(3), LoadMode::New, PageClass::Leaf)
                .unwrap(),
        );

        // Page 1 was evicted; its bytes must be durable without a flush.
        let mut buf = vec![0u8; 256];
        assert!(storage.read(256, &mut buf).unwrap());
        assert_eq!(buf[10], 7);
    }

    #[test]
    fn exhausted_cache_with_all_pages_pinned_fails() {
        let storage = MemStorage::new();
        let cache = PageCache::new(2, 256);

        let _a = cache
            .load(&storage, page(1), LoadMode::New, PageClass::Leaf)
            .unwrap();
        let _b = cache
            .load(&storage, page(2), LoadMode::New, PageClass::Leaf)
            .unwrap();
        let err = cache
            .load(&storage, page(3), LoadMode::New, PageClass::Leaf)
            .unwrap_err();
        assert!(err.to_string().contains("pinned"));
    }

    #[test]
    fn forget_discards_dirty_state() {
        let storage = MemStorage::new();
        let cache = PageCache::new(4, 256);

        {
            let mut guard = cache
                .load(&storage, page(1), LoadMode::New, PageClass::Leaf)
                .unwrap();
            guard.data_mut()[0] = 1;
        }
        cache.forget(page(1)).unwrap();
        assert_eq!(cache.flush(&storage).unwrap(), 0);
    }

    #[test]
    fn concurrent_loads_of_one_page_fetch_once() {
        use std::sync::Arc;

        let storage = Arc::new(MemStorage::new());
        storage.write(256, &[9u8; 256]).unwrap();
        let cache = Arc::new(PageCache::new(8, 256));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let storage = Arc::clone(&storage);
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    let guard = cache
                        .load(&*storage, page(1), LoadMode::ReadOnly, PageClass::Leaf)
                        .unwrap();
                    assert_eq!(guard.data()[0], 9);
                });
            }
        });

        assert_eq!(cache.len(), 1);
    }
}
