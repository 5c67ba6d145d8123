//! # Column Operations
//!
//! This module implements the `Column` handle and the four storage
//! operations: append, positional scan (`subseq`), ordered search, and
//! range deletion.
//!
//! ## Append
//!
//! O(log N) amortized. The rightmost spine is descended recursively; a full
//! leaf spawns a new rightmost leaf holding only the appended value and
//! signals overflow to its parent, which adds a child slot or overflows in
//! turn. A root overflow adds one level above the old root. Timestamp
//! columns reject appends that regress below the current last value.
//!
//! ## Positional Scan
//!
//! `subseq(from, till)` converts the starting ordinal into a root-to-leaf
//! path by subtracting child counts (a linear scan over at most
//! page-capacity slots per level — small and cache-friendly). The descent
//! stack IS the iterator's persisted cursor: `next` resumes from it,
//! merging consecutive leaves into tiles of up to `tile_size` elements.
//! Negative bounds are end-relative (`from = count + from`), clamped to the
//! column.
//!
//! ## Ordered Search
//!
//! Valid for timestamp columns only. Each inner node's mirrored value array
//! is binary-searched to pick the child subtree, probing the left-adjacent
//! subtree first since a boundary-equal value may live in either neighbor.
//! Two bound computations delimit `[first, last)`; the result scans exactly
//! like `subseq`.
//!
//! ## Deletion
//!
//! Splices ordinal range `[from, till]` out of the affected leaves,
//! decrements counts along the ancestor chain, removes emptied child slots
//! and frees emptied pages. Mirrored first values are refreshed when a
//! child's prefix was removed, keeping ordered search exact after deletes.
//! No sibling rebalancing is performed (see the module docs in `btree`).
//!
//! ## Concurrency
//!
//! A column is internally synchronized for appends and deletes via an
//! `RwLock` over its tree state, but scans hold no lock between tiles:
//! mutating a column while scanning it yields unspecified (not unsound)
//! results. Callers needing stable scans must serialize externally.

use std::cmp::Ordering;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::config::{EngineConfig, MAX_TREE_DEPTH};
use crate::iter::{Cursor, SeriesIter, Tile};
use crate::storage::{LoadMode, PageClass, PageId, Pager};
use crate::types::{compare_raw, Boundary, Elem, ElemKind};

use super::page::{inner_capacity, leaf_capacity, Inner, InnerMut, Leaf, LeafMut};

/// A raw element, small enough to keep on the stack for every numeric kind.
type ElemBytes = SmallVec<[u8; 16]>;

/// Persisted location of a column's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeState {
    pub root: PageId,
    pub count: u64,
    pub height: u32,
}

impl TreeState {
    pub fn empty() -> Self {
        Self {
            root: PageId::NONE,
            count: 0,
            height: 0,
        }
    }
}

enum Append {
    Fit,
    /// A new rightmost subtree was created; `first` is its first value.
    Split { page: PageId, first: ElemBytes },
}

pub(crate) struct ColumnInner {
    pager: Arc<Pager>,
    name: String,
    kind: ElemKind,
    elem_size: usize,
    timestamp: bool,
    tile_size: usize,
    leaf_cap: usize,
    inner_cap: usize,
    state: RwLock<TreeState>,
}

/// Handle to one stored column. Cheap to clone; all clones share the tree.
#[derive(Clone)]
pub struct Column {
    inner: Arc<ColumnInner>,
}

impl Column {
    pub(crate) fn new(
        pager: Arc<Pager>,
        config: &EngineConfig,
        name: impl Into<String>,
        kind: ElemKind,
        timestamp: bool,
        state: TreeState,
    ) -> Result<Self> {
        let elem_size = kind.size();
        ensure!(elem_size > 0, "zero-width element kind");
        ensure!(
            !timestamp || kind.is_numeric(),
            "timestamp columns must hold a numeric kind"
        );
        let leaf_cap = leaf_capacity(config.page_size, elem_size);
        let inner_cap = inner_capacity(config.page_size, elem_size, timestamp);
        ensure!(
            leaf_cap >= 2 && inner_cap >= 2,
            "page size {} too small for elements of {} bytes",
            config.page_size,
            elem_size
        );
        Ok(Self {
            inner: Arc::new(ColumnInner {
                pager,
                name: name.into(),
                kind,
                elem_size,
                timestamp,
                tile_size: config.tile_size,
                leaf_cap,
                inner_cap,
                state: RwLock::new(state),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> ElemKind {
        self.inner.kind
    }

    pub fn elem_size(&self) -> usize {
        self.inner.elem_size
    }

    pub fn is_timestamp(&self) -> bool {
        self.inner.timestamp
    }

    pub fn count(&self) -> u64 {
        self.inner.state.read().count
    }

    pub(crate) fn tree_state(&self) -> TreeState {
        *self.inner.state.read()
    }

    /// Appends one typed value.
    pub fn append<T: Elem>(&self, value: T) -> Result<()> {
        ensure!(
            T::KIND == self.inner.kind,
            "cannot append {:?} value to {:?} column '{}'",
            T::KIND,
            self.inner.kind,
            self.inner.name
        );
        self.append_raw(value.as_bytes())
    }

    /// Appends one fixed-width byte element.
    pub fn append_bytes(&self, value: &[u8]) -> Result<()> {
        ensure!(
            matches!(self.inner.kind, ElemKind::Bytes(_)),
            "cannot append bytes to {:?} column '{}'",
            self.inner.kind,
            self.inner.name
        );
        self.append_raw(value)
    }

    pub(crate) fn append_raw(&self, value: &[u8]) -> Result<()> {
        let inner = &*self.inner;
        ensure!(
            value.len() == inner.elem_size,
            "element of {} bytes appended to column '{}' of {}-byte elements",
            value.len(),
            inner.name,
            inner.elem_size
        );

        let mut state = inner.state.write();
        if state.root.is_none() {
            let pid = inner.pager.alloc()?;
            let mut guard = inner.pager.page(pid, LoadMode::New, PageClass::Leaf)?;
            LeafMut::init(guard.data_mut(), inner.elem_size).push(value);
            drop(guard);
            *state = TreeState {
                root: pid,
                count: 1,
                height: 1,
            };
            return Ok(());
        }

        match inner.append_page(state.root, state.height, value)? {
            Append::Fit => {
                state.count += 1;
            }
            Append::Split { page, first } => {
                let old_first = if inner.timestamp {
                    Some(inner.first_of(state.root, state.height)?)
                } else {
                    None
                };
                let new_root = inner.pager.alloc()?;
                let mut guard = inner
                    .pager
                    .page(new_root, LoadMode::New, PageClass::Internal)?;
                let mut node =
                    InnerMut::init(guard.data_mut(), inner.elem_size, inner.timestamp);
                node.push_slot(state.root, state.count, old_first.as_deref());
                node.push_slot(page, 1, inner.timestamp.then_some(&first[..]));
                drop(guard);
                state.root = new_root;
                state.height += 1;
                state.count += 1;
            }
        }
        Ok(())
    }

    /// Typed element at ordinal position `pos`.
    pub fn get<T: Elem>(&self, pos: u64) -> Result<T> {
        ensure!(
            T::KIND == self.inner.kind,
            "cannot read {:?} value from {:?} column '{}'",
            T::KIND,
            self.inner.kind,
            self.inner.name
        );
        Ok(T::load(&self.inner.get_raw(pos)?))
    }

    pub fn first<T: Elem>(&self) -> Result<Option<T>> {
        if self.count() == 0 {
            return Ok(None);
        }
        self.get(0).map(Some)
    }

    pub fn last<T: Elem>(&self) -> Result<Option<T>> {
        let count = self.count();
        if count == 0 {
            return Ok(None);
        }
        self.get(count - 1).map(Some)
    }

    /// Positional range scan over `[from, till]` (inclusive; negative
    /// bounds are end-relative, so `scan(0, -1)` is the whole column).
    pub fn scan<T: Elem>(&self, from: i64, till: i64) -> Result<TreeScan<T>> {
        ensure!(
            T::KIND == self.inner.kind,
            "cannot scan {:?} column '{}' as {:?}",
            self.inner.kind,
            self.inner.name,
            T::KIND
        );
        let (first, last_excl) = self.inner.resolve_range(from, till);
        Ok(TreeScan::new(
            RawScan::new(Arc::clone(&self.inner), first, last_excl),
        ))
    }

    pub(crate) fn raw_scan(&self, from: i64, till: i64) -> RawScan {
        let (first, last_excl) = self.inner.resolve_range(from, till);
        RawScan::new(Arc::clone(&self.inner), first, last_excl)
    }

    /// Ordered search over a timestamp column; returns the positional range
    /// `[first, last)` selected by the boundary pair.
    pub fn search_range<T: Elem>(
        &self,
        low: T,
        low_kind: Boundary,
        high: T,
        high_kind: Boundary,
    ) -> Result<(u64, u64)> {
        let inner = &*self.inner;
        ensure!(
            inner.timestamp,
            "ordered search requires a timestamp column, '{}' is not one",
            inner.name
        );
        ensure!(
            T::KIND == inner.kind,
            "cannot search {:?} column '{}' with {:?} bounds",
            inner.kind,
            inner.name,
            T::KIND
        );

        let count = inner.state.read().count;
        if count == 0 {
            return Ok((0, 0));
        }

        let start = match low_kind {
            Boundary::Open => 0,
            Boundary::Inclusive => inner.lower_bound(low, false)?,
            Boundary::Exclusive => inner.lower_bound(low, true)?,
            Boundary::Exact => {
                let s = inner.lower_bound(low, false)?;
                if s >= count || T::load(&inner.get_raw(s)?).order(low) != Ordering::Equal {
                    return Ok((0, 0));
                }
                s
            }
        };
        let end = match high_kind {
            Boundary::Open => count,
            Boundary::Inclusive => inner.lower_bound(high, true)?,
            Boundary::Exclusive => inner.lower_bound(high, false)?,
            Boundary::Exact => {
                let e = inner.lower_bound(high, true)?;
                if e == 0 || T::load(&inner.get_raw(e - 1)?).order(high) != Ordering::Equal {
                    return Ok((0, 0));
                }
                e
            }
        };

        if start >= end {
            return Ok((0, 0));
        }
        Ok((start, end))
    }

    /// Ordered search returning an iterator over the selected range.
    pub fn search<T: Elem>(
        &self,
        low: T,
        low_kind: Boundary,
        high: T,
        high_kind: Boundary,
    ) -> Result<TreeScan<T>> {
        let (first, last_excl) = self.search_range(low, low_kind, high, high_kind)?;
        Ok(TreeScan::new(
            RawScan::new(Arc::clone(&self.inner), first, last_excl),
        ))
    }

    /// Deletes ordinal range `[from, till]` (inclusive, end-relative when
    /// negative). Returns the number of removed elements; an empty range or
    /// empty column is a no-op.
    pub fn delete(&self, from: i64, till: i64) -> Result<u64> {
        let inner = &*self.inner;
        let mut state = inner.state.write();
        let count = state.count;
        let (first, last_excl) = resolve_range_with(count, from, till);
        if first >= last_excl {
            return Ok(0);
        }

        let (removed, emptied) =
            inner.delete_page(state.root, state.height, first, last_excl - 1)?;
        state.count -= removed;
        if emptied {
            inner.pager.free(state.root)?;
            *state = TreeState::empty();
        }
        Ok(removed)
    }

    /// Removes every element, returning all pages to the freelist.
    pub fn clear(&self) -> Result<()> {
        self.delete(0, -1)?;
        Ok(())
    }

}

fn resolve_range_with(count: u64, from: i64, till: i64) -> (u64, u64) {
    let count = count as i64;
    let first = if from < 0 { count + from } else { from }.clamp(0, count);
    let till = if till < 0 { count + till } else { till };
    let last_excl = (till + 1).clamp(first, count);
    (first as u64, last_excl as u64)
}

impl ColumnInner {
    fn resolve_range(&self, from: i64, till: i64) -> (u64, u64) {
        resolve_range_with(self.state.read().count, from, till)
    }

    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        compare_raw(self.kind, a, b)
    }

    fn append_page(&self, pid: PageId, level: u32, value: &[u8]) -> Result<Append> {
        if level == 1 {
            let mut guard = self.pager.page(pid, LoadMode::ReadWrite, PageClass::Leaf)?;
            let mut leaf = LeafMut::new(guard.data_mut(), self.elem_size);
            let n = leaf.len();
            if self.timestamp && n > 0 {
                ensure!(
                    self.cmp(value, leaf.value_at(n - 1)) != Ordering::Less,
                    "value out of timeseries order in column '{}'",
                    self.name
                );
            }
            if n < self.leaf_cap {
                leaf.push(value);
                return Ok(Append::Fit);
            }
            drop(guard);

            let new_leaf = self.pager.alloc()?;
            let mut guard = self.pager.page(new_leaf, LoadMode::New, PageClass::Leaf)?;
            LeafMut::init(guard.data_mut(), self.elem_size).push(value);
            Ok(Append::Split {
                page: new_leaf,
                first: value.into(),
            })
        } else {
            let last_child = {
                let guard = self.pager.page(pid, LoadMode::ReadOnly, PageClass::Internal)?;
                let node = Inner::new(guard.data(), self.elem_size, self.timestamp);
                node.slot_at(node.len() - 1).child()
            };

            match self.append_page(last_child, level - 1, value)? {
                Append::Fit => {
                    let mut guard =
                        self.pager.page(pid, LoadMode::ReadWrite, PageClass::Internal)?;
                    let mut node =
                        InnerMut::new(guard.data_mut(), self.elem_size, self.timestamp);
                    let i = node.len() - 1;
                    let count = node.slot_at(i).count();
                    node.set_count(i, count + 1);
                    Ok(Append::Fit)
                }
                Append::Split { page, first } => {
                    let mut guard =
                        self.pager.page(pid, LoadMode::ReadWrite, PageClass::Internal)?;
                    let mut node =
                        InnerMut::new(guard.data_mut(), self.elem_size, self.timestamp);
                    if node.len() < self.inner_cap {
                        node.push_slot(page, 1, self.timestamp.then_some(&first[..]));
                        return Ok(Append::Fit);
                    }
                    drop(guard);

                    let new_inner = self.pager.alloc()?;
                    let mut guard =
                        self.pager.page(new_inner, LoadMode::New, PageClass::Internal)?;
                    let mut node =
                        InnerMut::init(guard.data_mut(), self.elem_size, self.timestamp);
                    node.push_slot(page, 1, self.timestamp.then_some(&first[..]));
                    Ok(Append::Split {
                        page: new_inner,
                        first,
                    })
                }
            }
        }
    }

    /// First value of the subtree rooted at `pid`. O(1) for mirrored inner
    /// nodes, a leftmost descent otherwise.
    fn first_of(&self, pid: PageId, level: u32) -> Result<ElemBytes> {
        if level == 1 {
            let guard = self.pager.page(pid, LoadMode::ReadOnly, PageClass::Leaf)?;
            let leaf = Leaf::new(guard.data(), self.elem_size);
            ensure!(!leaf.is_empty(), "first value of empty leaf {}", pid);
            return Ok(leaf.value_at(0).into());
        }
        let guard = self.pager.page(pid, LoadMode::ReadOnly, PageClass::Internal)?;
        let node = Inner::new(guard.data(), self.elem_size, self.timestamp);
        ensure!(!node.is_empty(), "first value of empty inner node {}", pid);
        if self.timestamp {
            return Ok(node.value_at(0).into());
        }
        let child = node.slot_at(0).child();
        drop(guard);
        self.first_of(child, level - 1)
    }

    fn get_raw(&self, pos: u64) -> Result<ElemBytes> {
        let (root, height, count) = {
            let state = self.state.read();
            (state.root, state.height, state.count)
        };
        ensure!(
            pos < count,
            "position {} out of bounds in column '{}' of {} elements",
            pos,
            self.name,
            count
        );

        let mut pid = root;
        let mut level = height;
        let mut rem = pos;
        loop {
            if level == 1 {
                let guard = self.pager.page(pid, LoadMode::ReadOnly, PageClass::Leaf)?;
                let leaf = Leaf::new(guard.data(), self.elem_size);
                return Ok(leaf.value_at(rem as usize).into());
            }
            let guard = self.pager.page(pid, LoadMode::ReadOnly, PageClass::Internal)?;
            let node = Inner::new(guard.data(), self.elem_size, self.timestamp);
            let mut idx = 0;
            loop {
                let slot = node.slot_at(idx);
                if rem < slot.count() {
                    pid = slot.child();
                    break;
                }
                rem -= slot.count();
                idx += 1;
                ensure!(idx < node.len(), "count invariant violated at {}", pid);
            }
            level -= 1;
        }
    }

    /// First position whose value is `>= v` (or `> v` when `strict`).
    fn lower_bound<T: Elem>(&self, v: T, strict: bool) -> Result<u64> {
        let (root, height) = {
            let state = self.state.read();
            (state.root, state.height)
        };
        if root.is_none() {
            return Ok(0);
        }
        self.lower_bound_page(root, height, v, strict)
    }

    fn lower_bound_page<T: Elem>(
        &self,
        pid: PageId,
        level: u32,
        v: T,
        strict: bool,
    ) -> Result<u64> {
        // `before(x)` = "x sorts entirely before the bound".
        let before = |x: T| {
            let ord = x.order(v);
            if strict {
                ord != Ordering::Greater
            } else {
                ord == Ordering::Less
            }
        };

        if level == 1 {
            let guard = self.pager.page(pid, LoadMode::ReadOnly, PageClass::Leaf)?;
            let leaf = Leaf::new(guard.data(), self.elem_size);
            let (mut lo, mut hi) = (0usize, leaf.len());
            while lo < hi {
                let mid = (lo + hi) / 2;
                if before(T::load(leaf.value_at(mid))) {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            return Ok(lo as u64);
        }

        let guard = self.pager.page(pid, LoadMode::ReadOnly, PageClass::Internal)?;
        let node = Inner::new(guard.data(), self.elem_size, self.timestamp);
        let n = node.len();

        // First child whose mirrored first value reaches the bound.
        let (mut lo, mut hi) = (0usize, n);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if before(T::load(node.value_at(mid))) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let i = lo;

        let offset_of = |upto: usize| -> u64 { (0..upto).map(|j| node.slot_at(j).count()).sum() };

        if i == 0 {
            let child = node.slot_at(0).child();
            drop(guard);
            return self.lower_bound_page(child, level - 1, v, strict);
        }

        // A boundary-equal value may end a subtree whose mirror is smaller,
        // so probe the left-adjacent child before trusting slot `i`.
        let left = node.slot_at(i - 1);
        let left_offset = offset_of(i - 1);
        let r = self.lower_bound_page(left.child(), level - 1, v, strict)?;
        if r < left.count() {
            return Ok(left_offset + r);
        }
        if i < n {
            let child = node.slot_at(i).child();
            let offset = left_offset + left.count();
            drop(guard);
            return Ok(offset + self.lower_bound_page(child, level - 1, v, strict)?);
        }
        Ok(left_offset + left.count())
    }

    /// Deletes inclusive range `[from, till]` relative to this subtree.
    /// Returns (removed count, subtree emptied).
    fn delete_page(&self, pid: PageId, level: u32, from: u64, till: u64) -> Result<(u64, bool)> {
        if level == 1 {
            let mut guard = self.pager.page(pid, LoadMode::ReadWrite, PageClass::Leaf)?;
            let mut leaf = LeafMut::new(guard.data_mut(), self.elem_size);
            let n = leaf.len() as u64;
            let to = till.min(n - 1);
            let removed = leaf.remove_range(from as usize, to as usize) as u64;
            let emptied = leaf.len() == 0;
            return Ok((removed, emptied));
        }

        let mut guard = self.pager.page(pid, LoadMode::ReadWrite, PageClass::Internal)?;
        let mut base = 0u64;
        let mut i = 0usize;
        let mut removed_total = 0u64;
        loop {
            let (child, count) = {
                let node = Inner::new(guard.data(), self.elem_size, self.timestamp);
                if i >= node.len() {
                    break;
                }
                let slot = node.slot_at(i);
                (slot.child(), slot.count())
            };
            if base > till {
                break;
            }
            let child_last = base + count - 1;
            if child_last >= from {
                let rel_from = from.saturating_sub(base);
                let rel_till = till.min(child_last) - base;
                let (removed, emptied) =
                    self.delete_page(child, level - 1, rel_from, rel_till)?;
                removed_total += removed;

                let mut node = InnerMut::new(guard.data_mut(), self.elem_size, self.timestamp);
                if emptied {
                    self.pager.free(child)?;
                    node.remove_slot(i);
                    base += count;
                    continue;
                }
                node.set_count(i, count - removed);
                if self.timestamp && rel_from == 0 && removed > 0 {
                    let first = self.first_of(child, level - 1)?;
                    node.set_value(i, &first);
                }
            }
            base += count;
            i += 1;
        }

        let emptied = Inner::new(guard.data(), self.elem_size, self.timestamp).is_empty();
        Ok((removed_total, emptied))
    }
}

#[derive(Debug, Clone, Copy)]
struct ScanFrame {
    page: PageId,
    slot: usize,
}

/// Untyped resumable scan: the descent stack is the persisted cursor.
pub(crate) struct RawScan {
    col: Arc<ColumnInner>,
    first: u64,
    last_excl: u64,
    pos: u64,
    height: u32,
    stack: SmallVec<[ScanFrame; MAX_TREE_DEPTH]>,
    buf: Vec<u8>,
}

impl RawScan {
    fn new(col: Arc<ColumnInner>, first: u64, last_excl: u64) -> Self {
        let buf = Vec::with_capacity(col.tile_size * col.elem_size);
        Self {
            col,
            first,
            last_excl,
            pos: first,
            height: 0,
            stack: SmallVec::new(),
            buf,
        }
    }

    pub(crate) fn bounds(&self) -> (u64, u64) {
        (self.first, self.last_excl)
    }

    pub(crate) fn elem_size(&self) -> usize {
        self.col.elem_size
    }

    pub(crate) fn tile_size(&self) -> usize {
        self.col.tile_size
    }

    pub(crate) fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn reset(&mut self) {
        self.pos = self.first;
        self.stack.clear();
        self.buf.clear();
    }

    fn descend(&mut self, target: u64) -> Result<()> {
        self.stack.clear();
        let (root, height) = {
            let state = self.col.state.read();
            (state.root, state.height)
        };
        ensure!(!root.is_none(), "scan of empty column '{}'", self.col.name);
        self.height = height;

        let mut pid = root;
        let mut level = height;
        let mut rem = target;
        loop {
            if level == 1 {
                self.stack.push(ScanFrame {
                    page: pid,
                    slot: rem as usize,
                });
                return Ok(());
            }
            let guard = self
                .col
                .pager
                .page(pid, LoadMode::ReadOnly, PageClass::Internal)?;
            let node = Inner::new(guard.data(), self.col.elem_size, self.col.timestamp);
            let mut idx = 0;
            loop {
                let slot = node.slot_at(idx);
                if rem < slot.count() {
                    break;
                }
                rem -= slot.count();
                idx += 1;
                ensure!(idx < node.len(), "count invariant violated at {}", pid);
            }
            self.stack.push(ScanFrame { page: pid, slot: idx });
            pid = node.slot_at(idx).child();
            level -= 1;
        }
    }

    /// Advances past an exhausted leaf to the next one, reusing the stack.
    fn advance_stack(&mut self) -> Result<()> {
        self.stack.pop();
        loop {
            let depth = self.stack.len();
            let Some(frame) = self.stack.last_mut() else {
                bail!("scan ran past the end of column '{}'", self.col.name);
            };
            frame.slot += 1;
            let slot = frame.slot;
            let page = frame.page;

            let guard = self
                .col
                .pager
                .page(page, LoadMode::ReadOnly, PageClass::Internal)?;
            let node = Inner::new(guard.data(), self.col.elem_size, self.col.timestamp);
            if slot < node.len() {
                let mut pid = node.slot_at(slot).child();
                drop(guard);
                // Leftmost descent into the next sibling subtree.
                let mut level = self.height - depth as u32;
                while level > 1 {
                    self.stack.push(ScanFrame { page: pid, slot: 0 });
                    let guard = self
                        .col
                        .pager
                        .page(pid, LoadMode::ReadOnly, PageClass::Internal)?;
                    let node = Inner::new(guard.data(), self.col.elem_size, self.col.timestamp);
                    pid = node.slot_at(0).child();
                    level -= 1;
                }
                self.stack.push(ScanFrame { page: pid, slot: 0 });
                return Ok(());
            }
            drop(guard);
            self.stack.pop();
        }
    }

    /// Fills the raw buffer with up to `tile_size` elements; returns the
    /// element count, 0 at end of range.
    pub(crate) fn next_chunk(&mut self) -> Result<usize> {
        self.buf.clear();
        if self.pos >= self.last_excl {
            return Ok(0);
        }
        if self.stack.is_empty() {
            self.descend(self.pos)?;
        }

        let tile_elems = self.col.tile_size;
        let elem_size = self.col.elem_size;
        let mut filled = 0usize;
        while filled < tile_elems && self.pos < self.last_excl {
            let frame = *self.stack.last().expect("scan stack underflow");
            let guard = self
                .col
                .pager
                .page(frame.page, LoadMode::ReadOnly, PageClass::Leaf)?;
            let leaf = Leaf::new(guard.data(), elem_size);
            let n = leaf.len();

            let want = (tile_elems - filled).min((self.last_excl - self.pos) as usize);
            let take = want.min(n - frame.slot);
            self.buf
                .extend_from_slice(leaf.value_range(frame.slot, frame.slot + take));
            drop(guard);

            filled += take;
            self.pos += take as u64;
            let top = self.stack.last_mut().expect("scan stack underflow");
            top.slot += take;
            if top.slot >= n && self.pos < self.last_excl {
                self.advance_stack()?;
            }
        }
        Ok(filled)
    }
}

/// Typed positional scan over a column range.
pub struct TreeScan<T: Elem> {
    raw: RawScan,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> TreeScan<T> {
    fn new(raw: RawScan) -> Self {
        let (first, last_excl) = raw.bounds();
        let tile = Tile::new(raw.tile_size());
        Self {
            raw,
            tile,
            cursor: Cursor::new(first, last_excl),
        }
    }
}

impl<T: Elem> SeriesIter<T> for TreeScan<T> {
    fn next(&mut self) -> Result<bool> {
        let n = self.raw.next_chunk()?;
        if n == 0 {
            return Ok(false);
        }
        self.tile.clear();
        let elem_size = self.raw.elem_size();
        let buf = self.raw.buf();
        for i in 0..n {
            self.tile.push(T::load(&buf[i * elem_size..]));
        }
        self.cursor.next_pos += n as u64;
        Ok(true)
    }

    fn tile(&self) -> &[T] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.raw.tile_size()
    }

    fn reset(&mut self) -> Result<()> {
        self.raw.reset();
        self.cursor.next_pos = self.cursor.first_pos;
        self.tile.clear();
        Ok(())
    }

    fn is_context_free(&self) -> bool {
        true
    }

    fn supports_random_access(&self) -> bool {
        true
    }
}
