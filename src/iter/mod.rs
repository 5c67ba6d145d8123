//! # Iterator Core — the Tile Protocol
//!
//! This module defines the pull-based execution protocol every operator in
//! Tessera speaks: `next()` fills a bounded *tile* of consecutive elements,
//! and composition forms a dataflow graph evaluated tile by tile.
//!
//! ## The Contract
//!
//! - `next()` fills the operator's tile with up to `tile_size` consecutive
//!   elements and returns `Ok(true)`, or returns `Ok(false)` at the
//!   definitive end of the sequence. A successful `next()` never leaves an
//!   empty tile, and `next()` after the end keeps returning `Ok(false)`.
//! - `reset()` rewinds the operator — and transitively its operands — to
//!   replay from the start. Operators needing multiple passes (reverse,
//!   sort, any two-pass aggregate) rely on this.
//! - `prepare()` is the worker-local precompute phase of parallel
//!   execution. For aggregating operators it builds the accumulator without
//!   emitting; the default forwards to `next()`.
//! - `merge(other)` folds another worker's same-kind operator state into
//!   `self`. Implementations downcast through `as_any_mut`; merging
//!   distinct operator kinds is a domain error.
//!
//! ## Positions
//!
//! Each operator carries a [`Cursor`]: `first_pos` and `last_pos` delimit
//! the half-open logical range it will produce, and `next_pos` is one past
//! the last element already emitted. The position of element `i` of the
//! current tile is therefore `next_pos - tile.len() + i` — the identity the
//! position-producing operators rely on.
//!
//! ## Element-Wise Access
//!
//! [`Feed`] wraps a boxed iterator with a `tile_offs` read cursor, turning
//! the tile protocol into per-element `next_value()`/`peek()` calls. The
//! multi-operand operators (joins, grouping, lockstep arithmetic) each keep
//! one `Feed` per operand and advance them independently.
//!
//! ## Errors
//!
//! No operator catches an operand's error: every `Err` aborts the whole
//! pull. End-of-data is not an error.

use std::any::Any;

use eyre::{bail, Result};

use crate::types::Elem;

mod tee;

pub use tee::tee;

/// Bounded element buffer — the unit of pull-based batching.
#[derive(Debug)]
pub struct Tile<T> {
    items: Vec<T>,
    cap: usize,
}

impl<T: Elem> Tile<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
            cap,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn push(&mut self, v: T) {
        debug_assert!(!self.is_full(), "tile overflow");
        self.items.push(v);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn replace(&mut self, items: Vec<T>) {
        self.items = items;
    }
}

/// Logical position state of an operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cursor {
    /// One past the last element already emitted.
    pub next_pos: u64,
    /// First logical position this operator produces.
    pub first_pos: u64,
    /// One past the last logical position (u64::MAX when unknown).
    pub last_pos: u64,
}

impl Cursor {
    pub fn new(first_pos: u64, last_pos: u64) -> Self {
        Self {
            next_pos: first_pos,
            first_pos,
            last_pos,
        }
    }

    /// Cursor over `[0, n)`.
    pub fn sized(n: u64) -> Self {
        Self::new(0, n)
    }

    /// Cursor with an unknown output length.
    pub fn unbounded() -> Self {
        Self::new(0, u64::MAX)
    }

    /// Fresh cursor over the same positional frame as `other`. Element-wise
    /// 1:1 operators inherit their (left) operand's frame this way, so
    /// positions stay column-global through arithmetic and windowing.
    pub fn inherit(other: &Cursor) -> Self {
        Self::new(other.first_pos, other.last_pos)
    }

    /// Global position of element `i` in the current tile.
    pub fn tile_pos(&self, tile_len: usize, i: usize) -> u64 {
        self.next_pos - tile_len as u64 + i as u64
    }
}

/// A node in the operator graph. See the module docs for the protocol.
pub trait SeriesIter<T: Elem>: Send {
    /// Fills the tile with the next batch; `Ok(false)` at end of sequence.
    fn next(&mut self) -> Result<bool>;

    /// The tile produced by the last successful `next()`.
    fn tile(&self) -> &[T];

    fn cursor(&self) -> &Cursor;

    /// Tile capacity this operator produces.
    fn tile_size(&self) -> usize;

    /// Rewinds this operator and transitively its operands.
    fn reset(&mut self) -> Result<()>;

    /// Known output length, if the operator can tell without evaluating.
    fn elem_count(&self) -> Option<u64> {
        let c = self.cursor();
        (c.last_pos != u64::MAX).then(|| c.last_pos - c.first_pos)
    }

    /// True when concurrent pulls through a shared subgraph cannot corrupt
    /// each other (no per-call mutable context beyond the tile itself).
    fn is_context_free(&self) -> bool {
        false
    }

    /// True when the operator supports positional re-reads without reset.
    fn supports_random_access(&self) -> bool {
        false
    }

    /// Worker-local precompute phase of parallel execution.
    fn prepare(&mut self) -> Result<bool> {
        self.next()
    }

    /// Folds another worker's state into `self`.
    fn merge(&mut self, other: &mut dyn SeriesIter<T>) -> Result<()> {
        let _ = other;
        bail!("operator does not participate in parallel merge");
    }

    /// Downcast hook for `merge`; mergeable operators return `Some(self)`.
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
}

pub type BoxedSeries<T> = Box<dyn SeriesIter<T>>;

/// Element-wise reader over a boxed iterator: maintains the `tile_offs`
/// cursor and refills by pulling the next tile on demand.
pub struct Feed<T: Elem> {
    iter: BoxedSeries<T>,
    offs: usize,
    done: bool,
}

impl<T: Elem> Feed<T> {
    pub fn new(iter: BoxedSeries<T>) -> Self {
        Self {
            iter,
            offs: usize::MAX,
            done: false,
        }
    }

    fn fill(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        while self.offs >= self.iter.tile().len() {
            if !self.iter.next()? {
                self.done = true;
                return Ok(false);
            }
            self.offs = 0;
        }
        Ok(true)
    }

    /// Next element without consuming it.
    pub fn peek(&mut self) -> Result<Option<T>> {
        if self.fill()? {
            Ok(Some(self.iter.tile()[self.offs]))
        } else {
            Ok(None)
        }
    }

    /// Consumes and returns the next element.
    pub fn next_value(&mut self) -> Result<Option<T>> {
        let v = self.peek()?;
        if v.is_some() {
            self.offs += 1;
        }
        Ok(v)
    }

    /// Consumes the element `peek` exposed.
    pub fn advance(&mut self) {
        debug_assert!(self.offs < self.iter.tile().len());
        self.offs += 1;
    }

    /// Global position of the element `peek`/`next_value` would return.
    pub fn position(&self) -> u64 {
        let c = self.iter.cursor();
        c.next_pos - self.iter.tile().len() as u64 + self.offs.min(self.iter.tile().len()) as u64
    }

    pub fn tile_size(&self) -> usize {
        self.iter.tile_size()
    }

    pub fn elem_count(&self) -> Option<u64> {
        self.iter.elem_count()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.iter.reset()?;
        self.offs = usize::MAX;
        self.done = false;
        Ok(())
    }

    pub fn into_inner(self) -> BoxedSeries<T> {
        self.iter
    }

    pub fn inner_mut(&mut self) -> &mut BoxedSeries<T> {
        &mut self.iter
    }
}

/// Drains an iterator into a flat buffer — the deliberate materialization
/// point used by sort, rank and reverse.
pub fn to_array<T: Elem>(iter: &mut dyn SeriesIter<T>) -> Result<Vec<T>> {
    let mut out = match iter.elem_count() {
        Some(n) => Vec::with_capacity(n as usize),
        None => Vec::new(),
    };
    while iter.next()? {
        out.extend_from_slice(iter.tile());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::from_vec;

    #[test]
    fn feed_reads_across_tile_boundaries() {
        let series = from_vec((0..10i32).collect(), 3);
        let mut feed = Feed::new(series);

        let mut got = Vec::new();
        while let Some(v) = feed.next_value().unwrap() {
            got.push(v);
        }
        assert_eq!(got, (0..10).collect::<Vec<_>>());

        // Exhausted feeds stay exhausted.
        assert_eq!(feed.next_value().unwrap(), None);
    }

    #[test]
    fn feed_peek_does_not_consume() {
        let series = from_vec(vec![7i64, 8], 4);
        let mut feed = Feed::new(series);

        assert_eq!(feed.peek().unwrap(), Some(7));
        assert_eq!(feed.peek().unwrap(), Some(7));
        assert_eq!(feed.next_value().unwrap(), Some(7));
        assert_eq!(feed.next_value().unwrap(), Some(8));
        assert_eq!(feed.peek().unwrap(), None);
    }

    #[test]
    fn feed_position_tracks_global_offsets() {
        let series = from_vec((0..7i32).collect(), 2);
        let mut feed = Feed::new(series);

        for expected in 0..7u64 {
            assert_eq!(feed.peek().unwrap(), Some(expected as i32));
            assert_eq!(feed.position(), expected);
            feed.advance();
        }
    }

    #[test]
    fn to_array_round_trips_every_tile() {
        let mut series = from_vec((0..100i16).collect(), 7);
        let all = to_array(series.as_mut()).unwrap();
        assert_eq!(all.len(), 100);
        assert_eq!(all[99], 99);
    }

    #[test]
    fn reset_replays_from_the_start() {
        let mut series = from_vec(vec![1i32, 2, 3], 2);
        assert!(series.next().unwrap());
        series.reset().unwrap();
        let all = to_array(series.as_mut()).unwrap();
        assert_eq!(all, vec![1, 2, 3]);
    }
}
