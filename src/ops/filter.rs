//! # Filtering and Predication
//!
//! Mask-driven compaction and selection operators. Masks are `i8` sequences
//! (nonzero = true) as produced by the comparison family.
//!
//! ## Position Semantics
//!
//! `filter_pos` and `filter_first_pos` emit the positions of matching
//! elements as tracked by the mask stream's own cursor, so a mask computed
//! over `subseq(100, …)` yields column-global positions.
//!
//! ## Bounded Buffers
//!
//! `filter_first_pos` and the top-K operators hold at most K entries and
//! emit them as a single tile, so K must fit in one tile — a larger K is a
//! parameter-out-of-range domain error. Their `merge` implementations do an
//! ordered bounded merge of two worker-local buffers, which is what makes
//! these operators shardable under the prepare/merge protocol.
//!
//! ## Branch Selection
//!
//! `cond` pulls its then/else operands only on the branch actually taken,
//! letting the two branches be sequences of different lengths; `iif`
//! advances all three operands in lockstep, the ternary-operator analog.

use std::any::Any;
use std::cmp::Ordering;

use eyre::{ensure, Result};

use crate::iter::{BoxedSeries, Cursor, Feed, SeriesIter, Tile};
use crate::types::Elem;

struct Filter<T: Elem> {
    mask: Feed<i8>,
    values: Feed<T>,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for Filter<T> {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(hit) = self.mask.next_value()? else { break };
            let Some(v) = self.values.next_value()? else { break };
            if hit != 0 {
                self.tile.push(v);
            }
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[T] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.mask.reset()?;
        self.values.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Keeps the elements of `values` whose mask element is true, preserving
/// relative order.
pub fn filter<T: Elem>(mask: BoxedSeries<i8>, values: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = values.tile_size();
    Box::new(Filter {
        mask: Feed::new(mask),
        values: Feed::new(values),
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct FilterPos {
    mask: Feed<i8>,
    tile: Tile<i64>,
    cursor: Cursor,
}

impl SeriesIter<i64> for FilterPos {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let pos = self.mask.position();
            let Some(hit) = self.mask.next_value()? else { break };
            if hit != 0 {
                self.tile.push(pos as i64);
            }
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[i64] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.mask.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Positions of the true elements of the mask.
pub fn filter_pos(mask: BoxedSeries<i8>) -> BoxedSeries<i64> {
    let tile_size = mask.tile_size();
    Box::new(FilterPos {
        mask: Feed::new(mask),
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct FilterFirstPos {
    mask: Feed<i8>,
    limit: usize,
    found: Option<Vec<i64>>,
    emitted: bool,
    tile: Tile<i64>,
    cursor: Cursor,
}

impl FilterFirstPos {
    fn compute(&mut self) -> Result<()> {
        if self.found.is_some() {
            return Ok(());
        }
        let mut found = Vec::with_capacity(self.limit);
        while found.len() < self.limit {
            let pos = self.mask.position();
            let Some(hit) = self.mask.next_value()? else { break };
            if hit != 0 {
                found.push(pos as i64);
            }
        }
        self.found = Some(found);
        Ok(())
    }
}

impl SeriesIter<i64> for FilterFirstPos {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let found = self.found.as_ref().expect("first-pos state missing");
        if found.is_empty() {
            return Ok(false);
        }
        self.tile.clear();
        for &p in found {
            self.tile.push(p);
        }
        self.cursor.next_pos = self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[i64] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.mask.reset()?;
        self.found = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn prepare(&mut self) -> Result<bool> {
        self.compute()?;
        Ok(true)
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<i64>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<FilterFirstPos>())
            .ok_or_else(|| eyre::eyre!("merge of mismatched operator kinds"))?;
        other.compute()?;
        self.compute()?;

        let src = other.found.take().unwrap_or_default();
        let dst = self.found.as_mut().expect("first-pos state missing");
        let merged = merge_sorted_bounded(dst, &src, self.limit, |a, b| a.cmp(b), false);
        *dst = merged;
        Ok(())
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}

/// Ordered merge of two buffers already sorted under `cmp`, bounded to
/// `limit` entries; `dedup` drops comparison-equal duplicates.
fn merge_sorted_bounded<T: Copy>(
    a: &[T],
    b: &[T],
    limit: usize,
    cmp: impl Fn(&T, &T) -> Ordering,
    dedup: bool,
) -> Vec<T> {
    let mut out = Vec::with_capacity(limit.min(a.len() + b.len()));
    let (mut i, mut j) = (0, 0);
    while out.len() < limit && (i < a.len() || j < b.len()) {
        let take_a = if i == a.len() {
            false
        } else if j == b.len() {
            true
        } else {
            cmp(&a[i], &b[j]) != Ordering::Greater
        };
        let v = if take_a {
            let v = a[i];
            i += 1;
            v
        } else {
            let v = b[j];
            j += 1;
            v
        };
        if dedup {
            if let Some(last) = out.last() {
                if cmp(last, &v) == Ordering::Equal {
                    continue;
                }
            }
        }
        out.push(v);
    }
    out
}

/// First `limit` positions whose mask element is true. Supports the
/// prepare/merge protocol: worker-local lists merge in position order,
/// bounded to `limit`.
pub fn filter_first_pos(mask: BoxedSeries<i8>, limit: usize) -> Result<BoxedSeries<i64>> {
    let tile_size = mask.tile_size();
    ensure!(
        limit >= 1 && limit <= tile_size,
        "first-pos limit {} out of range 1..={}",
        limit,
        tile_size
    );
    Ok(Box::new(FilterFirstPos {
        mask: Feed::new(mask),
        limit,
        found: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    }))
}

struct CondIter<T: Elem> {
    mask: Feed<i8>,
    then_branch: Feed<T>,
    else_branch: Feed<T>,
    lockstep: bool,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for CondIter<T> {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        'fill: while !self.tile.is_full() {
            let Some(hit) = self.mask.next_value()? else { break };
            let v = if self.lockstep {
                // Ternary form: both branches advance unconditionally.
                let Some(t) = self.then_branch.next_value()? else { break 'fill };
                let Some(e) = self.else_branch.next_value()? else { break 'fill };
                if hit != 0 {
                    t
                } else {
                    e
                }
            } else {
                let branch = if hit != 0 {
                    &mut self.then_branch
                } else {
                    &mut self.else_branch
                };
                let Some(v) = branch.next_value()? else { break 'fill };
                v
            };
            self.tile.push(v);
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[T] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.mask.reset()?;
        self.then_branch.reset()?;
        self.else_branch.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Branch selection: each branch stream advances only when its branch is
/// taken, so the branches supply just their own elements.
pub fn cond<T: Elem>(
    mask: BoxedSeries<i8>,
    then_branch: BoxedSeries<T>,
    else_branch: BoxedSeries<T>,
) -> BoxedSeries<T> {
    let tile_size = then_branch.tile_size();
    Box::new(CondIter {
        mask: Feed::new(mask),
        then_branch: Feed::new(then_branch),
        else_branch: Feed::new(else_branch),
        lockstep: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

/// Ternary selection: all three operands advance in lockstep.
pub fn iif<T: Elem>(
    mask: BoxedSeries<i8>,
    then_branch: BoxedSeries<T>,
    else_branch: BoxedSeries<T>,
) -> BoxedSeries<T> {
    let tile_size = then_branch.tile_size();
    Box::new(CondIter {
        mask: Feed::new(mask),
        then_branch: Feed::new(then_branch),
        else_branch: Feed::new(else_branch),
        lockstep: true,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct TopK<T: Elem> {
    input: Feed<T>,
    k: usize,
    largest: bool,
    /// Best-first, comparison-deduplicated; `None` until computed.
    best: Option<Vec<(T, i64)>>,
    emitted: bool,
    value_tile: Tile<T>,
    pos_tile: Tile<i64>,
    cursor: Cursor,
}

impl<T: Elem> TopK<T> {
    /// True when `a` ranks strictly before `b`.
    fn ranks_before(&self, a: T, b: T) -> bool {
        if self.largest {
            a.order(b) == Ordering::Greater
        } else {
            a.order(b) == Ordering::Less
        }
    }

    fn compute(&mut self) -> Result<()> {
        if self.best.is_some() {
            return Ok(());
        }
        let mut best: Vec<(T, i64)> = Vec::with_capacity(self.k + 1);
        loop {
            let pos = self.input.position() as i64;
            let Some(v) = self.input.next_value()? else { break };
            // Binary-search insertion point among the current best.
            let idx = best.partition_point(|&(b, _)| self.ranks_before(b, v));
            if idx >= self.k {
                continue;
            }
            if let Some(&(existing, _)) = best.get(idx) {
                if existing.order(v) == Ordering::Equal {
                    continue; // duplicate value
                }
            }
            best.insert(idx, (v, pos));
            best.truncate(self.k);
        }
        self.best = Some(best);
        Ok(())
    }

    fn fold(&mut self, src: Vec<(T, i64)>) {
        let largest = self.largest;
        let dst = self.best.as_mut().expect("top-k state missing");
        let merged = merge_sorted_bounded(
            dst,
            &src,
            self.k,
            |a, b| {
                if largest {
                    b.0.order(a.0)
                } else {
                    a.0.order(b.0)
                }
            },
            true,
        );
        *dst = merged;
    }
}

impl<T: Elem> SeriesIter<T> for TopK<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let best = self.best.as_ref().expect("top-k state missing");
        if best.is_empty() {
            return Ok(false);
        }
        self.value_tile.clear();
        for &(v, _) in best {
            self.value_tile.push(v);
        }
        self.cursor.next_pos = self.value_tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[T] {
        self.value_tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.value_tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.best = None;
        self.emitted = false;
        self.value_tile.clear();
        self.pos_tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn prepare(&mut self) -> Result<bool> {
        self.compute()?;
        Ok(true)
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<T>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<TopK<T>>())
            .ok_or_else(|| eyre::eyre!("merge of mismatched operator kinds"))?;
        ensure!(
            self.largest == other.largest && self.k == other.k,
            "merge of top-k operators with different parameters"
        );
        other.compute()?;
        self.compute()?;
        let src = other.best.take().unwrap_or_default();
        self.fold(src);
        Ok(())
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}

/// Position-emitting wrapper over the same top-K state.
struct TopKPos<T: Elem>(TopK<T>);

impl<T: Elem> SeriesIter<i64> for TopKPos<T> {
    fn next(&mut self) -> Result<bool> {
        self.0.compute()?;
        if self.0.emitted {
            return Ok(false);
        }
        self.0.emitted = true;
        let best = self.0.best.as_ref().expect("top-k state missing");
        if best.is_empty() {
            return Ok(false);
        }
        self.0.pos_tile.clear();
        for &(_, p) in best {
            self.0.pos_tile.push(p);
        }
        self.0.cursor.next_pos = self.0.pos_tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[i64] {
        self.0.pos_tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.0.cursor
    }

    fn tile_size(&self) -> usize {
        self.0.pos_tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        <TopK<T> as SeriesIter<T>>::reset(&mut self.0)
    }

    fn prepare(&mut self) -> Result<bool> {
        self.0.compute()?;
        Ok(true)
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<i64>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<TopKPos<T>>())
            .ok_or_else(|| eyre::eyre!("merge of mismatched operator kinds"))?;
        ensure!(
            self.0.largest == other.0.largest && self.0.k == other.0.k,
            "merge of top-k operators with different parameters"
        );
        other.0.compute()?;
        self.0.compute()?;
        let src = other.0.best.take().unwrap_or_default();
        self.0.fold(src);
        Ok(())
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}

fn top_k<T: Elem>(input: BoxedSeries<T>, k: usize, largest: bool) -> Result<TopK<T>> {
    let tile_size = input.tile_size();
    ensure!(
        k >= 1 && k <= tile_size,
        "top-k parameter {} out of range 1..={}",
        k,
        tile_size
    );
    Ok(TopK {
        input: Feed::new(input),
        k,
        largest,
        best: None,
        emitted: false,
        value_tile: Tile::new(tile_size),
        pos_tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

/// The `k` largest distinct values, best first.
pub fn top_max<T: Elem>(input: BoxedSeries<T>, k: usize) -> Result<BoxedSeries<T>> {
    Ok(Box::new(top_k(input, k, true)?))
}

/// The `k` smallest distinct values, best first.
pub fn top_min<T: Elem>(input: BoxedSeries<T>, k: usize) -> Result<BoxedSeries<T>> {
    Ok(Box::new(top_k(input, k, false)?))
}

/// Positions of the `k` largest distinct values, best first.
pub fn top_max_pos<T: Elem>(input: BoxedSeries<T>, k: usize) -> Result<BoxedSeries<i64>> {
    Ok(Box::new(TopKPos(top_k(input, k, true)?)))
}

/// Positions of the `k` smallest distinct values, best first.
pub fn top_min_pos<T: Elem>(input: BoxedSeries<T>, k: usize) -> Result<BoxedSeries<i64>> {
    Ok(Box::new(TopKPos(top_k(input, k, false)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops::from_vec;

    #[test]
    fn filter_compacts_by_mask() {
        let mask = from_vec(vec![1i8, 0, 1, 1], 4);
        let values = from_vec(vec![10i32, 20, 30, 40], 4);
        let mut out = filter(mask, values);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![10, 30, 40]);
    }

    #[test]
    fn filter_pos_emits_matching_positions() {
        let mask = from_vec(vec![0i8, 1, 0, 1, 1], 2);
        let mut out = filter_pos(mask);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1, 3, 4]);
    }

    #[test]
    fn filter_first_pos_stops_at_limit() {
        let mask = from_vec(vec![1i8; 100], 16);
        let mut out = filter_first_pos(mask, 5).unwrap();
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn filter_first_pos_merge_keeps_earliest() {
        let a = from_vec(vec![0i8, 1, 0, 1, 0, 0], 16);
        let b = from_vec(vec![1i8, 0, 0, 0, 1, 1], 16);
        let mut left = filter_first_pos(a, 3).unwrap();
        let mut right = filter_first_pos(b, 3).unwrap();
        left.prepare().unwrap();
        right.prepare().unwrap();
        left.merge(right.as_mut()).unwrap();
        assert_eq!(to_array(left.as_mut()).unwrap(), vec![0, 1, 3]);
    }

    #[test]
    fn cond_branches_advance_independently() {
        let mask = from_vec(vec![1i8, 0, 1, 0], 4);
        let then_branch = from_vec(vec![100i32, 101], 4);
        let else_branch = from_vec(vec![-1i32, -2], 4);
        let mut out = cond(mask, then_branch, else_branch);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![100, -1, 101, -2]);
    }

    #[test]
    fn iif_consumes_all_operands_in_lockstep() {
        let mask = from_vec(vec![1i8, 0, 1], 4);
        let then_branch = from_vec(vec![1i32, 2, 3], 4);
        let else_branch = from_vec(vec![-1i32, -2, -3], 4);
        let mut out = iif(mask, then_branch, else_branch);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1, -2, 3]);
    }

    #[test]
    fn top_max_dedups_and_ranks_best_first() {
        let input = from_vec(vec![5i32, 5, 3, 9, 1, 9], 8);
        let mut out = top_max(input, 2).unwrap();
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![9, 5]);
    }

    #[test]
    fn top_min_pos_reports_first_occurrence() {
        let input = from_vec(vec![4i32, 2, 7, 2, 1], 8);
        let mut out = top_min_pos(input, 2).unwrap();
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![4, 1]);
    }

    #[test]
    fn top_k_merge_is_bounded_two_way_merge() {
        let a = from_vec(vec![9i64, 5, 1], 8);
        let b = from_vec(vec![8i64, 9, 2], 8);
        let mut left = top_max(a, 3).unwrap();
        let mut right = top_max(b, 3).unwrap();
        left.prepare().unwrap();
        right.prepare().unwrap();
        left.merge(right.as_mut()).unwrap();
        assert_eq!(to_array(left.as_mut()).unwrap(), vec![9, 8, 5]);
    }

    #[test]
    fn oversized_top_k_is_rejected() {
        let input = from_vec(vec![1i32], 4);
        assert!(top_max(input, 5).is_err());
    }
}
