//! # Set and Join Operators
//!
//! Operators combining two or more sequences. The timestamp-driven ones
//! (`union`, `join`, `asof_join`, `stretch`) require their timestamp
//! operands to be sorted, as produced by timestamp columns; they maintain
//! explicit per-operand positions and re-pull operands as their tiles
//! drain — no buffering beyond the current tile of each operand.
//!
//! - `union`: sorted merge of two sorted sequences, duplicates collapsed
//! - `concat`: sequential concatenation; nested concatenations flatten the
//!   left spine instead of stacking pull depth
//! - `join`/`join_pos`: inner merge-join of two sorted timestamp
//!   sequences, emitting the matched values / the left-side positions
//! - `asof_join`/`asof_join_pos`: nearest-timestamp join; each reference
//!   timestamp is bracketed by the previous and next sample, the closer
//!   one wins and the earlier one wins ties
//! - `stretch`/`stretch0`: step-function fill-forward of sparse (ts,
//!   value) samples onto a dense timestamp grid; `stretch0` fills
//!   leading-gap positions with a default instead of erroring
//!
//! (timestamp, value) operand pairs must advance in lockstep; a length
//! mismatch between them is a domain error.

use std::cmp::Ordering;

use eyre::{bail, Result};

use crate::iter::{BoxedSeries, Cursor, Feed, SeriesIter, Tile};
use crate::types::Elem;

struct Union<T: Elem> {
    a: Feed<T>,
    b: Feed<T>,
    last: Option<T>,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for Union<T> {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let v = match (self.a.peek()?, self.b.peek()?) {
                (None, None) => break,
                (Some(x), None) => {
                    self.a.advance();
                    x
                }
                (None, Some(y)) => {
                    self.b.advance();
                    y
                }
                (Some(x), Some(y)) => {
                    if x.order(y) != Ordering::Greater {
                        self.a.advance();
                        x
                    } else {
                        self.b.advance();
                        y
                    }
                }
            };
            if let Some(last) = self.last {
                if last.order(v) == Ordering::Equal {
                    continue;
                }
            }
            self.last = Some(v);
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
        self.a.reset()?;
        self.b.reset()?;
        self.last = None;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Sorted merge of two sorted sequences with duplicates collapsed.
pub fn union<T: Elem>(a: BoxedSeries<T>, b: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = a.tile_size();
    Box::new(Union {
        a: Feed::new(a),
        b: Feed::new(b),
        last: None,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct Concat<T: Elem> {
    parts: Vec<BoxedSeries<T>>,
    current: usize,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for Concat<T> {
    fn next(&mut self) -> Result<bool> {
        while self.current < self.parts.len() {
            if self.parts[self.current].next()? {
                self.tile.clear();
                for &v in self.parts[self.current].tile() {
                    self.tile.push(v);
                }
                self.cursor.next_pos += self.tile.len() as u64;
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
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
        for part in &mut self.parts {
            part.reset()?;
        }
        self.current = 0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn merge(&mut self, _other: &mut dyn SeriesIter<T>) -> Result<()> {
        bail!("operator does not participate in parallel merge");
    }
}

/// Concatenates `a` then `b`. When `a` is itself a concatenation its parts
/// are absorbed, keeping a left-leaning chain of concats flat.
pub fn concat<T: Elem>(mut a: BoxedSeries<T>, b: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = a.tile_size();
    let absorbed = a
        .as_any_mut()
        .and_then(|x| x.downcast_mut::<Concat<T>>())
        .map(|c| std::mem::take(&mut c.parts));
    let mut parts = match absorbed {
        Some(parts) => {
            drop(a);
            parts
        }
        None => vec![a],
    };
    parts.push(b);
    Box::new(Concat {
        parts,
        current: 0,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct MergeJoin<T: Elem> {
    left: Feed<T>,
    right: Feed<T>,
    positions: bool,
    value_tile: Tile<T>,
    pos_tile: Tile<i64>,
    cursor: Cursor,
}

impl<T: Elem> MergeJoin<T> {
    fn fill(&mut self) -> Result<usize> {
        self.value_tile.clear();
        self.pos_tile.clear();
        let cap = self.value_tile.cap();
        let mut filled = 0;
        while filled < cap {
            let (Some(l), Some(r)) = (self.left.peek()?, self.right.peek()?) else {
                break;
            };
            match l.order(r) {
                Ordering::Less => self.left.advance(),
                Ordering::Greater => self.right.advance(),
                Ordering::Equal => {
                    if self.positions {
                        self.pos_tile.push(self.left.position() as i64);
                    } else {
                        self.value_tile.push(l);
                    }
                    self.left.advance();
                    self.right.advance();
                    filled += 1;
                }
            }
        }
        Ok(filled)
    }
}

impl<T: Elem> SeriesIter<T> for MergeJoin<T> {
    fn next(&mut self) -> Result<bool> {
        let filled = self.fill()?;
        if filled == 0 {
            return Ok(false);
        }
        self.cursor.next_pos += filled as u64;
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
        self.left.reset()?;
        self.right.reset()?;
        self.value_tile.clear();
        self.pos_tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Position-emitting face of the same merge-join state.
struct MergeJoinPos<T: Elem>(MergeJoin<T>);

impl<T: Elem> SeriesIter<i64> for MergeJoinPos<T> {
    fn next(&mut self) -> Result<bool> {
        let filled = self.0.fill()?;
        if filled == 0 {
            return Ok(false);
        }
        self.0.cursor.next_pos += filled as u64;
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
        <MergeJoin<T> as SeriesIter<T>>::reset(&mut self.0)
    }
}

/// Inner merge-join of two sorted timestamp sequences: the matched
/// timestamps. Equal runs match one-to-one.
pub fn join<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = left.tile_size();
    Box::new(MergeJoin {
        left: Feed::new(left),
        right: Feed::new(right),
        positions: false,
        value_tile: Tile::new(tile_size),
        pos_tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

/// Inner merge-join emitting the left-side positions of the matches.
pub fn join_pos<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<i64> {
    let tile_size = left.tile_size();
    Box::new(MergeJoinPos(MergeJoin {
        left: Feed::new(left),
        right: Feed::new(right),
        positions: true,
        value_tile: Tile::new(tile_size),
        pos_tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    }))
}

struct AsofJoin<T: Elem, V: Elem> {
    reference: Feed<T>,
    ts: Feed<T>,
    values: Feed<V>,
    prev: Option<(T, V, i64)>,
    positions: bool,
    value_tile: Tile<V>,
    pos_tile: Tile<i64>,
    cursor: Cursor,
}

impl<T: Elem, V: Elem> AsofJoin<T, V> {
    fn peek_pair(&mut self) -> Result<Option<(T, V, i64)>> {
        let Some(t) = self.ts.peek()? else {
            if self.values.peek()?.is_some() {
                bail!("as-of join timestamp and value sequences differ in length");
            }
            return Ok(None);
        };
        let Some(v) = self.values.peek()? else {
            bail!("as-of join timestamp and value sequences differ in length");
        };
        Ok(Some((t, v, self.ts.position() as i64)))
    }

    fn fill(&mut self) -> Result<usize> {
        self.value_tile.clear();
        self.pos_tile.clear();
        let cap = self.value_tile.cap();
        let mut filled = 0;
        while filled < cap {
            let Some(r) = self.reference.next_value()? else {
                break;
            };
            // Advance the sample side while it stays at or before `r`.
            while let Some((t, v, p)) = self.peek_pair()? {
                if t.order(r) == Ordering::Greater {
                    break;
                }
                self.prev = Some((t, v, p));
                self.ts.advance();
                self.values.advance();
            }
            let next = self.peek_pair()?;
            let (v, p) = match (self.prev, next) {
                (None, None) => bail!("as-of join against an empty sample sequence"),
                (Some((_, v, p)), None) => (v, p),
                (None, Some((_, v, p))) => (v, p),
                (Some((pt, pv, pp)), Some((nt, nv, np))) => {
                    let d_prev = (r.to_f64() - pt.to_f64()).abs();
                    let d_next = (nt.to_f64() - r.to_f64()).abs();
                    // The earlier sample wins ties.
                    if d_next < d_prev {
                        (nv, np)
                    } else {
                        (pv, pp)
                    }
                }
            };
            if self.positions {
                self.pos_tile.push(p);
            } else {
                self.value_tile.push(v);
            }
            filled += 1;
        }
        Ok(filled)
    }
}

impl<T: Elem, V: Elem> SeriesIter<V> for AsofJoin<T, V> {
    fn next(&mut self) -> Result<bool> {
        let filled = self.fill()?;
        if filled == 0 {
            return Ok(false);
        }
        self.cursor.next_pos += filled as u64;
        Ok(true)
    }

    fn tile(&self) -> &[V] {
        self.value_tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.value_tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.reference.reset()?;
        self.ts.reset()?;
        self.values.reset()?;
        self.prev = None;
        self.value_tile.clear();
        self.pos_tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

struct AsofJoinPos<T: Elem, V: Elem>(AsofJoin<T, V>);

impl<T: Elem, V: Elem> SeriesIter<i64> for AsofJoinPos<T, V> {
    fn next(&mut self) -> Result<bool> {
        let filled = self.0.fill()?;
        if filled == 0 {
            return Ok(false);
        }
        self.0.cursor.next_pos += filled as u64;
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
        <AsofJoin<T, V> as SeriesIter<V>>::reset(&mut self.0)
    }
}

fn asof<T: Elem, V: Elem>(
    reference: BoxedSeries<T>,
    ts: BoxedSeries<T>,
    values: BoxedSeries<V>,
    positions: bool,
) -> AsofJoin<T, V> {
    let tile_size = reference.tile_size();
    AsofJoin {
        reference: Feed::new(reference),
        ts: Feed::new(ts),
        values: Feed::new(values),
        prev: None,
        positions,
        value_tile: Tile::new(tile_size),
        pos_tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    }
}

/// Nearest-timestamp join: for each reference timestamp, the value sampled
/// at the closest timestamp of the `(ts, values)` pair sequence.
pub fn asof_join<T: Elem, V: Elem>(
    reference: BoxedSeries<T>,
    ts: BoxedSeries<T>,
    values: BoxedSeries<V>,
) -> BoxedSeries<V> {
    Box::new(asof(reference, ts, values, false))
}

/// Nearest-timestamp join emitting the matched sample positions.
pub fn asof_join_pos<T: Elem, V: Elem>(
    reference: BoxedSeries<T>,
    ts: BoxedSeries<T>,
    values: BoxedSeries<V>,
) -> BoxedSeries<i64> {
    Box::new(AsofJoinPos(asof(reference, ts, values, true)))
}

struct Stretch<T: Elem, V: Elem> {
    ts: Feed<T>,
    values: Feed<V>,
    grid: Feed<T>,
    filler: Option<V>,
    current: Option<V>,
    tile: Tile<V>,
    cursor: Cursor,
}

impl<T: Elem, V: Elem> SeriesIter<V> for Stretch<T, V> {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(g) = self.grid.next_value()? else {
                break;
            };
            // Fill forward: latest sample at or before the grid point.
            while let Some(t) = self.ts.peek()? {
                if t.order(g) == Ordering::Greater {
                    break;
                }
                let Some(v) = self.values.peek()? else {
                    bail!("stretch timestamp and value sequences differ in length");
                };
                self.current = Some(v);
                self.ts.advance();
                self.values.advance();
            }
            let out = match (self.current, self.filler) {
                (Some(v), _) => v,
                (None, Some(f)) => f,
                (None, None) => {
                    bail!("grid timestamp precedes the first sample in stretch")
                }
            };
            self.tile.push(out);
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[V] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.ts.reset()?;
        self.values.reset()?;
        self.grid.reset()?;
        self.current = None;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Step-function fill-forward of sparse `(ts, values)` samples onto the
/// dense timestamp `grid`. A grid point before the first sample is a
/// domain error.
pub fn stretch<T: Elem, V: Elem>(
    ts: BoxedSeries<T>,
    values: BoxedSeries<V>,
    grid: BoxedSeries<T>,
) -> BoxedSeries<V> {
    let tile_size = grid.tile_size();
    Box::new(Stretch {
        ts: Feed::new(ts),
        values: Feed::new(values),
        grid: Feed::new(grid),
        filler: None,
        current: None,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

/// `stretch` with a filler emitted for grid points before the first
/// sample.
pub fn stretch0<T: Elem, V: Elem>(
    ts: BoxedSeries<T>,
    values: BoxedSeries<V>,
    grid: BoxedSeries<T>,
    filler: V,
) -> BoxedSeries<V> {
    let tile_size = grid.tile_size();
    Box::new(Stretch {
        ts: Feed::new(ts),
        values: Feed::new(values),
        grid: Feed::new(grid),
        filler: Some(filler),
        current: None,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops::from_vec;

    #[test]
    fn union_merges_and_dedups() {
        let a = from_vec(vec![1i64, 3, 5, 5], 2);
        let b = from_vec(vec![2i64, 3, 6], 2);
        let mut out = union(a, b);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1, 2, 3, 5, 6]);
    }

    #[test]
    fn concat_flattens_left_spine() {
        let a = from_vec(vec![1i32, 2], 4);
        let b = from_vec(vec![3i32], 4);
        let c = from_vec(vec![4i32, 5], 4);
        let mut out = concat(concat(a, b), c);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn merge_join_matches_sorted_timestamps() {
        let left = from_vec(vec![10i64, 20, 30, 40], 2);
        let right = from_vec(vec![20i64, 35, 40], 2);
        let mut out = join(left, right);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![20, 40]);

        let left = from_vec(vec![10i64, 20, 30, 40], 2);
        let right = from_vec(vec![20i64, 35, 40], 2);
        let mut out = join_pos(left, right);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1, 3]);
    }

    #[test]
    fn asof_join_picks_nearest_with_earlier_on_ties() {
        let reference = from_vec(vec![15i64, 20, 32], 4);
        let ts = from_vec(vec![10i64, 20, 30], 4);
        let values = from_vec(vec![100i32, 200, 300], 4);
        let mut out = asof_join(reference, ts, values);
        // 15 ties between 10 and 20 -> earlier (100); 20 exact; 32 -> 300.
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![100, 200, 300]);
    }

    #[test]
    fn asof_join_pos_brackets_forward() {
        let reference = from_vec(vec![1i64, 29], 4);
        let ts = from_vec(vec![10i64, 30], 4);
        let values = from_vec(vec![1.0f64, 2.0], 4);
        let mut out = asof_join_pos(reference, ts, values);
        // 1 has no prev -> next sample (pos 0); 29 is closer to 30 (pos 1).
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![0, 1]);
    }

    #[test]
    fn asof_join_length_mismatch_is_an_error() {
        let reference = from_vec(vec![1i64, 50], 4);
        let ts = from_vec(vec![10i64, 30], 4);
        let values = from_vec(vec![1.0f64], 4);
        let mut out = asof_join(reference, ts, values);
        assert!(out.next().is_err());
    }

    #[test]
    fn stretch_fills_forward_onto_grid() {
        let ts = from_vec(vec![10i64, 30], 4);
        let values = from_vec(vec![1i32, 2], 4);
        let grid = from_vec(vec![10i64, 15, 20, 30, 35], 4);
        let mut out = stretch(ts, values, grid);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1, 1, 1, 2, 2]);
    }

    #[test]
    fn stretch_before_first_sample_errors_without_filler() {
        let ts = from_vec(vec![10i64], 4);
        let values = from_vec(vec![1i32], 4);
        let grid = from_vec(vec![5i64, 10], 4);
        let mut out = stretch(ts, values, grid);
        assert!(out.next().is_err());
    }

    #[test]
    fn stretch0_uses_the_filler_for_leading_gaps() {
        let ts = from_vec(vec![10i64], 4);
        let values = from_vec(vec![7i32], 4);
        let grid = from_vec(vec![5i64, 10, 11], 4);
        let mut out = stretch0(ts, values, grid, 0);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![0, 7, 7]);
    }
}
