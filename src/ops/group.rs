//! # Grouped Aggregates (Sorted Input)
//!
//! Grouped aggregates consume a value stream and a parallel group-key
//! stream that is already sorted (or at least run-clustered): a group is a
//! maximal run of consecutive equal keys, detected by comparing each key
//! against the current run's key. One aggregate result is emitted per run.
//!
//! The engine does not sort internally for this family — feed unsorted keys
//! through `ops::sort` first, or use the hash family for unordered input.
//!
//! Group boundaries are detected on the KEY operand for every variant;
//! `group_count` consumes only the key stream. Fixed-width byte keys get
//! the same treatment through `ops::bytes::group_count_bytes`, which
//! compares keys by `memcmp`.

use std::cmp::Ordering;

use eyre::Result;

use crate::iter::{BoxedSeries, Cursor, Feed, SeriesIter, Tile};
use crate::types::Elem;

/// Per-run accumulator. A zeroed prototype is cloned at each run start.
trait RunState<T: Elem>: Clone + Send + 'static {
    type Out: Elem;

    fn push(&mut self, v: Option<T>);
    fn result(&self) -> Self::Out;
}

struct GroupBy<T: Elem, K: Elem, S: RunState<T>> {
    proto: S,
    keys: Feed<K>,
    /// `None` for key-only aggregates (count).
    values: Option<Feed<T>>,
    run: Option<(K, S)>,
    tile: Tile<S::Out>,
    cursor: Cursor,
}

impl<T: Elem, K: Elem, S: RunState<T>> SeriesIter<S::Out> for GroupBy<T, K, S> {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(key) = self.keys.peek()? else {
                if let Some((_, state)) = self.run.take() {
                    self.tile.push(state.result());
                }
                break;
            };
            if let Some((run_key, _)) = &self.run {
                if run_key.order(key) != Ordering::Equal {
                    let (_, state) = self.run.take().expect("group run missing");
                    self.tile.push(state.result());
                    continue; // the boundary key starts the next run
                }
            }
            self.keys.advance();
            let value = match &mut self.values {
                Some(values) => match values.next_value()? {
                    Some(v) => Some(v),
                    None => {
                        // Value stream exhausted: flush and end.
                        if let Some((_, state)) = self.run.take() {
                            self.tile.push(state.result());
                        }
                        break;
                    }
                },
                None => None,
            };
            match &mut self.run {
                Some((_, state)) => state.push(value),
                None => {
                    let mut state = self.proto.clone();
                    state.push(value);
                    self.run = Some((key, state));
                }
            }
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[S::Out] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.keys.reset()?;
        if let Some(values) = &mut self.values {
            values.reset()?;
        }
        self.run = None;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

fn group_by<T: Elem, K: Elem, S: RunState<T>>(
    proto: S,
    values: Option<BoxedSeries<T>>,
    keys: BoxedSeries<K>,
) -> BoxedSeries<S::Out> {
    let tile_size = keys.tile_size();
    Box::new(GroupBy {
        proto,
        keys: Feed::new(keys),
        values: values.map(Feed::new),
        run: None,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

#[derive(Clone, Default)]
struct CountState {
    n: i64,
}

impl<T: Elem> RunState<T> for CountState {
    type Out = i64;

    fn push(&mut self, _v: Option<T>) {
        self.n += 1;
    }

    fn result(&self) -> i64 {
        self.n
    }
}

#[derive(Clone)]
struct SumState<T: Elem> {
    acc: T::Acc,
}

impl<T: Elem> RunState<T> for SumState<T> {
    type Out = T::Acc;

    fn push(&mut self, v: Option<T>) {
        self.acc = self.acc.add(v.expect("sum run without value").to_acc());
    }

    fn result(&self) -> T::Acc {
        self.acc
    }
}

#[derive(Clone)]
struct ExtremeState<T: Elem> {
    largest: bool,
    best: Option<T>,
}

impl<T: Elem> RunState<T> for ExtremeState<T> {
    type Out = T;

    fn push(&mut self, v: Option<T>) {
        let v = v.expect("extremum run without value");
        let better = match self.best {
            None => true,
            Some(b) => {
                if self.largest {
                    v.order(b) == Ordering::Greater
                } else {
                    v.order(b) == Ordering::Less
                }
            }
        };
        if better {
            self.best = Some(v);
        }
    }

    fn result(&self) -> T {
        self.best.expect("empty extremum run")
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MomentKind {
    Avg,
    Var,
    Dev,
}

#[derive(Clone)]
struct MomentState {
    kind: MomentKind,
    n: u64,
    sum: f64,
    sum_sq: f64,
}

impl<T: Elem> RunState<T> for MomentState {
    type Out = f64;

    fn push(&mut self, v: Option<T>) {
        let x = v.expect("moment run without value").to_f64();
        self.n += 1;
        self.sum += x;
        self.sum_sq += x * x;
    }

    fn result(&self) -> f64 {
        let n = self.n as f64;
        let mean = self.sum / n;
        match self.kind {
            MomentKind::Avg => mean,
            MomentKind::Var => (self.sum_sq / n - mean * mean).max(0.0),
            MomentKind::Dev => (self.sum_sq / n - mean * mean).max(0.0).sqrt(),
        }
    }
}

/// Elements per run of equal keys.
pub fn group_count<K: Elem>(keys: BoxedSeries<K>) -> BoxedSeries<i64> {
    group_by::<K, K, CountState>(CountState::default(), None, keys)
}

/// Sum of `values` per run of equal keys.
pub fn group_sum<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
) -> BoxedSeries<T::Acc> {
    group_by(
        SumState::<T> {
            acc: <T::Acc as Elem>::zero(),
        },
        Some(values),
        keys,
    )
}

pub fn group_max<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
) -> BoxedSeries<T> {
    group_by(
        ExtremeState::<T> {
            largest: true,
            best: None,
        },
        Some(values),
        keys,
    )
}

pub fn group_min<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
) -> BoxedSeries<T> {
    group_by(
        ExtremeState::<T> {
            largest: false,
            best: None,
        },
        Some(values),
        keys,
    )
}

fn group_moment<T: Elem, K: Elem>(
    kind: MomentKind,
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
) -> BoxedSeries<f64> {
    group_by(
        MomentState {
            kind,
            n: 0,
            sum: 0.0,
            sum_sq: 0.0,
        },
        Some(values),
        keys,
    )
}

pub fn group_avg<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
) -> BoxedSeries<f64> {
    group_moment(MomentKind::Avg, values, keys)
}

/// Population variance per run.
pub fn group_var<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
) -> BoxedSeries<f64> {
    group_moment(MomentKind::Var, values, keys)
}

/// Population standard deviation per run.
pub fn group_dev<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
) -> BoxedSeries<f64> {
    group_moment(MomentKind::Dev, values, keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops::from_vec;

    #[test]
    fn group_count_counts_runs() {
        let keys = from_vec(vec![1i32, 1, 2, 2, 2, 5], 4);
        let mut out = group_count(keys);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![2, 3, 1]);
    }

    #[test]
    fn group_sum_one_result_per_run() {
        let values = from_vec(vec![10i32, 20, 1, 2, 3, 100], 4);
        let keys = from_vec(vec![7i64, 7, 8, 8, 8, 9], 4);
        let mut out = group_sum(values, keys);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![30i64, 6, 100]);
    }

    #[test]
    fn group_extremes_and_moments() {
        let values = from_vec(vec![3i32, 9, 4, 4], 4);
        let keys = from_vec(vec![1i8, 1, 2, 2], 4);
        let mut out = group_max(values, keys);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![9, 4]);

        let values = from_vec(vec![1.0f64, 3.0, 10.0], 4);
        let keys = from_vec(vec![1i8, 1, 2], 4);
        let mut out = group_avg(values, keys);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![2.0, 10.0]);
    }

    #[test]
    fn run_spanning_tile_boundary_stays_one_group() {
        // Tile size 2 forces the run of four equal keys across tiles.
        let values = from_vec(vec![1i32, 1, 1, 1, 5], 2);
        let keys = from_vec(vec![0i32, 0, 0, 0, 9], 2);
        let mut out = group_sum(values, keys);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![4i64, 5]);
    }

    #[test]
    fn empty_key_stream_yields_no_groups() {
        let keys = from_vec(Vec::<i32>::new(), 4);
        let mut out = group_count(keys);
        assert!(!out.next().unwrap());
    }
}
