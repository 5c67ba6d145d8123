//! # Global Aggregates
//!
//! Whole-sequence aggregates: a single accumulator drained over the
//! upstream, emitted as a one-element sequence. Every operator here carries
//! the two-phase parallel protocol:
//!
//! - `prepare()` drains the operator's own (shard-local) input into the
//!   accumulator without emitting
//! - `merge(other)` folds another worker's accumulator into this one —
//!   sum-of-sums, bucket-wise addition, extremum-of-extrema, and the
//!   parallel variance formula built from (count, sum, sum-of-squares)
//!
//! For every aggregate, merging k shard-local prepares equals the
//! single-threaded result over the concatenated input.
//!
//! ## Output Types
//!
//! | Aggregate                  | Output                          |
//! |----------------------------|---------------------------------|
//! | count                      | `i64`                           |
//! | sum, prd                   | `T::Acc` (i64 / f64 widening)   |
//! | min, max                   | `T`                             |
//! | avg, var, dev              | `f64`                           |
//! | all, any                   | `i8`                            |
//! | wsum, wavg, cov, corr      | `f64`                           |
//! | histogram                  | `i64` per bucket                |
//!
//! `var`/`dev` are population moments. Aggregates of an empty sequence emit
//! nothing (`count` alone emits 0).

use std::any::Any;
use std::cmp::Ordering;

use eyre::{ensure, eyre, Result};

use crate::iter::{BoxedSeries, Cursor, Feed, SeriesIter, Tile};
use crate::types::Elem;

fn mismatched() -> eyre::Report {
    eyre!("merge of mismatched operator kinds")
}

macro_rules! single_value_plumbing {
    ($out:ty) => {
        fn tile(&self) -> &[$out] {
            self.tile.as_slice()
        }

        fn cursor(&self) -> &Cursor {
            &self.cursor
        }

        fn tile_size(&self) -> usize {
            self.tile.cap()
        }

        fn prepare(&mut self) -> Result<bool> {
            self.compute()?;
            Ok(true)
        }

        fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
            Some(self)
        }
    };
}

struct CountAgg<T: Elem> {
    input: Feed<T>,
    state: Option<i64>,
    emitted: bool,
    tile: Tile<i64>,
    cursor: Cursor,
}

impl<T: Elem> CountAgg<T> {
    fn compute(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let mut n = 0i64;
        while self.input.next_value()?.is_some() {
            n += 1;
        }
        self.state = Some(n);
        Ok(())
    }
}

impl<T: Elem> SeriesIter<i64> for CountAgg<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        self.tile.clear();
        self.tile.push(self.state.expect("aggregate state missing"));
        self.cursor.next_pos = 1;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.state = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<i64>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<CountAgg<T>>())
            .ok_or_else(mismatched)?;
        other.compute()?;
        self.compute()?;
        *self.state.as_mut().unwrap() += other.state.take().unwrap();
        Ok(())
    }

    single_value_plumbing!(i64);
}

/// Element count of the sequence.
pub fn count<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<i64> {
    let tile_size = input.tile_size();
    Box::new(CountAgg {
        input: Feed::new(input),
        state: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ProductKind {
    Sum,
    Prd,
}

struct SumAgg<T: Elem> {
    kind: ProductKind,
    input: Feed<T>,
    state: Option<(u64, T::Acc)>,
    emitted: bool,
    tile: Tile<T::Acc>,
    cursor: Cursor,
}

impl<T: Elem> SumAgg<T> {
    fn compute(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let mut n = 0u64;
        let mut acc = match self.kind {
            ProductKind::Sum => <T::Acc as Elem>::zero(),
            ProductKind::Prd => <T::Acc as Elem>::one(),
        };
        while let Some(v) = self.input.next_value()? {
            n += 1;
            acc = match self.kind {
                ProductKind::Sum => acc.add(v.to_acc()),
                ProductKind::Prd => acc.mul(v.to_acc()),
            };
        }
        self.state = Some((n, acc));
        Ok(())
    }
}

impl<T: Elem> SeriesIter<T::Acc> for SumAgg<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let (n, acc) = self.state.expect("aggregate state missing");
        if n == 0 {
            return Ok(false);
        }
        self.tile.clear();
        self.tile.push(acc);
        self.cursor.next_pos = 1;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.state = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<T::Acc>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<SumAgg<T>>())
            .ok_or_else(mismatched)?;
        ensure!(self.kind == other.kind, "merge of mismatched operator kinds");
        other.compute()?;
        self.compute()?;
        let (n2, acc2) = other.state.take().unwrap();
        let state = self.state.as_mut().unwrap();
        state.0 += n2;
        state.1 = match self.kind {
            ProductKind::Sum => state.1.add(acc2),
            ProductKind::Prd => state.1.mul(acc2),
        };
        Ok(())
    }

    single_value_plumbing!(T::Acc);
}

fn sum_like<T: Elem>(kind: ProductKind, input: BoxedSeries<T>) -> BoxedSeries<T::Acc> {
    let tile_size = input.tile_size();
    Box::new(SumAgg {
        kind,
        input: Feed::new(input),
        state: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    })
}

/// Sum, accumulated in the widened type (`i64`/`f64`).
pub fn sum<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T::Acc> {
    sum_like(ProductKind::Sum, input)
}

/// Product, accumulated in the widened type.
pub fn prd<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T::Acc> {
    sum_like(ProductKind::Prd, input)
}

struct ExtremumAgg<T: Elem> {
    largest: bool,
    input: Feed<T>,
    state: Option<Option<T>>,
    emitted: bool,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> ExtremumAgg<T> {
    fn better(&self, a: T, b: T) -> bool {
        if self.largest {
            a.order(b) == Ordering::Greater
        } else {
            a.order(b) == Ordering::Less
        }
    }

    fn compute(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let mut best: Option<T> = None;
        while let Some(v) = self.input.next_value()? {
            best = Some(match best {
                Some(b) if !self.better(v, b) => b,
                _ => v,
            });
        }
        self.state = Some(best);
        Ok(())
    }
}

impl<T: Elem> SeriesIter<T> for ExtremumAgg<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let Some(best) = self.state.clone().expect("aggregate state missing") else {
            return Ok(false);
        };
        self.tile.clear();
        self.tile.push(best);
        self.cursor.next_pos = 1;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.state = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<T>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<ExtremumAgg<T>>())
            .ok_or_else(mismatched)?;
        ensure!(
            self.largest == other.largest,
            "merge of mismatched operator kinds"
        );
        other.compute()?;
        self.compute()?;
        let src = other.state.take().unwrap();
        let cur = *self.state.as_ref().unwrap();
        let new = match (cur, src) {
            (Some(a), Some(b)) => Some(if self.better(b, a) { b } else { a }),
            (a, b) => a.or(b),
        };
        *self.state.as_mut().unwrap() = new;
        Ok(())
    }

    single_value_plumbing!(T);
}

fn extremum<T: Elem>(largest: bool, input: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = input.tile_size();
    Box::new(ExtremumAgg {
        largest,
        input: Feed::new(input),
        state: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    })
}

pub fn max<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    extremum(true, input)
}

pub fn min<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    extremum(false, input)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MomentKind {
    Avg,
    Var,
    Dev,
}

#[derive(Clone, Copy, Default)]
struct Moments {
    n: u64,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn push(&mut self, v: f64) {
        self.n += 1;
        self.sum += v;
        self.sum_sq += v * v;
    }

    fn fold(&mut self, other: Moments) {
        self.n += other.n;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    fn mean(&self) -> f64 {
        self.sum / self.n as f64
    }

    /// Population variance from the parallel-friendly moment sums.
    fn variance(&self) -> f64 {
        let mean = self.mean();
        (self.sum_sq / self.n as f64 - mean * mean).max(0.0)
    }
}

struct MomentAgg<T: Elem> {
    kind: MomentKind,
    input: Feed<T>,
    state: Option<Moments>,
    emitted: bool,
    tile: Tile<f64>,
    cursor: Cursor,
}

impl<T: Elem> MomentAgg<T> {
    fn compute(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let mut m = Moments::default();
        while let Some(v) = self.input.next_value()? {
            m.push(v.to_f64());
        }
        self.state = Some(m);
        Ok(())
    }
}

impl<T: Elem> SeriesIter<f64> for MomentAgg<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let m = self.state.expect("aggregate state missing");
        if m.n == 0 {
            return Ok(false);
        }
        let out = match self.kind {
            MomentKind::Avg => m.mean(),
            MomentKind::Var => m.variance(),
            MomentKind::Dev => m.variance().sqrt(),
        };
        self.tile.clear();
        self.tile.push(out);
        self.cursor.next_pos = 1;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.state = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<f64>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<MomentAgg<T>>())
            .ok_or_else(mismatched)?;
        ensure!(self.kind == other.kind, "merge of mismatched operator kinds");
        other.compute()?;
        self.compute()?;
        let src = other.state.take().unwrap();
        self.state.as_mut().unwrap().fold(src);
        Ok(())
    }

    single_value_plumbing!(f64);
}

fn moment<T: Elem>(kind: MomentKind, input: BoxedSeries<T>) -> BoxedSeries<f64> {
    let tile_size = input.tile_size();
    Box::new(MomentAgg {
        kind,
        input: Feed::new(input),
        state: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    })
}

pub fn avg<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<f64> {
    moment(MomentKind::Avg, input)
}

/// Population variance.
pub fn var<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<f64> {
    moment(MomentKind::Var, input)
}

/// Population standard deviation.
pub fn dev<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<f64> {
    moment(MomentKind::Dev, input)
}

struct TruthAgg<T: Elem> {
    conjunction: bool,
    input: Feed<T>,
    state: Option<(u64, bool)>,
    emitted: bool,
    tile: Tile<i8>,
    cursor: Cursor,
}

impl<T: Elem> TruthAgg<T> {
    fn compute(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let mut n = 0u64;
        let mut acc = self.conjunction;
        while let Some(v) = self.input.next_value()? {
            n += 1;
            if self.conjunction {
                acc = acc && v.is_true();
            } else {
                acc = acc || v.is_true();
            }
        }
        self.state = Some((n, acc));
        Ok(())
    }
}

impl<T: Elem> SeriesIter<i8> for TruthAgg<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let (n, acc) = self.state.expect("aggregate state missing");
        if n == 0 {
            return Ok(false);
        }
        self.tile.clear();
        self.tile.push(acc as i8);
        self.cursor.next_pos = 1;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.state = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<i8>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<TruthAgg<T>>())
            .ok_or_else(mismatched)?;
        ensure!(
            self.conjunction == other.conjunction,
            "merge of mismatched operator kinds"
        );
        other.compute()?;
        self.compute()?;
        let (n2, acc2) = other.state.take().unwrap();
        let state = self.state.as_mut().unwrap();
        state.0 += n2;
        // An empty shard is the identity for either connective.
        if n2 > 0 {
            state.1 = if self.conjunction {
                state.1 && acc2
            } else {
                state.1 || acc2
            };
        }
        Ok(())
    }

    single_value_plumbing!(i8);
}

fn truth<T: Elem>(conjunction: bool, input: BoxedSeries<T>) -> BoxedSeries<i8> {
    let tile_size = input.tile_size();
    Box::new(TruthAgg {
        conjunction,
        input: Feed::new(input),
        state: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    })
}

/// True when every element is truthy (nonzero).
pub fn all<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<i8> {
    truth(true, input)
}

/// True when any element is truthy.
pub fn any<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<i8> {
    truth(false, input)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PairedKind {
    WSum,
    WAvg,
    Cov,
    Corr,
}

#[derive(Clone, Copy, Default)]
struct PairedSums {
    n: u64,
    sum_x: f64,
    sum_y: f64,
    sum_xy: f64,
    sum_x_sq: f64,
    sum_y_sq: f64,
}

impl PairedSums {
    fn push(&mut self, x: f64, y: f64) {
        self.n += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xy += x * y;
        self.sum_x_sq += x * x;
        self.sum_y_sq += y * y;
    }

    fn fold(&mut self, o: PairedSums) {
        self.n += o.n;
        self.sum_x += o.sum_x;
        self.sum_y += o.sum_y;
        self.sum_xy += o.sum_xy;
        self.sum_x_sq += o.sum_x_sq;
        self.sum_y_sq += o.sum_y_sq;
    }
}

struct PairedAgg<T: Elem> {
    kind: PairedKind,
    x: Feed<T>,
    y: Feed<T>,
    state: Option<PairedSums>,
    emitted: bool,
    tile: Tile<f64>,
    cursor: Cursor,
}

impl<T: Elem> PairedAgg<T> {
    fn compute(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let mut s = PairedSums::default();
        loop {
            let Some(x) = self.x.next_value()? else { break };
            let Some(y) = self.y.next_value()? else { break };
            s.push(x.to_f64(), y.to_f64());
        }
        self.state = Some(s);
        Ok(())
    }

    fn result(&self, s: &PairedSums) -> f64 {
        let n = s.n as f64;
        match self.kind {
            PairedKind::WSum => s.sum_xy,
            PairedKind::WAvg => s.sum_xy / s.sum_y,
            PairedKind::Cov => s.sum_xy / n - (s.sum_x / n) * (s.sum_y / n),
            PairedKind::Corr => {
                let cov = s.sum_xy / n - (s.sum_x / n) * (s.sum_y / n);
                let var_x = s.sum_x_sq / n - (s.sum_x / n) * (s.sum_x / n);
                let var_y = s.sum_y_sq / n - (s.sum_y / n) * (s.sum_y / n);
                cov / (var_x.max(0.0).sqrt() * var_y.max(0.0).sqrt())
            }
        }
    }
}

impl<T: Elem> SeriesIter<f64> for PairedAgg<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let s = self.state.expect("aggregate state missing");
        if s.n == 0 {
            return Ok(false);
        }
        let out = self.result(&s);
        self.tile.clear();
        self.tile.push(out);
        self.cursor.next_pos = 1;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.x.reset()?;
        self.y.reset()?;
        self.state = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<f64>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<PairedAgg<T>>())
            .ok_or_else(mismatched)?;
        ensure!(self.kind == other.kind, "merge of mismatched operator kinds");
        other.compute()?;
        self.compute()?;
        let src = other.state.take().unwrap();
        self.state.as_mut().unwrap().fold(src);
        Ok(())
    }

    single_value_plumbing!(f64);
}

fn paired<T: Elem>(kind: PairedKind, x: BoxedSeries<T>, y: BoxedSeries<T>) -> BoxedSeries<f64> {
    let tile_size = x.tile_size();
    Box::new(PairedAgg {
        kind,
        x: Feed::new(x),
        y: Feed::new(y),
        state: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    })
}

/// Weighted sum: Σ values·weights.
pub fn wsum<T: Elem>(values: BoxedSeries<T>, weights: BoxedSeries<T>) -> BoxedSeries<f64> {
    paired(PairedKind::WSum, values, weights)
}

/// Weighted average: Σ values·weights / Σ weights.
pub fn wavg<T: Elem>(values: BoxedSeries<T>, weights: BoxedSeries<T>) -> BoxedSeries<f64> {
    paired(PairedKind::WAvg, values, weights)
}

/// Population covariance of the paired sequences.
pub fn cov<T: Elem>(x: BoxedSeries<T>, y: BoxedSeries<T>) -> BoxedSeries<f64> {
    paired(PairedKind::Cov, x, y)
}

/// Pearson correlation of the paired sequences.
pub fn corr<T: Elem>(x: BoxedSeries<T>, y: BoxedSeries<T>) -> BoxedSeries<f64> {
    paired(PairedKind::Corr, x, y)
}

struct Histogram<T: Elem> {
    input: Feed<T>,
    low: f64,
    high: f64,
    buckets: usize,
    state: Option<Vec<i64>>,
    emitted: bool,
    tile: Tile<i64>,
    cursor: Cursor,
}

impl<T: Elem> Histogram<T> {
    fn compute(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let mut counts = vec![0i64; self.buckets];
        let width = (self.high - self.low) / self.buckets as f64;
        while let Some(v) = self.input.next_value()? {
            let idx = ((v.to_f64() - self.low) / width).floor();
            let idx = (idx as i64).clamp(0, self.buckets as i64 - 1) as usize;
            counts[idx] += 1;
        }
        self.state = Some(counts);
        Ok(())
    }
}

impl<T: Elem> SeriesIter<i64> for Histogram<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        self.tile.clear();
        for &c in self.state.as_ref().expect("aggregate state missing") {
            self.tile.push(c);
        }
        self.cursor.next_pos = self.tile.len() as u64;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.state = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<i64>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<Histogram<T>>())
            .ok_or_else(mismatched)?;
        ensure!(
            self.buckets == other.buckets && self.low == other.low && self.high == other.high,
            "merge of histograms with different bucketing"
        );
        other.compute()?;
        self.compute()?;
        let src = other.state.take().unwrap();
        let dst = self.state.as_mut().unwrap();
        for (d, s) in dst.iter_mut().zip(src) {
            *d += s;
        }
        Ok(())
    }

    single_value_plumbing!(i64);
}

/// Bucket counts of values over `[low, high)` split into `buckets` equal
/// intervals; out-of-range values clamp into the edge buckets.
pub fn histogram<T: Elem>(
    input: BoxedSeries<T>,
    low: T,
    high: T,
    buckets: usize,
) -> Result<BoxedSeries<i64>> {
    let tile_size = input.tile_size();
    ensure!(
        buckets >= 1 && buckets <= tile_size,
        "histogram interval count {} out of range 1..={}",
        buckets,
        tile_size
    );
    ensure!(
        low.order(high) == Ordering::Less,
        "histogram bounds are empty or inverted"
    );
    Ok(Box::new(Histogram {
        input: Feed::new(input),
        low: low.to_f64(),
        high: high.to_f64(),
        buckets,
        state: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(buckets as u64),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops::from_vec;

    fn single<T: Elem>(series: &mut BoxedSeries<T>) -> T {
        let all = to_array(series.as_mut()).unwrap();
        assert_eq!(all.len(), 1);
        all[0]
    }

    #[test]
    fn basic_aggregates() {
        assert_eq!(single(&mut count(from_vec(vec![1i32, 2, 3], 4))), 3);
        assert_eq!(single(&mut sum(from_vec(vec![1i32, 2, 3], 4))), 6i64);
        assert_eq!(single(&mut prd(from_vec(vec![2i32, 3, 4], 4))), 24i64);
        assert_eq!(single(&mut max(from_vec(vec![5i32, 9, 1], 4))), 9);
        assert_eq!(single(&mut min(from_vec(vec![5i32, 9, 1], 4))), 1);
        assert_eq!(single(&mut avg(from_vec(vec![1.0f64, 2.0, 3.0], 4))), 2.0);
    }

    #[test]
    fn variance_is_population_variance() {
        let v = single(&mut var(from_vec(vec![2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 4)));
        assert!((v - 4.0).abs() < 1e-12);
        let d = single(&mut dev(from_vec(vec![2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 4)));
        assert!((d - 2.0).abs() < 1e-12);
    }

    #[test]
    fn truth_aggregates() {
        assert_eq!(single(&mut all(from_vec(vec![1i8, 1, 1], 4))), 1);
        assert_eq!(single(&mut all(from_vec(vec![1i8, 0, 1], 4))), 0);
        assert_eq!(single(&mut any(from_vec(vec![0i8, 0, 1], 4))), 1);
        assert_eq!(single(&mut any(from_vec(vec![0i8, 0], 4))), 0);
    }

    #[test]
    fn weighted_and_paired_aggregates() {
        let w = single(&mut wsum(
            from_vec(vec![1.0f64, 2.0, 3.0], 4),
            from_vec(vec![10.0f64, 20.0, 30.0], 4),
        ));
        assert_eq!(w, 140.0);

        let wa = single(&mut wavg(
            from_vec(vec![1.0f64, 2.0, 3.0], 4),
            from_vec(vec![1.0f64, 1.0, 2.0], 4),
        ));
        assert!((wa - 2.25).abs() < 1e-12);

        // Perfectly linear relationship: correlation exactly 1.
        let c = single(&mut corr(
            from_vec(vec![1.0f64, 2.0, 3.0, 4.0], 4),
            from_vec(vec![2.0f64, 4.0, 6.0, 8.0], 4),
        ));
        assert!((c - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_input_emits_nothing_except_count() {
        let mut c = count(from_vec(Vec::<i32>::new(), 4));
        assert_eq!(single(&mut c), 0);

        let mut s = sum(from_vec(Vec::<i32>::new(), 4));
        assert!(to_array(s.as_mut()).unwrap().is_empty());

        let mut m = max(from_vec(Vec::<f64>::new(), 4));
        assert!(to_array(m.as_mut()).unwrap().is_empty());
    }

    #[test]
    fn merge_equals_single_threaded_result() {
        // Sharded sum/var over [0, 100) in three uneven pieces.
        let data: Vec<f64> = (0..100).map(|i| (i * 7 % 13) as f64).collect();
        let shards = [&data[..20], &data[20..70], &data[70..]];

        let mut whole = var(from_vec(data.clone(), 8));
        let expected = single(&mut whole);

        let mut acc = var(from_vec(shards[0].to_vec(), 8));
        acc.prepare().unwrap();
        for shard in &shards[1..] {
            let mut part = var(from_vec(shard.to_vec(), 8));
            part.prepare().unwrap();
            acc.merge(part.as_mut()).unwrap();
        }
        let merged = single(&mut acc);
        assert!((merged - expected).abs() < 1e-9);
    }

    #[test]
    fn merge_rejects_mismatched_kinds() {
        let mut a = sum(from_vec(vec![1i32], 4));
        let mut b = prd(from_vec(vec![2i32], 4));
        a.prepare().unwrap();
        b.prepare().unwrap();
        assert!(a.merge(b.as_mut()).is_err());
    }

    #[test]
    fn histogram_clamps_out_of_range_values() {
        let input = from_vec(vec![-5.0f64, 0.5, 1.5, 2.5, 99.0], 8);
        let mut h = histogram(input, 0.0, 3.0, 3).unwrap();
        assert_eq!(to_array(h.as_mut()).unwrap(), vec![2, 1, 2]);
    }

    #[test]
    fn histogram_merge_adds_buckets() {
        let mut a = histogram(from_vec(vec![0.5f64, 1.5], 8), 0.0, 2.0, 2).unwrap();
        let mut b = histogram(from_vec(vec![0.1f64, 0.2], 8), 0.0, 2.0, 2).unwrap();
        a.prepare().unwrap();
        b.prepare().unwrap();
        a.merge(b.as_mut()).unwrap();
        assert_eq!(to_array(a.as_mut()).unwrap(), vec![3, 1]);
    }
}
