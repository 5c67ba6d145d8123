//! # Windowed and Cumulative Aggregates
//!
//! Sliding-window aggregates maintain a circular history of the last
//! `interval` raw values plus an incremental accumulator, producing one
//! output per input element. Windows at the start of the sequence are
//! partial: they aggregate only the elements seen so far, so
//! `window_sum([1,2,3,4,5], 3)` is `[1,3,6,9,12]`.
//!
//! `window_min`/`window_max` keep the current extremum incrementally and
//! rescan the window only when the evicted element equals it — amortized
//! cheap, worst case O(interval) on ties.
//!
//! `window_ema` uses the standard smoothing factor `α = 2/(interval+1)`;
//! `window_atr` uses Wilder's recurrence `atr = (atr·(n-1) + v)/n`, both
//! seeded with the first element.
//!
//! Cumulative aggregates (`cum_*`) are the unbounded-window analogs: a
//! running accumulator, one output per input, no history buffer.

use std::cmp::Ordering;

use eyre::{ensure, Result};

use crate::iter::{BoxedSeries, Cursor, SeriesIter, Tile};
use crate::types::{convert, Elem};

/// Fixed-capacity circular history buffer.
struct Ring<T> {
    buf: Vec<T>,
    cap: usize,
    head: usize,
}

impl<T: Copy> Ring<T> {
    fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap.min(1 << 20)),
            cap,
            head: 0,
        }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    /// Appends `v`, returning the evicted element once the window is full.
    fn push(&mut self, v: T) -> Option<T> {
        if self.buf.len() < self.cap {
            self.buf.push(v);
            return None;
        }
        let evicted = std::mem::replace(&mut self.buf[self.head], v);
        self.head = (self.head + 1) % self.cap;
        Some(evicted)
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
    }
}

macro_rules! tile_plumbing {
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
    };
}

struct WindowSum<T: Elem> {
    input: BoxedSeries<T>,
    window: Ring<T>,
    acc: T::Acc,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for WindowSum<T> {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        for &v in self.input.tile() {
            self.acc = self.acc.add(v.to_acc());
            if let Some(evicted) = self.window.push(v) {
                self.acc = self.acc.sub(evicted.to_acc());
            }
            self.tile.push(convert::<T::Acc, T>(self.acc));
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.window.clear();
        self.acc = <T::Acc as Elem>::zero();
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    tile_plumbing!(T);
}

/// Sliding-window sum over the last `interval` elements.
pub fn window_sum<T: Elem>(input: BoxedSeries<T>, interval: usize) -> Result<BoxedSeries<T>> {
    ensure!(interval >= 1, "window interval must be at least 1");
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Ok(Box::new(WindowSum {
        input,
        window: Ring::new(interval),
        acc: <T::Acc as Elem>::zero(),
        tile: Tile::new(tile_size),
        cursor,
    }))
}

struct WindowExtreme<T: Elem> {
    largest: bool,
    input: BoxedSeries<T>,
    window: Ring<T>,
    best: Option<T>,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> WindowExtreme<T> {
    fn better(&self, a: T, b: T) -> bool {
        if self.largest {
            a.order(b) == Ordering::Greater
        } else {
            a.order(b) == Ordering::Less
        }
    }

    fn rescan(&mut self) {
        let mut best: Option<T> = None;
        for &v in self.window.iter() {
            best = Some(match best {
                Some(b) if !self.better(v, b) => b,
                _ => v,
            });
        }
        self.best = best;
    }
}

impl<T: Elem> SeriesIter<T> for WindowExtreme<T> {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        let tile_len = self.input.tile().len();
        for i in 0..tile_len {
            let v = self.input.tile()[i];
            let evicted = self.window.push(v);
            match self.best {
                Some(b) if self.better(v, b) => self.best = Some(v),
                None => self.best = Some(v),
                _ => {}
            }
            if let Some(e) = evicted {
                // Only an evicted extremum can invalidate the cached best.
                if e.order(self.best.expect("window extremum missing")) == Ordering::Equal
                    && e.order(v) != Ordering::Equal
                {
                    self.rescan();
                }
            }
            self.tile.push(self.best.expect("window extremum missing"));
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.window.clear();
        self.best = None;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    tile_plumbing!(T);
}

fn window_extreme<T: Elem>(
    input: BoxedSeries<T>,
    interval: usize,
    largest: bool,
) -> Result<BoxedSeries<T>> {
    ensure!(interval >= 1, "window interval must be at least 1");
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Ok(Box::new(WindowExtreme {
        largest,
        input,
        window: Ring::new(interval),
        best: None,
        tile: Tile::new(tile_size),
        cursor,
    }))
}

pub fn window_max<T: Elem>(input: BoxedSeries<T>, interval: usize) -> Result<BoxedSeries<T>> {
    window_extreme(input, interval, true)
}

pub fn window_min<T: Elem>(input: BoxedSeries<T>, interval: usize) -> Result<BoxedSeries<T>> {
    window_extreme(input, interval, false)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MomentKind {
    Avg,
    Var,
    Dev,
}

struct WindowMoment<T: Elem> {
    kind: MomentKind,
    input: BoxedSeries<T>,
    window: Ring<f64>,
    sum: f64,
    sum_sq: f64,
    tile: Tile<f64>,
    cursor: Cursor,
}

impl<T: Elem> WindowMoment<T> {
    fn current(&self) -> f64 {
        let n = self.window.len() as f64;
        let mean = self.sum / n;
        match self.kind {
            MomentKind::Avg => mean,
            MomentKind::Var => (self.sum_sq / n - mean * mean).max(0.0),
            MomentKind::Dev => (self.sum_sq / n - mean * mean).max(0.0).sqrt(),
        }
    }
}

impl<T: Elem> SeriesIter<f64> for WindowMoment<T> {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        for &v in self.input.tile() {
            let x = v.to_f64();
            self.sum += x;
            self.sum_sq += x * x;
            if let Some(e) = self.window.push(x) {
                self.sum -= e;
                self.sum_sq -= e * e;
            }
            self.tile.push(self.current());
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.window.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    tile_plumbing!(f64);
}

fn window_moment<T: Elem>(
    input: BoxedSeries<T>,
    interval: usize,
    kind: MomentKind,
) -> Result<BoxedSeries<f64>> {
    ensure!(interval >= 1, "window interval must be at least 1");
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Ok(Box::new(WindowMoment::<T> {
        kind,
        input,
        window: Ring::new(interval),
        sum: 0.0,
        sum_sq: 0.0,
        tile: Tile::new(tile_size),
        cursor,
    }))
}

pub fn window_avg<T: Elem>(input: BoxedSeries<T>, interval: usize) -> Result<BoxedSeries<f64>> {
    window_moment(input, interval, MomentKind::Avg)
}

pub fn window_var<T: Elem>(input: BoxedSeries<T>, interval: usize) -> Result<BoxedSeries<f64>> {
    window_moment(input, interval, MomentKind::Var)
}

pub fn window_dev<T: Elem>(input: BoxedSeries<T>, interval: usize) -> Result<BoxedSeries<f64>> {
    window_moment(input, interval, MomentKind::Dev)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SmoothKind {
    Ema,
    Atr,
}

struct WindowSmooth<T: Elem> {
    kind: SmoothKind,
    interval: usize,
    input: BoxedSeries<T>,
    prev: Option<f64>,
    tile: Tile<f64>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<f64> for WindowSmooth<T> {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        for &v in self.input.tile() {
            let x = v.to_f64();
            let out = match (self.prev, self.kind) {
                (None, _) => x,
                (Some(prev), SmoothKind::Ema) => {
                    let alpha = 2.0 / (self.interval as f64 + 1.0);
                    alpha * x + (1.0 - alpha) * prev
                }
                (Some(prev), SmoothKind::Atr) => {
                    let n = self.interval as f64;
                    (prev * (n - 1.0) + x) / n
                }
            };
            self.prev = Some(out);
            self.tile.push(out);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.prev = None;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    tile_plumbing!(f64);
}

fn window_smooth<T: Elem>(
    input: BoxedSeries<T>,
    interval: usize,
    kind: SmoothKind,
) -> Result<BoxedSeries<f64>> {
    ensure!(interval >= 1, "window interval must be at least 1");
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Ok(Box::new(WindowSmooth {
        kind,
        interval,
        input,
        prev: None,
        tile: Tile::new(tile_size),
        cursor,
    }))
}

/// Exponential moving average with `α = 2/(interval+1)`.
pub fn window_ema<T: Elem>(input: BoxedSeries<T>, interval: usize) -> Result<BoxedSeries<f64>> {
    window_smooth(input, interval, SmoothKind::Ema)
}

/// Wilder-smoothed average true range.
pub fn window_atr<T: Elem>(input: BoxedSeries<T>, interval: usize) -> Result<BoxedSeries<f64>> {
    window_smooth(input, interval, SmoothKind::Atr)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RunningKind {
    Sum,
    Prd,
    Max,
    Min,
}

struct CumRunning<T: Elem> {
    kind: RunningKind,
    input: BoxedSeries<T>,
    acc: Option<T::Acc>,
    best: Option<T>,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for CumRunning<T> {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        for &v in self.input.tile() {
            let out = match self.kind {
                RunningKind::Sum | RunningKind::Prd => {
                    let acc = match self.acc {
                        Some(acc) if self.kind == RunningKind::Sum => acc.add(v.to_acc()),
                        Some(acc) => acc.mul(v.to_acc()),
                        None => v.to_acc(),
                    };
                    self.acc = Some(acc);
                    convert::<T::Acc, T>(acc)
                }
                RunningKind::Max => {
                    let best = match self.best {
                        Some(b) if b.order(v) != Ordering::Less => b,
                        _ => v,
                    };
                    self.best = Some(best);
                    best
                }
                RunningKind::Min => {
                    let best = match self.best {
                        Some(b) if b.order(v) != Ordering::Greater => b,
                        _ => v,
                    };
                    self.best = Some(best);
                    best
                }
            };
            self.tile.push(out);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.acc = None;
        self.best = None;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    tile_plumbing!(T);
}

fn cum_running<T: Elem>(input: BoxedSeries<T>, kind: RunningKind) -> BoxedSeries<T> {
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Box::new(CumRunning {
        kind,
        input,
        acc: None,
        best: None,
        tile: Tile::new(tile_size),
        cursor,
    })
}

pub fn cum_sum<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    cum_running(input, RunningKind::Sum)
}

pub fn cum_prd<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    cum_running(input, RunningKind::Prd)
}

pub fn cum_max<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    cum_running(input, RunningKind::Max)
}

pub fn cum_min<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    cum_running(input, RunningKind::Min)
}

struct CumMoment<T: Elem> {
    kind: MomentKind,
    input: BoxedSeries<T>,
    n: u64,
    sum: f64,
    sum_sq: f64,
    tile: Tile<f64>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<f64> for CumMoment<T> {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        for &v in self.input.tile() {
            let x = v.to_f64();
            self.n += 1;
            self.sum += x;
            self.sum_sq += x * x;
            let n = self.n as f64;
            let mean = self.sum / n;
            let out = match self.kind {
                MomentKind::Avg => mean,
                MomentKind::Var => (self.sum_sq / n - mean * mean).max(0.0),
                MomentKind::Dev => (self.sum_sq / n - mean * mean).max(0.0).sqrt(),
            };
            self.tile.push(out);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.n = 0;
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    tile_plumbing!(f64);
}

fn cum_moment<T: Elem>(input: BoxedSeries<T>, kind: MomentKind) -> BoxedSeries<f64> {
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Box::new(CumMoment::<T> {
        kind,
        input,
        n: 0,
        sum: 0.0,
        sum_sq: 0.0,
        tile: Tile::new(tile_size),
        cursor,
    })
}

pub fn cum_avg<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<f64> {
    cum_moment(input, MomentKind::Avg)
}

pub fn cum_var<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<f64> {
    cum_moment(input, MomentKind::Var)
}

pub fn cum_dev<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<f64> {
    cum_moment(input, MomentKind::Dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops::from_vec;

    #[test]
    fn window_sum_with_partial_start() {
        let input = from_vec(vec![1i32, 2, 3, 4, 5], 2);
        let mut out = window_sum(input, 3).unwrap();
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1, 3, 6, 9, 12]);
    }

    #[test]
    fn window_min_rescans_on_extremum_eviction() {
        let input = from_vec(vec![5i32, 1, 4, 6, 7, 2], 3);
        let mut out = window_min(input, 3).unwrap();
        // Window contents: [5] [5,1] [5,1,4] [1,4,6] [4,6,7] [6,7,2]
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![5, 1, 1, 1, 4, 2]);
    }

    #[test]
    fn window_max_tracks_duplicated_extremes() {
        let input = from_vec(vec![3i64, 3, 1, 0], 4);
        let mut out = window_max(input, 2).unwrap();
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![3, 3, 3, 1]);
    }

    #[test]
    fn window_avg_over_partial_and_full_windows() {
        let input = from_vec(vec![2.0f64, 4.0, 6.0, 8.0], 4);
        let out = to_array(window_avg(input, 2).unwrap().as_mut()).unwrap();
        assert_eq!(out, vec![2.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn ema_starts_at_first_value() {
        let input = from_vec(vec![10.0f64, 20.0], 4);
        let out = to_array(window_ema(input, 3).unwrap().as_mut()).unwrap();
        assert_eq!(out[0], 10.0);
        // alpha = 0.5: 0.5*20 + 0.5*10
        assert_eq!(out[1], 15.0);
    }

    #[test]
    fn atr_applies_wilder_smoothing() {
        let input = from_vec(vec![10.0f64, 20.0, 30.0], 4);
        let out = to_array(window_atr(input, 2).unwrap().as_mut()).unwrap();
        assert_eq!(out, vec![10.0, 15.0, 22.5]);
    }

    #[test]
    fn cumulative_aggregates_run_over_the_whole_prefix() {
        let input = from_vec(vec![1i32, 2, 3], 4);
        assert_eq!(to_array(cum_sum(input).as_mut()).unwrap(), vec![1, 3, 6]);

        let input = from_vec(vec![2i64, 3, 4], 4);
        assert_eq!(to_array(cum_prd(input).as_mut()).unwrap(), vec![2, 6, 24]);

        let input = from_vec(vec![3i32, 1, 2], 4);
        assert_eq!(to_array(cum_min(input).as_mut()).unwrap(), vec![3, 1, 1]);

        let input = from_vec(vec![1.0f64, 3.0], 4);
        assert_eq!(to_array(cum_avg(input).as_mut()).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let input = from_vec(vec![1i32], 4);
        assert!(window_sum(input, 0).is_err());
    }
}
