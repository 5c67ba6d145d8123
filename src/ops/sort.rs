//! # Sort, Rank and Quantile
//!
//! Every operator here materializes its whole upstream into a flat buffer —
//! the deliberate full-materialization point of the engine — and then works
//! through an index **permutation** array; the value buffer itself is never
//! reordered.
//!
//! ## The Sort Algorithm
//!
//! Introspective quicksort over the permutation:
//!
//! - three-way (fat-pivot) partitioning around a median-of-three pivot
//!   drawn with the engine's own seeded linear-congruential generator
//! - recursion degrades to heapsort past a depth bound of
//!   `2·⌈log2(n/4)⌉ + 4`, guaranteeing O(n log n) worst case
//! - partitions of at most 50 elements are left for one terminal
//!   insertion-sort pass
//! - fully sorted and fully reverse-sorted inputs are detected in O(n) and
//!   short-circuited
//!
//! ## Derived Operators
//!
//! `rank` and `dense_rank` walk the same ascending permutation, assigning
//! tied elements equal rank (competition ranking with gaps, or compacted
//! dense ranks), and emit ranks in the ORIGINAL element order. `quantile`
//! and `median` index the permutation directly — nearest order statistics,
//! with `median` averaging the middle pair on even counts.

use std::cmp::Ordering;

use eyre::{ensure, Result};

use crate::iter::{to_array, BoxedSeries, Cursor, SeriesIter, Tile};
use crate::types::Elem;

const INSERTION_THRESHOLD: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Seeded linear-congruential generator for pivot selection; deterministic
/// so sorts reproduce exactly across runs.
struct Lcg(u64);

impl Lcg {
    fn new() -> Self {
        Lcg(0x853c_49e6_748f_ea9b)
    }

    fn below(&mut self, n: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % n
    }
}

fn insertion_sort<F: Fn(u32, u32) -> Ordering>(s: &mut [u32], cmp: &F) {
    for i in 1..s.len() {
        let mut j = i;
        while j > 0 && cmp(s[j - 1], s[j]) == Ordering::Greater {
            s.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn heapsort<F: Fn(u32, u32) -> Ordering>(s: &mut [u32], cmp: &F) {
    fn sift_down<F: Fn(u32, u32) -> Ordering>(s: &mut [u32], mut root: usize, end: usize, cmp: &F) {
        loop {
            let mut child = 2 * root + 1;
            if child >= end {
                return;
            }
            if child + 1 < end && cmp(s[child], s[child + 1]) == Ordering::Less {
                child += 1;
            }
            if cmp(s[root], s[child]) == Ordering::Less {
                s.swap(root, child);
                root = child;
            } else {
                return;
            }
        }
    }

    let n = s.len();
    for root in (0..n / 2).rev() {
        sift_down(s, root, n, cmp);
    }
    for end in (1..n).rev() {
        s.swap(0, end);
        sift_down(s, 0, end, cmp);
    }
}

/// Fat-pivot partition: afterwards `s[..lt] < pivot`, `s[lt..gt] == pivot`,
/// `s[gt..] > pivot`. The pivot names a value in the (unmoved) data buffer,
/// so swapping permutation entries never invalidates it.
fn partition3<F: Fn(u32, u32) -> Ordering>(s: &mut [u32], pivot: u32, cmp: &F) -> (usize, usize) {
    let mut lt = 0;
    let mut i = 0;
    let mut gt = s.len();
    while i < gt {
        match cmp(s[i], pivot) {
            Ordering::Less => {
                s.swap(lt, i);
                lt += 1;
                i += 1;
            }
            Ordering::Greater => {
                gt -= 1;
                s.swap(i, gt);
            }
            Ordering::Equal => i += 1,
        }
    }
    (lt, gt)
}

fn median_of_three<F: Fn(u32, u32) -> Ordering>(s: &[u32], cmp: &F, rng: &mut Lcg) -> u32 {
    let n = s.len();
    let (a, b, c) = (s[rng.below(n)], s[rng.below(n)], s[rng.below(n)]);
    if cmp(a, b) == Ordering::Less {
        if cmp(b, c) == Ordering::Less {
            b
        } else if cmp(a, c) == Ordering::Less {
            c
        } else {
            a
        }
    } else if cmp(a, c) == Ordering::Less {
        a
    } else if cmp(b, c) == Ordering::Less {
        c
    } else {
        b
    }
}

fn introsort_rec<F: Fn(u32, u32) -> Ordering>(
    mut s: &mut [u32],
    cmp: &F,
    mut depth: usize,
    rng: &mut Lcg,
) {
    while s.len() > INSERTION_THRESHOLD {
        if depth == 0 {
            heapsort(s, cmp);
            return;
        }
        depth -= 1;
        let pivot = median_of_three(s, cmp, rng);
        let (lt, gt) = partition3(s, pivot, cmp);
        let len = s.len();
        // Recurse into the smaller outer region, iterate on the larger.
        if lt <= len - gt {
            let (left, rest) = s.split_at_mut(lt);
            introsort_rec(left, cmp, depth, rng);
            s = &mut rest[gt - lt..];
        } else {
            let (left, right) = s.split_at_mut(gt);
            introsort_rec(right, cmp, depth, rng);
            s = &mut left[..lt];
        }
    }
}

/// Sorting permutation of `data` under the given order. The returned
/// indices enumerate `data` in sorted order; `data` itself is untouched.
fn sort_permutation<T: Elem>(data: &[T], order: SortOrder) -> Vec<u32> {
    let n = data.len();
    let mut perm: Vec<u32> = (0..n as u32).collect();
    if n < 2 {
        return perm;
    }

    let cmp = move |a: u32, b: u32| -> Ordering {
        let ord = data[a as usize].order(data[b as usize]);
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    };

    if (1..n).all(|i| cmp((i - 1) as u32, i as u32) != Ordering::Greater) {
        return perm;
    }
    if (1..n).all(|i| cmp((i - 1) as u32, i as u32) != Ordering::Less) {
        perm.reverse();
        return perm;
    }

    let quarter = (n / 4).max(1);
    let ceil_log = (usize::BITS - (quarter - 1).leading_zeros()) as usize;
    let depth_limit = 2 * ceil_log + 4;
    let mut rng = Lcg::new();
    introsort_rec(&mut perm, &cmp, depth_limit, &mut rng);
    insertion_sort(&mut perm, &cmp);
    perm
}

struct Sorted<T: Elem> {
    input: BoxedSeries<T>,
    order: SortOrder,
    state: Option<(Vec<T>, Vec<u32>)>,
    pos: usize,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> Sorted<T> {
    fn compute(&mut self) -> Result<()> {
        if self.state.is_none() {
            let data = to_array(self.input.as_mut())?;
            let perm = sort_permutation(&data, self.order);
            self.state = Some((data, perm));
        }
        Ok(())
    }
}

impl<T: Elem> SeriesIter<T> for Sorted<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        let (data, perm) = self.state.as_ref().expect("sort state missing");
        if self.pos >= perm.len() {
            return Ok(false);
        }
        let take = self.tile.cap().min(perm.len() - self.pos);
        self.tile.clear();
        for &idx in &perm[self.pos..self.pos + take] {
            self.tile.push(data[idx as usize]);
        }
        self.pos += take;
        self.cursor.next_pos += take as u64;
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
        self.input.reset()?;
        self.state = None;
        self.pos = 0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Sorts the whole sequence (materializing it).
pub fn sort<T: Elem>(input: BoxedSeries<T>, order: SortOrder) -> BoxedSeries<T> {
    let tile_size = input.tile_size();
    Box::new(Sorted {
        input,
        order,
        state: None,
        pos: 0,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct Ranked<T: Elem> {
    input: BoxedSeries<T>,
    dense: bool,
    ranks: Option<Vec<i64>>,
    pos: usize,
    tile: Tile<i64>,
    cursor: Cursor,
}

impl<T: Elem> Ranked<T> {
    fn compute(&mut self) -> Result<()> {
        if self.ranks.is_some() {
            return Ok(());
        }
        let data = to_array(self.input.as_mut())?;
        let perm = sort_permutation(&data, SortOrder::Asc);
        let mut ranks = vec![0i64; data.len()];
        let mut i = 0;
        let mut dense_rank = 0i64;
        while i < perm.len() {
            // One run of equal values shares one rank.
            let mut j = i;
            while j + 1 < perm.len()
                && data[perm[j + 1] as usize].order(data[perm[i] as usize]) == Ordering::Equal
            {
                j += 1;
            }
            dense_rank += 1;
            let rank = if self.dense { dense_rank } else { i as i64 + 1 };
            for &p in &perm[i..=j] {
                ranks[p as usize] = rank;
            }
            i = j + 1;
        }
        self.ranks = Some(ranks);
        Ok(())
    }
}

impl<T: Elem> SeriesIter<i64> for Ranked<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        let ranks = self.ranks.as_ref().expect("rank state missing");
        if self.pos >= ranks.len() {
            return Ok(false);
        }
        let take = self.tile.cap().min(ranks.len() - self.pos);
        self.tile.clear();
        for &r in &ranks[self.pos..self.pos + take] {
            self.tile.push(r);
        }
        self.pos += take;
        self.cursor.next_pos += take as u64;
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
        self.input.reset()?;
        self.ranks = None;
        self.pos = 0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Competition rank of every element (ties share the lowest rank, gaps
/// follow), in original element order.
pub fn rank<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<i64> {
    let tile_size = input.tile_size();
    Box::new(Ranked {
        input,
        dense: false,
        ranks: None,
        pos: 0,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

/// Dense rank: ties share a rank and ranks are gapless.
pub fn dense_rank<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<i64> {
    let tile_size = input.tile_size();
    Box::new(Ranked {
        input,
        dense: true,
        ranks: None,
        pos: 0,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct Quantile<T: Elem> {
    input: BoxedSeries<T>,
    q: f64,
    value: Option<Option<T>>,
    emitted: bool,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for Quantile<T> {
    fn next(&mut self) -> Result<bool> {
        if self.value.is_none() {
            let data = to_array(self.input.as_mut())?;
            let perm = sort_permutation(&data, SortOrder::Asc);
            self.value = Some(if data.is_empty() {
                None
            } else {
                let idx = (self.q * (data.len() - 1) as f64).round() as usize;
                Some(data[perm[idx] as usize])
            });
        }
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let Some(v) = self.value.expect("quantile state missing") else {
            return Ok(false);
        };
        self.tile.clear();
        self.tile.push(v);
        self.cursor.next_pos = 1;
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
        self.input.reset()?;
        self.value = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// The nearest order statistic at quantile `q ∈ [0, 1]`.
pub fn quantile<T: Elem>(input: BoxedSeries<T>, q: f64) -> Result<BoxedSeries<T>> {
    ensure!((0.0..=1.0).contains(&q), "quantile {} outside [0, 1]", q);
    let tile_size = input.tile_size();
    Ok(Box::new(Quantile {
        input,
        q,
        value: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    }))
}

struct Median<T: Elem> {
    input: BoxedSeries<T>,
    value: Option<Option<f64>>,
    emitted: bool,
    tile: Tile<f64>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<f64> for Median<T> {
    fn next(&mut self) -> Result<bool> {
        if self.value.is_none() {
            let data = to_array(self.input.as_mut())?;
            let perm = sort_permutation(&data, SortOrder::Asc);
            self.value = Some(if data.is_empty() {
                None
            } else if data.len() % 2 == 1 {
                Some(data[perm[data.len() / 2] as usize].to_f64())
            } else {
                let lo = data[perm[data.len() / 2 - 1] as usize].to_f64();
                let hi = data[perm[data.len() / 2] as usize].to_f64();
                Some((lo + hi) / 2.0)
            });
        }
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let Some(v) = self.value.expect("median state missing") else {
            return Ok(false);
        };
        self.tile.clear();
        self.tile.push(v);
        self.cursor.next_pos = 1;
        Ok(true)
    }

    fn tile(&self) -> &[f64] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.value = None;
        self.emitted = false;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Median; averages the two middle order statistics on even counts.
pub fn median<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<f64> {
    let tile_size = input.tile_size();
    Box::new(Median {
        input,
        value: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    })
}

struct Reversed<T: Elem> {
    input: BoxedSeries<T>,
    data: Option<Vec<T>>,
    emitted: usize,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for Reversed<T> {
    fn next(&mut self) -> Result<bool> {
        if self.data.is_none() {
            self.data = Some(to_array(self.input.as_mut())?);
        }
        let data = self.data.as_ref().expect("reverse state missing");
        let remaining = data.len() - self.emitted;
        if remaining == 0 {
            return Ok(false);
        }
        let take = self.tile.cap().min(remaining);
        self.tile.clear();
        for i in 0..take {
            self.tile.push(data[data.len() - 1 - self.emitted - i]);
        }
        self.emitted += take;
        self.cursor.next_pos += take as u64;
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
        self.input.reset()?;
        self.data = None;
        self.emitted = 0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// The sequence in reverse order (materializing).
pub fn reverse<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = input.tile_size();
    Box::new(Reversed {
        input,
        data: None,
        emitted: 0,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}
