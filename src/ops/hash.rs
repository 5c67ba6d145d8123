//! # Hash Aggregation
//!
//! Unordered group-by: a hash table keyed by the group key accumulates one
//! aggregate state per distinct key, then two paired output iterators — the
//! keys and the aggregated values — walk one shared snapshot of the table
//! in lock-step. Group output order is unspecified (hash order); sort the
//! outputs when a deterministic order is needed.
//!
//! ## Shared Table Protocol
//!
//! The table is built once — by `prepare()` during parallel execution, or
//! lazily on the first `next()` of either output — and then published as an
//! immutable snapshot both outputs iterate. Pulling keys and values
//! alternately therefore always yields matching pairs.
//!
//! ## Merge Semantics
//!
//! Worker-local tables merge by move: the source table is drained and each
//! entry is inserted-or-combined into the destination. No entry is ever
//! shared between two tables, so merging cannot alias accumulator state.
//!
//! ## Hashing
//!
//! Keys hash with Murmur3-32 over their little-endian bytes, plugged into
//! `hashbrown` through a custom `BuildHasher`. Float keys compare and hash
//! by bit pattern.
//!
//! ## Approximate Distinct Count
//!
//! `approx_distinct_count` estimates cardinality Flajolet-Martin style: 128
//! buckets (hash bits 25) each track the maximum trailing-zero run of
//! Murmur3 hashes routed to them, with linear counting below 2.5·m and the
//! exponential large-range correction. Merging is bucket-wise max, so the
//! estimator shards perfectly.

use std::any::Any;
use std::cmp::Ordering;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use eyre::{eyre, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::iter::{BoxedSeries, Cursor, Feed, SeriesIter, Tile};
use crate::types::Elem;

/// Murmur3 32-bit hash.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes(chunk.try_into().expect("4-byte chunk"));
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, &b) in tail.iter().enumerate() {
            k ^= (b as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

const MURMUR_SEED: u32 = 0x9747_b28c;

#[derive(Default)]
pub struct MurmurHasher {
    buf: SmallVec<[u8; 16]>,
}

impl Hasher for MurmurHasher {
    fn finish(&self) -> u64 {
        murmur3_32(&self.buf, MURMUR_SEED) as u64
    }

    fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

#[derive(Default, Clone)]
pub struct MurmurBuildHasher;

impl BuildHasher for MurmurBuildHasher {
    type Hasher = MurmurHasher;

    fn build_hasher(&self) -> MurmurHasher {
        MurmurHasher::default()
    }
}

/// Hash-table key wrapper: equality and hashing by element byte pattern.
#[derive(Clone, Copy)]
struct HKey<K: Elem>(K);

impl<K: Elem> PartialEq for HKey<K> {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }
}

impl<K: Elem> Eq for HKey<K> {}

impl<K: Elem> Hash for HKey<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.0.as_bytes());
    }
}

#[derive(Clone, Copy)]
struct GroupAgg<T: Elem> {
    n: i64,
    sum: T::Acc,
    min: T,
    max: T,
}

impl<T: Elem> GroupAgg<T> {
    fn first(v: T) -> Self {
        Self {
            n: 1,
            sum: v.to_acc(),
            min: v,
            max: v,
        }
    }

    fn push(&mut self, v: T) {
        self.n += 1;
        self.sum = self.sum.add(v.to_acc());
        if v.order(self.min) == Ordering::Less {
            self.min = v;
        }
        if v.order(self.max) == Ordering::Greater {
            self.max = v;
        }
    }

    fn combine(&mut self, o: GroupAgg<T>) {
        self.n += o.n;
        self.sum = self.sum.add(o.sum);
        if o.min.order(self.min) == Ordering::Less {
            self.min = o.min;
        }
        if o.max.order(self.max) == Ordering::Greater {
            self.max = o.max;
        }
    }
}

type Table<T, K> = HashMap<HKey<K>, GroupAgg<T>, MurmurBuildHasher>;

struct HashShared<T: Elem, K: Elem> {
    keys_in: Feed<K>,
    /// `None` for key-only aggregation (count).
    values_in: Option<Feed<T>>,
    init_size: usize,
    table: Option<Table<T, K>>,
    snap: Option<Arc<Vec<(K, GroupAgg<T>)>>>,
}

impl<T: Elem, K: Elem> HashShared<T, K> {
    fn build(&mut self) -> Result<()> {
        if self.table.is_some() {
            return Ok(());
        }
        let mut table: Table<T, K> =
            HashMap::with_capacity_and_hasher(self.init_size, MurmurBuildHasher);
        loop {
            let Some(k) = self.keys_in.next_value()? else { break };
            let v = match &mut self.values_in {
                Some(values) => match values.next_value()? {
                    Some(v) => v,
                    None => break,
                },
                None => <T as Elem>::zero(),
            };
            match table.get_mut(&HKey(k)) {
                Some(agg) => agg.push(v),
                None => {
                    table.insert(HKey(k), GroupAgg::first(v));
                }
            }
        }
        self.table = Some(table);
        Ok(())
    }

    /// Publishes the table as the immutable snapshot both outputs iterate.
    fn snapshot(&mut self) -> Result<Arc<Vec<(K, GroupAgg<T>)>>> {
        self.build()?;
        if let Some(snap) = &self.snap {
            return Ok(Arc::clone(snap));
        }
        let table = self.table.as_ref().expect("hash table missing");
        let snap: Arc<Vec<_>> = Arc::new(table.iter().map(|(k, agg)| (k.0, *agg)).collect());
        self.snap = Some(Arc::clone(&snap));
        Ok(snap)
    }

    /// Consumes `other`'s table, inserting-or-combining into this one.
    fn fold(&mut self, other: &mut Self) -> Result<()> {
        other.build()?;
        self.build()?;
        let src = other.table.take().expect("hash table missing");
        let dst = self.table.as_mut().expect("hash table missing");
        for (k, agg) in src {
            match dst.get_mut(&k) {
                Some(existing) => existing.combine(agg),
                None => {
                    dst.insert(k, agg);
                }
            }
        }
        self.snap = None;
        Ok(())
    }

}

type SharedRef<T, K> = Arc<Mutex<HashShared<T, K>>>;

struct HashKeysOut<T: Elem, K: Elem> {
    shared: SharedRef<T, K>,
    snap: Option<Arc<Vec<(K, GroupAgg<T>)>>>,
    pos: usize,
    tile: Tile<K>,
    cursor: Cursor,
}

impl<T: Elem, K: Elem> SeriesIter<K> for HashKeysOut<T, K> {
    fn next(&mut self) -> Result<bool> {
        if self.snap.is_none() {
            self.snap = Some(self.shared.lock().snapshot()?);
        }
        let snap = self.snap.as_ref().expect("hash snapshot missing");
        if self.pos >= snap.len() {
            return Ok(false);
        }
        let take = self.tile.cap().min(snap.len() - self.pos);
        self.tile.clear();
        for (k, _) in &snap[self.pos..self.pos + take] {
            self.tile.push(*k);
        }
        self.pos += take;
        self.cursor.next_pos += take as u64;
        Ok(true)
    }

    fn tile(&self) -> &[K] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        // Rewind the output walk only; the published table stays valid.
        self.snap = None;
        self.pos = 0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

struct HashAggOut<T: Elem, K: Elem, O: Elem> {
    shared: SharedRef<T, K>,
    map: fn(&GroupAgg<T>) -> O,
    snap: Option<Arc<Vec<(K, GroupAgg<T>)>>>,
    pos: usize,
    tile: Tile<O>,
    cursor: Cursor,
}

impl<T: Elem, K: Elem, O: Elem> SeriesIter<O> for HashAggOut<T, K, O> {
    fn next(&mut self) -> Result<bool> {
        if self.snap.is_none() {
            self.snap = Some(self.shared.lock().snapshot()?);
        }
        let snap = self.snap.as_ref().expect("hash snapshot missing");
        if self.pos >= snap.len() {
            return Ok(false);
        }
        let take = self.tile.cap().min(snap.len() - self.pos);
        self.tile.clear();
        for (_, agg) in &snap[self.pos..self.pos + take] {
            self.tile.push((self.map)(agg));
        }
        self.pos += take;
        self.cursor.next_pos += take as u64;
        Ok(true)
    }

    fn tile(&self) -> &[O] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.snap = None;
        self.pos = 0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn prepare(&mut self) -> Result<bool> {
        self.shared.lock().build()?;
        Ok(true)
    }

    fn merge(&mut self, other: &mut dyn SeriesIter<O>) -> Result<()> {
        let other = other
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<HashAggOut<T, K, O>>())
            .ok_or_else(|| eyre!("merge of mismatched operator kinds"))?;
        let mut dst = self.shared.lock();
        let mut src = other.shared.lock();
        dst.fold(&mut src)?;
        self.snap = None;
        self.pos = 0;
        Ok(())
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}

fn hash_pair<T: Elem, K: Elem, O: Elem>(
    values: Option<BoxedSeries<T>>,
    keys: BoxedSeries<K>,
    init_size: usize,
    map: fn(&GroupAgg<T>) -> O,
) -> (BoxedSeries<K>, BoxedSeries<O>) {
    let tile_size = keys.tile_size();
    let shared = Arc::new(Mutex::new(HashShared {
        keys_in: Feed::new(keys),
        values_in: values.map(Feed::new),
        init_size,
        table: None,
        snap: None,
    }));
    let keys_out = HashKeysOut {
        shared: Arc::clone(&shared),
        snap: None,
        pos: 0,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    };
    let agg_out = HashAggOut {
        shared,
        map,
        snap: None,
        pos: 0,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    };
    (Box::new(keys_out), Box::new(agg_out))
}

/// Default initial table capacity when no engine config is at hand.
pub const DEFAULT_HASH_INIT_SIZE: usize = crate::config::DEFAULT_HASH_INIT_SIZE;

/// Unordered per-key element counts: `(keys, counts)` iterated in lock-step.
pub fn hash_count<K: Elem>(
    keys: BoxedSeries<K>,
    init_size: usize,
) -> (BoxedSeries<K>, BoxedSeries<i64>) {
    hash_pair::<K, K, i64>(None, keys, init_size, |agg| agg.n)
}

/// Unordered per-key sums.
pub fn hash_sum<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
    init_size: usize,
) -> (BoxedSeries<K>, BoxedSeries<T::Acc>) {
    hash_pair(Some(values), keys, init_size, |agg| agg.sum)
}

/// Unordered per-key minima.
pub fn hash_min<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
    init_size: usize,
) -> (BoxedSeries<K>, BoxedSeries<T>) {
    hash_pair(Some(values), keys, init_size, |agg| agg.min)
}

/// Unordered per-key maxima.
pub fn hash_max<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
    init_size: usize,
) -> (BoxedSeries<K>, BoxedSeries<T>) {
    hash_pair(Some(values), keys, init_size, |agg| agg.max)
}

/// Unordered per-key means.
pub fn hash_avg<T: Elem, K: Elem>(
    values: BoxedSeries<T>,
    keys: BoxedSeries<K>,
    init_size: usize,
) -> (BoxedSeries<K>, BoxedSeries<f64>) {
    hash_pair(Some(values), keys, init_size, |agg| {
        agg.sum.to_f64() / agg.n as f64
    })
}

/// Number of hash bits consumed by the trailing-zero estimator; the
/// remaining high bits select one of `N_BUCKETS` buckets.
const HASH_BITS: u32 = 25;
const N_BUCKETS: usize = 1 << (32 - HASH_BITS);

struct ApproxDistinct<T: Elem> {
    input: Feed<T>,
    buckets: Option<Box<[u8; N_BUCKETS]>>,
    emitted: bool,
    tile: Tile<i64>,
    cursor: Cursor,
}

impl<T: Elem> ApproxDistinct<T> {
    fn compute(&mut self) -> Result<()> {
        if self.buckets.is_some() {
            return Ok(());
        }
        let mut buckets = Box::new([0u8; N_BUCKETS]);
        while let Some(v) = self.input.next_value()? {
            let h = murmur3_32(v.as_bytes(), MURMUR_SEED);
            let bucket = (h >> HASH_BITS) as usize;
            let low = h & ((1 << HASH_BITS) - 1);
            let rho = (low.trailing_zeros().min(HASH_BITS) + 1) as u8;
            if rho > buckets[bucket] {
                buckets[bucket] = rho;
            }
        }
        self.buckets = Some(buckets);
        Ok(())
    }

    fn estimate(buckets: &[u8; N_BUCKETS]) -> i64 {
        let m = N_BUCKETS as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let sum: f64 = buckets.iter().map(|&b| 2f64.powi(-(b as i32))).sum();
        let mut estimate = alpha * m * m / sum;

        if estimate <= 2.5 * m {
            let zeros = buckets.iter().filter(|&&b| b == 0).count();
            if zeros > 0 {
                estimate = m * (m / zeros as f64).ln();
            }
        } else if estimate > (1u64 << 32) as f64 / 30.0 {
            let two32 = (1u64 << 32) as f64;
            estimate = -two32 * (1.0 - estimate / two32).ln();
        }
        estimate.round() as i64
    }
}

impl<T: Elem> SeriesIter<i64> for ApproxDistinct<T> {
    fn next(&mut self) -> Result<bool> {
        self.compute()?;
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let estimate = Self::estimate(self.buckets.as_ref().expect("sketch missing"));
        self.tile.clear();
        self.tile.push(estimate);
        self.cursor.next_pos = 1;
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
        self.buckets = None;
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
            .and_then(|a| a.downcast_mut::<ApproxDistinct<T>>())
            .ok_or_else(|| eyre!("merge of mismatched operator kinds"))?;
        other.compute()?;
        self.compute()?;
        let src = other.buckets.take().expect("sketch missing");
        let dst = self.buckets.as_mut().expect("sketch missing");
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = (*d).max(*s);
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}

/// Approximate distinct-value count of the sequence.
pub fn approx_distinct_count<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<i64> {
    let tile_size = input.tile_size();
    Box::new(ApproxDistinct {
        input: Feed::new(input),
        buckets: None,
        emitted: false,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops::from_vec;

    #[test]
    fn murmur3_reference_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514e28b7);
        assert_eq!(murmur3_32(b"hello", 0), 0x248bfa47);
        assert_eq!(murmur3_32(b"Hello, world!", 25), 0x24884cba);
    }

    fn drain_pairs<K: Elem, O: Elem>(
        mut keys: BoxedSeries<K>,
        mut vals: BoxedSeries<O>,
    ) -> Vec<(K, O)> {
        let k = to_array(keys.as_mut()).unwrap();
        let v = to_array(vals.as_mut()).unwrap();
        assert_eq!(k.len(), v.len());
        k.into_iter().zip(v).collect()
    }

    #[test]
    fn hash_count_over_unordered_keys() {
        let keys = from_vec(vec![3i32, 1, 3, 2, 1, 3], 4);
        let (keys_out, counts_out) = hash_count(keys, 16);
        let mut pairs = drain_pairs(keys_out, counts_out);
        pairs.sort_by_key(|&(k, _)| k);
        assert_eq!(pairs, vec![(1, 2), (2, 1), (3, 3)]);
    }

    #[test]
    fn hash_sum_and_avg_agree_with_sorted_grouping() {
        let values = from_vec(vec![10i32, 1, 20, 2, 30], 4);
        let keys = from_vec(vec![7i64, 8, 7, 8, 7], 4);
        let (keys_out, sums_out) = hash_sum(values, keys, 16);
        let mut pairs = drain_pairs(keys_out, sums_out);
        pairs.sort_by_key(|&(k, _)| k);
        assert_eq!(pairs, vec![(7, 60i64), (8, 3)]);
    }

    #[test]
    fn paired_outputs_walk_one_snapshot_in_lockstep() {
        let values = from_vec(vec![5i32, 6, 7], 2);
        let keys = from_vec(vec![1i32, 2, 1], 2);
        let (mut keys_out, mut max_out) = hash_max(values, keys, 16);

        // Alternate pulls; pairs must stay aligned.
        let mut pairs = Vec::new();
        while keys_out.next().unwrap() {
            assert!(max_out.next().unwrap());
            for (k, v) in keys_out.tile().iter().zip(max_out.tile()) {
                pairs.push((*k, *v));
            }
        }
        pairs.sort_by_key(|&(k, _)| k);
        assert_eq!(pairs, vec![(1, 7), (2, 6)]);
    }

    #[test]
    fn hash_merge_folds_worker_tables() {
        let (_, mut a) = hash_sum(
            from_vec(vec![1i64, 2], 4),
            from_vec(vec![10i64, 20], 4),
            16,
        );
        let (_, mut b) = hash_sum(
            from_vec(vec![5i64, 7], 4),
            from_vec(vec![10i64, 30], 4),
            16,
        );
        a.prepare().unwrap();
        b.prepare().unwrap();
        a.merge(b.as_mut()).unwrap();

        let mut sums = to_array(a.as_mut()).unwrap();
        sums.sort_unstable();
        assert_eq!(sums, vec![2, 6, 7]);
    }

    #[test]
    fn approx_distinct_count_is_close_for_known_cardinality() {
        let distinct = 5000;
        let data: Vec<i64> = (0..20_000).map(|i| (i % distinct) as i64).collect();
        let mut est = approx_distinct_count(from_vec(data, 128));
        let got = to_array(est.as_mut()).unwrap()[0];
        let err = (got - distinct as i64).abs() as f64 / distinct as f64;
        assert!(err < 0.15, "estimate {} too far from {}", got, distinct);
    }

    #[test]
    fn approx_distinct_merge_is_bucketwise_max() {
        let a_data: Vec<i64> = (0..3000).collect();
        let b_data: Vec<i64> = (1500..4500).collect();

        let mut merged = approx_distinct_count(from_vec(a_data.clone(), 64));
        let mut part = approx_distinct_count(from_vec(b_data.clone(), 64));
        merged.prepare().unwrap();
        part.prepare().unwrap();
        merged.merge(part.as_mut()).unwrap();
        let sharded = to_array(merged.as_mut()).unwrap()[0];

        let mut all: Vec<i64> = a_data;
        all.extend(b_data);
        let mut single = approx_distinct_count(from_vec(all, 64));
        let whole = to_array(single.as_mut()).unwrap()[0];

        // Bucket-wise max of shard sketches equals the sketch of the union.
        assert_eq!(sharded, whole);
    }
}
