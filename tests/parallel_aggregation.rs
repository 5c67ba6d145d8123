//! # Parallel Aggregation Tests
//!
//! The prepare/merge associativity contract, exercised over real column
//! shards: for any partition of the input into worker shards, folding the
//! shard-local `prepare()` results with `merge()` must equal the
//! single-threaded result of the same aggregate — for every aggregate
//! carrying a merge.

use tessera::iter::{to_array, BoxedSeries};
use tessera::parallel::{parallel_aggregate, shard_range, ThreadPool};
use tessera::{ops, Column, Elem, ElemKind, Engine};

fn engine_with_column(n: i64) -> (Engine, Column) {
    let engine = Engine::builder()
        .page_size(512)
        .tile_size(32)
        .cache_pages(64)
        .in_memory()
        .unwrap();
    let col = engine.create_column("v", ElemKind::Int64, false).unwrap();
    for i in 0..n {
        // A repeating, slightly irregular payload.
        col.append((i * 7 + i % 13) % 1000).unwrap();
    }
    (engine, col)
}

/// Runs `build` once over the whole column and once sharded over the
/// pool, returning (serial result, merged result).
fn serial_and_sharded<T, F>(pool: &ThreadPool, col: &Column, build: F) -> (Vec<T>, Vec<T>)
where
    T: Elem,
    F: Fn(BoxedSeries<i64>) -> BoxedSeries<T> + Sync,
{
    let whole = Box::new(col.scan::<i64>(0, -1).unwrap());
    let serial = to_array(build(whole).as_mut()).unwrap();

    let mut merged = parallel_aggregate(pool, |id, n| {
        let shard: BoxedSeries<i64> = match shard_range(col.count(), id, n) {
            Some((from, till)) => Box::new(col.scan::<i64>(from, till)?),
            None => ops::from_vec(Vec::new(), 32),
        };
        Ok(build(shard))
    })
    .unwrap();
    let sharded = to_array(merged.as_mut()).unwrap();
    (serial, sharded)
}

#[test]
fn sum_count_extrema_shard_exactly() {
    let (_engine, col) = engine_with_column(30_000);
    let pool = ThreadPool::new(Some(4));

    let (serial, sharded) = serial_and_sharded(&pool, &col, ops::sum);
    assert_eq!(serial, sharded);

    let (serial, sharded) = serial_and_sharded(&pool, &col, ops::count);
    assert_eq!(serial, sharded);

    let (serial, sharded) = serial_and_sharded(&pool, &col, ops::max);
    assert_eq!(serial, sharded);

    let (serial, sharded) = serial_and_sharded(&pool, &col, ops::min);
    assert_eq!(serial, sharded);
}

#[test]
fn moments_shard_within_float_tolerance() {
    let (_engine, col) = engine_with_column(30_000);
    let pool = ThreadPool::new(Some(4));

    let (serial, sharded) = serial_and_sharded(&pool, &col, ops::avg);
    assert!((serial[0] - sharded[0]).abs() < 1e-9);

    let (serial, sharded) = serial_and_sharded(&pool, &col, ops::var);
    assert!((serial[0] - sharded[0]).abs() < 1e-6);

    let (serial, sharded) = serial_and_sharded(&pool, &col, ops::dev);
    assert!((serial[0] - sharded[0]).abs() < 1e-6);
}

#[test]
fn top_k_and_first_pos_shard_exactly() {
    let (_engine, col) = engine_with_column(10_000);
    let pool = ThreadPool::new(Some(4));

    let (serial, sharded) =
        serial_and_sharded(&pool, &col, |s| ops::top_max(s, 10).unwrap());
    assert_eq!(serial, sharded);

    let (serial, sharded) =
        serial_and_sharded(&pool, &col, |s| ops::top_min(s, 10).unwrap());
    assert_eq!(serial, sharded);

    // First positions of a predicate: global positions survive sharding
    // because each shard scan carries its own positional origin.
    let first_pos = |s: BoxedSeries<i64>| {
        let mask = ops::eq(s, ops::constant(0i64, u64::MAX, 32));
        ops::filter_first_pos(mask, 5).unwrap()
    };
    let (serial, sharded) = serial_and_sharded(&pool, &col, first_pos);
    assert_eq!(serial, sharded);
}

#[test]
fn histogram_and_distinct_count_shard_exactly() {
    let (_engine, col) = engine_with_column(20_000);
    let pool = ThreadPool::new(Some(4));

    let (serial, sharded) = serial_and_sharded(&pool, &col, |s| {
        ops::histogram(s, 0i64, 1000i64, 20).unwrap()
    });
    assert_eq!(serial, sharded);
    assert_eq!(serial.iter().sum::<i64>(), 20_000);

    let (serial, sharded) = serial_and_sharded(&pool, &col, ops::approx_distinct_count);
    assert_eq!(serial, sharded);
}

#[test]
fn hash_aggregation_shards_by_table_fold() {
    let (_engine, col) = engine_with_column(20_000);
    let pool = ThreadPool::new(Some(4));

    let serial = {
        let keys = Box::new(col.scan::<i64>(0, -1).unwrap());
        let values = Box::new(col.scan::<i64>(0, -1).unwrap());
        let (_k, mut sums) = ops::hash_sum(values, keys, 64);
        let mut out = to_array(sums.as_mut()).unwrap();
        out.sort_unstable();
        out
    };

    let mut merged = parallel_aggregate(&pool, |id, n| {
        let (keys, values): (BoxedSeries<i64>, BoxedSeries<i64>) =
            match shard_range(col.count(), id, n) {
                Some((from, till)) => (
                    Box::new(col.scan::<i64>(from, till)?),
                    Box::new(col.scan::<i64>(from, till)?),
                ),
                None => (ops::from_vec(Vec::new(), 32), ops::from_vec(Vec::new(), 32)),
            };
        let (_k, sums) = ops::hash_sum(values, keys, 64);
        Ok(sums)
    })
    .unwrap();
    let mut sharded = to_array(merged.as_mut()).unwrap();
    sharded.sort_unstable();

    assert_eq!(serial, sharded);
}

#[test]
fn covariance_and_correlation_shard_over_paired_scans() {
    let engine = Engine::builder()
        .page_size(512)
        .tile_size(32)
        .cache_pages(64)
        .in_memory()
        .unwrap();
    let x = engine.create_column("x", ElemKind::Float64, false).unwrap();
    let y = engine.create_column("y", ElemKind::Float64, false).unwrap();
    for i in 0..10_000 {
        let v = (i % 571) as f64;
        x.append(v).unwrap();
        y.append(v * 0.5 + ((i % 7) as f64)).unwrap();
    }

    let serial = {
        let sx = Box::new(x.scan::<f64>(0, -1).unwrap());
        let sy = Box::new(y.scan::<f64>(0, -1).unwrap());
        to_array(ops::corr(sx, sy).as_mut()).unwrap()
    };

    let pool = ThreadPool::new(Some(3));
    let mut merged = parallel_aggregate(&pool, |id, n| {
        let (sx, sy): (BoxedSeries<f64>, BoxedSeries<f64>) =
            match shard_range(x.count(), id, n) {
                Some((from, till)) => (
                    Box::new(x.scan::<f64>(from, till)?),
                    Box::new(y.scan::<f64>(from, till)?),
                ),
                None => (ops::from_vec(Vec::new(), 32), ops::from_vec(Vec::new(), 32)),
            };
        Ok(ops::corr(sx, sy))
    })
    .unwrap();
    let sharded = to_array(merged.as_mut()).unwrap();

    assert!((serial[0] - sharded[0]).abs() < 1e-9);
}
