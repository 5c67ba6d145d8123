//! # Parallel Execution
//!
//! Parallelism in Tessera happens *across* disjoint shards of one logical
//! aggregate, never inside an iterator graph: each worker owns a complete
//! shard-local pipeline, runs its `prepare()` phase, and the driving thread
//! folds the worker results pairwise with `merge()`. That two-phase
//! protocol is the only inter-thread coordination point — there is no
//! locking inside operator logic.
//!
//! ## The Pool
//!
//! `ThreadPool::execute(job)` runs `job(worker_id, n_workers)` once per
//! worker on scoped threads and returns when every worker has finished
//! (barrier semantics). `merge(f)` runs `f` under the pool's merge lock,
//! for callers that fold into shared state from inside a job. Worker count
//! defaults to the machine's available parallelism.
//!
//! ## Sharding Convention
//!
//! Workers partition by `(worker_id, n_workers)`; [`shard_range`] splits a
//! positional range into near-equal contiguous pieces, the convention the
//! column scans use.
//!
//! ## Example
//!
//! ```ignore
//! let pool = ThreadPool::new(None);
//! let total = parallel_aggregate(&pool, |id, n| {
//!     let (from, till) = shard_range(column.count(), id, n).unwrap();
//!     Ok(ops::sum(Box::new(column.scan::<i64>(from, till)?)))
//! })?;
//! ```

use eyre::{eyre, Result};
use parking_lot::Mutex;

use crate::iter::BoxedSeries;
use crate::types::Elem;

/// Barrier-style worker pool for the prepare/merge protocol.
pub struct ThreadPool {
    threads: usize,
    merge_lock: Mutex<()>,
}

impl ThreadPool {
    /// `threads = None` uses the machine's available parallelism.
    pub fn new(threads: Option<usize>) -> Self {
        let threads = threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        Self {
            threads: threads.max(1),
            merge_lock: Mutex::new(()),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `job(worker_id, n_workers)` once per worker; returns after all
    /// workers complete. The first worker error is propagated.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: Fn(usize, usize) -> Result<()> + Sync,
    {
        let n = self.threads;
        if n == 1 {
            return job(0, 1);
        }
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..n)
                .map(|id| {
                    let job = &job;
                    scope.spawn(move || job(id, n))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(_) => Err(eyre!("worker thread panicked")),
                })
                .collect()
        });
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Runs `f` under the pool's merge lock.
    pub fn merge<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.merge_lock.lock();
        f()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Splits `[0, count)` into near-equal contiguous shards, returned as the
/// inclusive `(from, till)` bounds `Column::scan` takes. A worker whose
/// shard would be empty gets `None` and should aggregate an empty source.
pub fn shard_range(count: u64, worker_id: usize, n_workers: usize) -> Option<(i64, i64)> {
    let per = count / n_workers as u64;
    let extra = count % n_workers as u64;
    let id = worker_id as u64;
    let from = per * id + id.min(extra);
    let len = per + if id < extra { 1 } else { 0 };
    if len == 0 {
        return None;
    }
    Some((from as i64, (from + len - 1) as i64))
}

/// Runs the two-phase aggregation protocol: every worker builds its
/// shard-local pipeline via `build(worker_id, n_workers)` and runs
/// `prepare()`; the worker iterators are then folded pairwise into worker
/// 0's iterator, which is returned ready to emit the merged result.
pub fn parallel_aggregate<T, F>(pool: &ThreadPool, build: F) -> Result<BoxedSeries<T>>
where
    T: Elem,
    F: Fn(usize, usize) -> Result<BoxedSeries<T>> + Sync,
{
    let n = pool.threads();
    let slots: Vec<Mutex<Option<BoxedSeries<T>>>> = (0..n).map(|_| Mutex::new(None)).collect();

    pool.execute(|id, n_workers| {
        let mut iter = build(id, n_workers)?;
        iter.prepare()?;
        *slots[id].lock() = Some(iter);
        Ok(())
    })?;

    let mut slots = slots;
    let mut acc = slots[0]
        .get_mut()
        .take()
        .ok_or_else(|| eyre!("worker 0 produced no iterator"))?;
    for slot in &mut slots[1..] {
        let mut part = slot
            .get_mut()
            .take()
            .ok_or_else(|| eyre!("worker produced no iterator"))?;
        acc.merge(part.as_mut())?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops;

    #[test]
    fn shard_ranges_cover_without_overlap() {
        let count = 1003u64;
        let n = 4;
        let mut covered = 0u64;
        let mut next_expected = 0i64;
        for id in 0..n {
            let (from, till) = shard_range(count, id, n).unwrap();
            assert_eq!(from, next_expected);
            covered += (till - from + 1) as u64;
            next_expected = till + 1;
        }
        assert_eq!(covered, count);
    }

    #[test]
    fn empty_shards_for_tiny_inputs() {
        assert_eq!(shard_range(2, 3, 4), None);
        assert!(shard_range(2, 1, 4).is_some());
    }

    #[test]
    fn parallel_sum_matches_serial_sum() {
        let data: Vec<i64> = (0..10_000).collect();
        let pool = ThreadPool::new(Some(4));

        let data_ref = &data;
        let merged = parallel_aggregate(&pool, |id, n| {
            let shard = match shard_range(data_ref.len() as u64, id, n) {
                Some((from, till)) => data_ref[from as usize..=till as usize].to_vec(),
                None => Vec::new(),
            };
            Ok(ops::sum(ops::from_vec(shard, 64)))
        })
        .unwrap();

        let mut merged = merged;
        let got = to_array(merged.as_mut()).unwrap();
        assert_eq!(got, vec![(0..10_000i64).sum::<i64>()]);
    }

    #[test]
    fn pool_propagates_worker_errors() {
        let pool = ThreadPool::new(Some(3));
        let err = pool
            .execute(|id, _| {
                if id == 1 {
                    eyre::bail!("worker failure");
                }
                Ok(())
            })
            .unwrap_err();
        assert!(err.to_string().contains("worker failure"));
    }

    #[test]
    fn merge_runs_under_the_pool_lock() {
        let pool = ThreadPool::new(Some(4));
        let counter = Mutex::new(0u64);
        pool.execute(|_, _| {
            pool.merge(|| {
                *counter.lock() += 1;
            });
            Ok(())
        })
        .unwrap();
        assert_eq!(*counter.lock(), 4);
    }
}
