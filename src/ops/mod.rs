//! # Operator Library
//!
//! The composable operator family of the engine. Every constructor takes its
//! upstream iterator(s) by value (ownership transfers into the new
//! operator) and returns a boxed [`SeriesIter`](crate::iter::SeriesIter),
//! so pipelines read as nested constructor calls:
//!
//! ```ignore
//! use tessera::ops;
//!
//! let scan = prices.scan::<f64>(0, -1)?;
//! let gains = ops::filter(
//!     ops::gt(ops::window_avg(scan, 20)?, ops::constant(100.0, n, tile)),
//!     prices.scan::<f64>(0, -1)?,
//! );
//! ```
//!
//! ## Families
//!
//! - [`source`]: literal/constant sources, gather by position, reverse
//! - [`arith`]: lockstep arithmetic, comparisons, logical masks, casts
//! - [`filter`]: mask compaction, position emission, branch selection, top-K
//! - [`agg`]: whole-sequence aggregates with prepare/merge, histogram
//! - [`window`]: sliding-window and cumulative aggregates
//! - [`group`]: grouped aggregates over pre-sorted keys
//! - [`hash`]: unordered group-by and approximate distinct count
//! - [`sort`]: permutation sort, rank, quantile, median
//! - [`join`]: union, concat, merge joins, as-of join, grid stretch
//! - [`bytes`]: the fixed-width byte-array series family
//!
//! ## Lockstep Semantics
//!
//! Binary operators consume their operands element-by-element and end at
//! the shorter input. Operators with paired operands that MUST agree in
//! length (joins over (timestamp, value) pairs, `stretch`) treat a length
//! mismatch as a domain error instead.

pub mod agg;
pub mod arith;
pub mod bytes;
pub mod filter;
pub mod group;
pub mod hash;
pub mod join;
pub mod sort;
pub mod source;
pub mod window;

pub use agg::{
    all, any, avg, corr, count, cov, dev, histogram, max, min, prd, sum, var, wavg, wsum,
};
pub use arith::{
    abs, add, and, cast, div, eq, ge, gt, le, lt, maxof, minof, mul, ne, neg, not, or, rem, sub,
    xor,
};
pub use filter::{cond, filter, filter_first_pos, filter_pos, iif, top_max, top_max_pos, top_min, top_min_pos};
pub use group::{group_avg, group_count, group_dev, group_max, group_min, group_sum, group_var};
pub use hash::{approx_distinct_count, hash_avg, hash_count, hash_max, hash_min, hash_sum};
pub use join::{asof_join, asof_join_pos, concat, join, join_pos, stretch, stretch0, union};
pub use sort::{dense_rank, median, quantile, rank, reverse, sort, SortOrder};
pub use source::{constant, from_vec, map_positions};
pub use window::{
    cum_avg, cum_dev, cum_max, cum_min, cum_prd, cum_sum, cum_var, window_atr, window_avg,
    window_dev, window_ema, window_max, window_min, window_sum, window_var,
};
