//! # Tessera - Embedded Columnar Time-Series Engine
//!
//! Tessera is an embedded analytical column engine combining a paged,
//! count-navigated B-tree column store with a pull-based, tile-batched
//! operator algebra. This Rust implementation prioritizes:
//!
//! - **Streaming execution**: operators pull bounded tiles on demand, never
//!   materializing full sequences except where inherently required (sort,
//!   rank, reverse)
//! - **Positional storage**: O(log n) random access by ordinal position over
//!   append-mostly columns
//! - **Parallel aggregation**: a two-phase prepare/merge protocol folds
//!   worker-local partial results into one
//!
//! ## Quick Start
//!
//! ```ignore
//! use tessera::{Engine, ElemKind, ops};
//!
//! let engine = Engine::builder().tile_size(128).in_memory()?;
//! let prices = engine.create_column("price", ElemKind::Float64, false)?;
//!
//! for p in [101.5, 102.0, 99.75] {
//!     prices.append::<f64>(p)?;
//! }
//!
//! let scan = prices.scan::<f64>(0, -1)?;
//! let avg = ops::avg(scan);
//! ```
//!
//! ## Architecture
//!
//! Tessera uses a layered architecture:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Public API (Engine)          │
//! ├─────────────────────────────────────┤
//! │  Operator Library (ops) │ parallel  │
//! ├─────────────────────────┴───────────┤
//! │    Iterator Core (tiles, feeds)     │
//! ├─────────────────────────────────────┤
//! │   B-Tree Columns (append/subseq/    │
//! │        search/delete)               │
//! ├─────────────────────────────────────┤
//! │  Pager (freelist, file header)      │
//! ├─────────────────────────────────────┤
//! │  Page Cache (LRU, pin, dirty)       │
//! ├─────────────────────────────────────┤
//! │  Storage (positional file I/O)      │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! Client code composes operator constructors, each taking upstream
//! iterator(s) and producing a new iterator. Driving the outermost iterator's
//! `next()` recursively pulls tiles through the graph. B-tree scans
//! (`subseq`, `search`) are the leaf-level sources; the pager and cache back
//! the B-tree pages.
//!
//! ## Module Overview
//!
//! - [`storage`]: positional file I/O, page cache, pager with embedded freelist
//! - [`btree`]: count-navigated B-tree columns (append, subseq, search, delete)
//! - [`iter`]: the tile protocol — `SeriesIter`, `Feed`, `tee`, `to_array`
//! - [`ops`]: the operator library (arithmetic, filtering, aggregation,
//!   windowing, grouping, hashing, sort, joins)
//! - [`parallel`]: thread pool and the prepare/merge aggregation protocol
//! - [`engine`]: the `Engine` facade and named column catalog

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod engine;
pub mod iter;
pub mod ops;
pub mod parallel;
pub mod storage;
pub mod types;

pub use btree::Column;
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use iter::{BoxedSeries, Cursor, Feed, SeriesIter, Tile};
pub use types::{Boundary, Elem, ElemKind};
