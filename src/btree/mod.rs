//! # B-Tree Column Storage
//!
//! This module implements Tessera's column store: an append-mostly ordered
//! sequence of fixed-size values organized as a paged B-tree.
//!
//! ## Architecture Overview
//!
//! Unlike a key-ordered B-tree, navigation is driven by **counts**: every
//! inner node stores `(child page, subtree count)` pairs, so an ordinal
//! position maps to a root-to-leaf path by subtracting child counts. This
//! gives O(log N) positional random access over a sequence that has no keys
//! at all.
//!
//! ```text
//!                 [inner: (A,3) (B,2)]
//!                  /              \
//!       [leaf A: 5 3 9]      [leaf B: 1 4]
//!        positions 0-2        positions 3-4
//! ```
//!
//! Timestamp columns additionally mirror the first value of each child
//! subtree inside inner nodes, enabling binary search by value at every
//! level; appends to such columns must be non-decreasing.
//!
//! ## Growth Pattern
//!
//! Appends go to the rightmost leaf. A full leaf spawns a fresh rightmost
//! sibling holding only the new value; the overflow propagates upward,
//! growing the tree at the root when the root itself is full. This favors
//! append-heavy time-series workloads: all pages except the rightmost spine
//! are completely full.
//!
//! ## Delete Behavior
//!
//! Range deletion splices values out of leaves, decrements ancestor counts
//! and compacts away emptied children. Under-full siblings are NOT merged or
//! rebalanced — deletion is assumed rare relative to append, and the
//! resulting pages are still reachable and correct, merely sparse. This is a
//! deliberate characteristic, not an optimization opportunity to silently
//! "fix".
//!
//! ## Module Organization
//!
//! - `page`: leaf/inner page layout and borrowed view types
//! - `tree`: the `Column` handle with append, scan, search and delete

mod page;
mod tree;

pub use tree::{Column, TreeScan, TreeState};
pub(crate) use tree::RawScan;
