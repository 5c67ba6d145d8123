//! # Engine Configuration
//!
//! This module defines `EngineConfig`, the runtime configuration record passed
//! into every constructor that needs a tuning value. Tessera deliberately has
//! no process-wide mutable tuning state: tests vary tile size and page size
//! per engine instance without side effects on other instances.
//!
//! ## Dependency Graph
//!
//! The values are interdependent. When changing any value, check the
//! dependent ones:
//!
//! ```text
//! page_size (4096 bytes)
//!       │
//!       ├─> leaf capacity       (page_size - PAGE_HEADER_SIZE) / elem_size
//!       ├─> inner capacity      (page_size - PAGE_HEADER_SIZE) / slot width
//!       └─> FILE_HEADER_SIZE    page 0 reserves 128 bytes + column catalog
//!
//! tile_size (128 elements)
//!       │
//!       ├─> bounded operator parameters: top-K, filter_first_pos and
//!       │   histogram interval counts must fit in one tile
//!       └─> per-operator buffering: one tile per operand reference
//!
//! cache_pages (1024 frames)
//!       │
//!       └─> must exceed the deepest concurrently-pinned descent path;
//!           a cache where every frame is pinned is a fatal condition
//! ```
//!
//! ## Defaults
//!
//! | Field            | Default | Description                             |
//! |------------------|---------|-----------------------------------------|
//! | `page_size`      | 4096    | Bytes per B-tree/storage page           |
//! | `tile_size`      | 128     | Max elements per iterator tile          |
//! | `cache_pages`    | 1024    | Page cache capacity in frames           |
//! | `hash_init_size` | 1019    | Initial hash-aggregation table capacity |

use eyre::{ensure, Result};

/// Size of the per-page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Size of the file header stored at the start of page 0.
pub const FILE_HEADER_SIZE: usize = 128;

/// Maximum B-tree descent depth; the scan stack is bounded by this.
pub const MAX_TREE_DEPTH: usize = 16;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_TILE_SIZE: usize = 128;
pub const DEFAULT_CACHE_PAGES: usize = 1024;
pub const DEFAULT_HASH_INIT_SIZE: usize = 1019;

/// Runtime configuration for one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub page_size: usize,
    pub tile_size: usize,
    pub cache_pages: usize,
    pub hash_init_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            tile_size: DEFAULT_TILE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            hash_init_size: DEFAULT_HASH_INIT_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.page_size >= 256 && self.page_size.is_power_of_two(),
            "page_size {} must be a power of two of at least 256",
            self.page_size
        );
        ensure!(
            self.page_size > FILE_HEADER_SIZE + PAGE_HEADER_SIZE,
            "page_size {} too small for file header",
            self.page_size
        );
        ensure!(self.tile_size >= 2, "tile_size {} must be at least 2", self.tile_size);
        ensure!(
            self.cache_pages >= 2 * MAX_TREE_DEPTH,
            "cache_pages {} must be at least {}",
            self.cache_pages,
            2 * MAX_TREE_DEPTH
        );
        ensure!(self.hash_init_size >= 1, "hash_init_size must be nonzero");
        Ok(())
    }
}
