//! # Engine Facade
//!
//! The `Engine` owns one pager (one storage backend) and a catalog of named
//! columns stored in it. The catalog — column names, element kinds,
//! timestamp flags and tree locations — is serialized into the page-0 area
//! after the file header, so a disk-backed engine reopens with all of its
//! columns intact.
//!
//! ## Opening an Engine
//!
//! ```ignore
//! let engine = Engine::builder()
//!     .page_size(4096)
//!     .tile_size(128)
//!     .cache_pages(1024)
//!     .open("./metrics.tsr")?;
//!
//! let cpu = engine.create_column("cpu", ElemKind::Float64, false)?;
//! let at = engine.create_column("at", ElemKind::Int64, true)?;
//! ```
//!
//! `in_memory()` builds the same engine over a RAM backend, which is also
//! how tests get hermetic instances with custom page/tile geometry.
//!
//! ## Durability
//!
//! `flush()` re-serializes the catalog, writes the file header and drains
//! the dirty page list. Nothing is durable before a flush except pages the
//! cache already evicted.
//!
//! ## Catalog Format
//!
//! ```text
//! u32    column count
//! per column:
//!   u8   name length      (names are at most 255 UTF-8 bytes)
//!   ..   name bytes
//!   u8   element kind tag
//!   u16  byte width       (Bytes kinds; 0 otherwise)
//!   u8   timestamp flag
//!   u64  root page offset
//!   u64  element count
//!   u32  tree height
//! ```

use std::path::Path;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::btree::{Column, TreeState};
use crate::config::EngineConfig;
use crate::storage::{FileStorage, MemStorage, PageId, Pager, Storage};
use crate::types::ElemKind;

/// Builder for configuring and opening a Tessera engine.
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn tile_size(mut self, tile_size: usize) -> Self {
        self.config.tile_size = tile_size;
        self
    }

    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.config.cache_pages = cache_pages;
        self
    }

    pub fn hash_init_size(mut self, hash_init_size: usize) -> Self {
        self.config.hash_init_size = hash_init_size;
        self
    }

    /// Opens a disk-backed engine at `path` (created if missing).
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Engine> {
        Engine::with_storage(Box::new(FileStorage::open(path)?), self.config)
    }

    /// Opens an engine over a RAM backend.
    pub fn in_memory(self) -> Result<Engine> {
        Engine::with_storage(Box::new(MemStorage::new()), self.config)
    }

    /// Opens an engine over a caller-supplied storage backend.
    pub fn storage(self, storage: Box<dyn Storage>) -> Result<Engine> {
        Engine::with_storage(storage, self.config)
    }
}

/// An embedded columnar time-series engine instance.
pub struct Engine {
    config: EngineConfig,
    pager: Arc<Pager>,
    columns: RwLock<HashMap<String, Column>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
        }
    }

    fn with_storage(storage: Box<dyn Storage>, config: EngineConfig) -> Result<Self> {
        let pager = Arc::new(Pager::open(storage, &config)?);
        let catalog = pager.read_catalog()?;
        let columns = decode_catalog(&catalog, &pager, &config)?;
        tracing::debug!(columns = columns.len(), "engine opened");
        Ok(Self {
            config,
            pager,
            columns: RwLock::new(columns),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tile size pipelines over this engine's columns use.
    pub fn tile_size(&self) -> usize {
        self.config.tile_size
    }

    /// Creates a new, empty named column.
    pub fn create_column(
        &self,
        name: &str,
        kind: ElemKind,
        timestamp: bool,
    ) -> Result<Column> {
        ensure!(!name.is_empty() && name.len() <= 255, "column name length out of range");
        let mut columns = self.columns.write();
        if columns.contains_key(name) {
            bail!("column '{}' already exists", name);
        }
        let column = Column::new(
            Arc::clone(&self.pager),
            &self.config,
            name,
            kind,
            timestamp,
            TreeState::empty(),
        )?;
        columns.insert(name.to_string(), column.clone());
        Ok(column)
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<Column> {
        self.columns.read().get(name).cloned()
    }

    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.columns.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops a column, returning its pages to the freelist.
    pub fn drop_column(&self, name: &str) -> Result<()> {
        let Some(column) = self.columns.write().remove(name) else {
            bail!("column '{}' does not exist", name);
        };
        column.clear()
    }

    /// Persists the catalog and every dirty page.
    pub fn flush(&self) -> Result<()> {
        let columns = self.columns.read();
        let catalog = encode_catalog(&columns);
        self.pager.write_catalog(&catalog)?;
        self.pager.flush()
    }
}

fn encode_catalog(columns: &HashMap<String, Column>) -> Vec<u8> {
    let mut names: Vec<&String> = columns.keys().collect();
    names.sort();

    let mut out = Vec::with_capacity(16 + columns.len() * 48);
    out.extend_from_slice(&(columns.len() as u32).to_le_bytes());
    for name in names {
        let column = &columns[name];
        let state = column.tree_state();
        let width = match column.kind() {
            ElemKind::Bytes(w) => w,
            _ => 0,
        };
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.push(column.kind().tag());
        out.extend_from_slice(&width.to_le_bytes());
        out.push(column.is_timestamp() as u8);
        out.extend_from_slice(&state.root.offset().to_le_bytes());
        out.extend_from_slice(&state.count.to_le_bytes());
        out.extend_from_slice(&state.height.to_le_bytes());
    }
    out
}

fn decode_catalog(
    bytes: &[u8],
    pager: &Arc<Pager>,
    config: &EngineConfig,
) -> Result<HashMap<String, Column>> {
    let mut columns = HashMap::new();
    if bytes.is_empty() {
        return Ok(columns);
    }

    let mut cursor = ByteCursor::new(bytes);
    let n = cursor.u32()?;
    for _ in 0..n {
        let name_len = cursor.u8()? as usize;
        let name = std::str::from_utf8(cursor.take(name_len)?)
            .map_err(|_| eyre::eyre!("column name is not valid UTF-8"))?
            .to_string();
        let tag = cursor.u8()?;
        let width = cursor.u16()?;
        let timestamp = cursor.u8()? != 0;
        let root = PageId(cursor.u64()?);
        let count = cursor.u64()?;
        let height = cursor.u32()?;

        let kind = ElemKind::from_tag(tag, width)
            .ok_or_else(|| eyre::eyre!("unknown element kind tag {} in catalog", tag))?;
        let column = Column::new(
            Arc::clone(pager),
            config,
            name.clone(),
            kind,
            timestamp,
            TreeState {
                root,
                count,
                height,
            },
        )?;
        columns.insert(name, column);
    }
    Ok(columns)
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            self.pos + n <= self.bytes.len(),
            "truncated column catalog"
        );
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;

    #[test]
    fn create_and_look_up_columns() {
        let engine = Engine::builder().in_memory().unwrap();
        engine
            .create_column("cpu", ElemKind::Float64, false)
            .unwrap();
        engine.create_column("at", ElemKind::Int64, true).unwrap();

        assert!(engine.column("cpu").is_some());
        assert!(engine.column("missing").is_none());
        assert_eq!(engine.column_names(), vec!["at", "cpu"]);

        assert!(engine
            .create_column("cpu", ElemKind::Int32, false)
            .is_err());
    }

    #[test]
    fn drop_column_frees_its_pages() {
        let engine = Engine::builder()
            .page_size(256)
            .cache_pages(64)
            .in_memory()
            .unwrap();
        let col = engine.create_column("x", ElemKind::Int64, false).unwrap();
        for v in 0..1000i64 {
            col.append(v).unwrap();
        }
        engine.drop_column("x").unwrap();
        assert!(engine.column("x").is_none());

        // Freed pages are recycled by the next column.
        let col = engine.create_column("y", ElemKind::Int64, false).unwrap();
        col.append(1i64).unwrap();
        assert_eq!(col.count(), 1);
    }

    #[test]
    fn catalog_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.tsr");

        {
            let engine = Engine::builder()
                .page_size(512)
                .cache_pages(64)
                .open(&path)
                .unwrap();
            let prices = engine
                .create_column("price", ElemKind::Float64, false)
                .unwrap();
            let times = engine.create_column("ts", ElemKind::Int64, true).unwrap();
            for i in 0..500 {
                prices.append(i as f64 * 0.5).unwrap();
                times.append(i as i64 * 10).unwrap();
            }
            engine.flush().unwrap();
        }

        let engine = Engine::builder()
            .page_size(512)
            .cache_pages(64)
            .open(&path)
            .unwrap();
        let prices = engine.column("price").unwrap();
        assert_eq!(prices.count(), 500);
        assert!(!prices.is_timestamp());

        let times = engine.column("ts").unwrap();
        assert!(times.is_timestamp());
        let mut scan = times.scan::<i64>(0, 9).unwrap();
        assert_eq!(
            to_array(&mut scan).unwrap(),
            (0..10).map(|i| i * 10).collect::<Vec<i64>>()
        );

        // Timestamp invariants survive the reopen.
        assert!(times.append(1i64).is_err());
        times.append(10_000i64).unwrap();
    }
}
