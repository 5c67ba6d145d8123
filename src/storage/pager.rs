//! # Pager
//!
//! The pager owns a storage backend and its page cache, and implements page
//! allocation on top of a file-resident freelist.
//!
//! ## File Header Layout (128 bytes at offset 0)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       16    magic        b"Tessera Column\0\0"
//! 16      4     version      Format version (currently 1)
//! 20      4     page_size    Bytes per page; must match the config
//! 24      8     page_count   Pages ever allocated (incl. header page)
//! 32      8     free_head    Offset of first freed page (0 = none)
//! 40      8     free_tail    Offset of last freed page (0 = none)
//! 48      4     catalog_len  Bytes of column catalog after the header
//! 52      76    reserved
//! ```
//!
//! The rest of page 0 after the header holds the column catalog, serialized
//! by the engine layer.
//!
//! ## Freelist
//!
//! Freed pages form a singly linked list threaded through the file itself:
//! the first 8 bytes at a freed page's offset hold the offset of the next
//! freed page (0 terminates). Freeing appends at the tail by writing the new
//! offset into the previous tail's link bytes; allocation pops the head.
//! Page bytes are never zeroed on free — only the link is written.
//!
//! ## Durability
//!
//! `flush()` writes the header, drains the cache's dirty list and syncs the
//! backend. Until then mutations live in cache frames (plus whatever the
//! eviction path already wrote back).

use eyre::{ensure, eyre, Result};
use parking_lot::Mutex;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{EngineConfig, FILE_HEADER_SIZE};

use super::{LoadMode, PageCache, PageClass, PageGuard, PageId, Storage};

pub const PAGER_MAGIC: &[u8; 16] = b"Tessera Column\x00\x00";
pub const CURRENT_VERSION: u32 = 1;

/// Bytes of a freed page that hold the next-free link.
pub const FREE_LINK_SIZE: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FileHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    page_count: U64,
    free_head: U64,
    free_tail: U64,
    catalog_len: U32,
    reserved: [u8; 76],
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    fn new(page_size: u32) -> Self {
        Self {
            magic: *PAGER_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(page_size),
            page_count: U64::new(1),
            free_head: U64::new(0),
            free_tail: U64::new(0),
            catalog_len: U32::new(0),
            reserved: [0u8; 76],
        }
    }

    fn parse(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for file header"
        );
        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre!("failed to parse file header: {:?}", e))?;
        ensure!(&header.magic == PAGER_MAGIC, "invalid magic bytes in storage file");
        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported format version {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );
        Ok(header)
    }

    zerocopy_accessors! {
        version: u32,
        page_size: u32,
        page_count: u64,
        free_head: u64,
        free_tail: u64,
        catalog_len: u32,
    }
}

struct PagerMeta {
    page_count: u64,
    free_head: u64,
    free_tail: u64,
    catalog_len: u32,
}

/// Page allocator and cache front-end over one storage backend.
pub struct Pager {
    storage: Box<dyn Storage>,
    cache: PageCache,
    meta: Mutex<PagerMeta>,
    page_size: usize,
}

impl Pager {
    /// Opens existing storage or initializes fresh storage with a header.
    pub fn open(storage: Box<dyn Storage>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let page_size = config.page_size;

        let meta = if storage.is_empty()? {
            let header = FileHeader::new(page_size as u32);
            storage.write(0, header.as_bytes())?;
            tracing::debug!(page_size, "initialized fresh storage");
            PagerMeta {
                page_count: 1,
                free_head: 0,
                free_tail: 0,
                catalog_len: 0,
            }
        } else {
            let mut buf = vec![0u8; FILE_HEADER_SIZE];
            ensure!(
                storage.read(0, &mut buf)?,
                "storage is non-empty but holds no file header"
            );
            let header = FileHeader::parse(&buf)?;
            ensure!(
                header.page_size() as usize == page_size,
                "storage page size {} does not match configured page size {}",
                header.page_size(),
                page_size
            );
            tracing::debug!(
                pages = header.page_count(),
                free_head = header.free_head(),
                "opened existing storage"
            );
            PagerMeta {
                page_count: header.page_count(),
                free_head: header.free_head(),
                free_tail: header.free_tail(),
                catalog_len: header.catalog_len(),
            }
        };

        Ok(Self {
            storage,
            cache: PageCache::new(config.cache_pages, page_size),
            meta: Mutex::new(meta),
            page_size,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u64 {
        self.meta.lock().page_count
    }

    /// Loads a page through the cache, returning a pinned guard.
    pub fn page(&self, id: PageId, mode: LoadMode, class: PageClass) -> Result<PageGuard<'_>> {
        self.cache.load(&*self.storage, id, mode, class)
    }

    /// Allocates a page: freelist head first, then file growth.
    pub fn alloc(&self) -> Result<PageId> {
        let mut meta = self.meta.lock();
        if meta.free_head != 0 {
            let offset = meta.free_head;
            let mut link = [0u8; FREE_LINK_SIZE];
            ensure!(
                self.storage.read(offset, &mut link)?,
                "freelist head {} lies beyond the end of storage",
                offset
            );
            meta.free_head = u64::from_le_bytes(link);
            if meta.free_head == 0 {
                meta.free_tail = 0;
            }
            return Ok(PageId(offset));
        }
        let offset = meta.page_count * self.page_size as u64;
        meta.page_count += 1;
        Ok(PageId(offset))
    }

    /// Returns a page to the freelist. The page must be unpinned; any cached
    /// copy and dirty state are discarded.
    pub fn free(&self, id: PageId) -> Result<()> {
        ensure!(!id.is_none(), "free of null page reference");
        self.cache.forget(id)?;

        let mut meta = self.meta.lock();
        self.storage.write(id.offset(), &0u64.to_le_bytes())?;
        if meta.free_tail != 0 {
            self.storage
                .write(meta.free_tail, &id.offset().to_le_bytes())?;
        } else {
            meta.free_head = id.offset();
        }
        meta.free_tail = id.offset();
        Ok(())
    }

    /// Reads the column catalog area from page 0.
    pub fn read_catalog(&self) -> Result<Vec<u8>> {
        let len = self.meta.lock().catalog_len as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; len];
        ensure!(
            self.storage.read(FILE_HEADER_SIZE as u64, &mut buf)?,
            "catalog area missing from storage"
        );
        Ok(buf)
    }

    /// Writes the column catalog area into page 0.
    pub fn write_catalog(&self, bytes: &[u8]) -> Result<()> {
        ensure!(
            FILE_HEADER_SIZE + bytes.len() <= self.page_size,
            "column catalog of {} bytes does not fit in page 0 ({} bytes available)",
            bytes.len(),
            self.page_size - FILE_HEADER_SIZE
        );
        self.storage.write(FILE_HEADER_SIZE as u64, bytes)?;
        self.meta.lock().catalog_len = bytes.len() as u32;
        Ok(())
    }

    /// Persists the header, flushes dirty pages and syncs the backend.
    pub fn flush(&self) -> Result<()> {
        {
            let meta = self.meta.lock();
            let mut header = FileHeader::new(self.page_size as u32);
            header.set_page_count(meta.page_count);
            header.set_free_head(meta.free_head);
            header.set_free_tail(meta.free_tail);
            header.set_catalog_len(meta.catalog_len);
            self.storage.write(0, header.as_bytes())?;
        }
        self.cache.flush(&*self.storage)?;
        self.storage.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    fn pager() -> Pager {
        let config = EngineConfig {
            page_size: 256,
            cache_pages: 32,
            ..Default::default()
        };
        Pager::open(Box::new(MemStorage::new()), &config).unwrap()
    }

    #[test]
    fn alloc_skips_header_page() {
        let pager = pager();
        let first = pager.alloc().unwrap();
        assert_eq!(first.offset(), 256);
        let second = pager.alloc().unwrap();
        assert_eq!(second.offset(), 512);
    }

    #[test]
    fn freed_pages_are_reused_in_fifo_order() {
        let pager = pager();
        let a = pager.alloc().unwrap();
        let b = pager.alloc().unwrap();
        let c = pager.alloc().unwrap();

        pager.free(b).unwrap();
        pager.free(a).unwrap();

        assert_eq!(pager.alloc().unwrap(), b);
        assert_eq!(pager.alloc().unwrap(), a);
        // Freelist exhausted: back to file growth.
        let next = pager.alloc().unwrap();
        assert_eq!(next.offset(), c.offset() + 256);
    }

    #[test]
    fn header_round_trips_through_reopen() {
        let config = EngineConfig {
            page_size: 256,
            cache_pages: 32,
            ..Default::default()
        };
        let storage = std::sync::Arc::new(MemStorage::new());

        struct Shared(std::sync::Arc<MemStorage>);
        impl Storage for Shared {
            fn read(&self, offset: u64, buf: &mut [u8]) -> Result<bool> {
                self.0.read(offset, buf)
            }
            fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
                self.0.write(offset, buf)
            }
            fn len(&self) -> Result<u64> {
                self.0.len()
            }
            fn sync(&self) -> Result<()> {
                self.0.sync()
            }
        }

        {
            let pager = Pager::open(Box::new(Shared(storage.clone())), &config).unwrap();
            let a = pager.alloc().unwrap();
            pager.alloc().unwrap();
            pager.free(a).unwrap();
            pager.write_catalog(b"catalog-bytes").unwrap();
            pager.flush().unwrap();
        }

        let pager = Pager::open(Box::new(Shared(storage)), &config).unwrap();
        assert_eq!(pager.page_count(), 3);
        assert_eq!(pager.read_catalog().unwrap(), b"catalog-bytes");
        // The freed page comes back first.
        assert_eq!(pager.alloc().unwrap().offset(), 256);
    }

    #[test]
    fn page_size_mismatch_is_rejected() {
        let storage = std::sync::Arc::new(MemStorage::new());
        struct Shared(std::sync::Arc<MemStorage>);
        impl Storage for Shared {
            fn read(&self, offset: u64, buf: &mut [u8]) -> Result<bool> {
                self.0.read(offset, buf)
            }
            fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
                self.0.write(offset, buf)
            }
            fn len(&self) -> Result<u64> {
                self.0.len()
            }
            fn sync(&self) -> Result<()> {
                self.0.sync()
            }
        }

        let small = EngineConfig {
            page_size: 256,
            cache_pages: 32,
            ..Default::default()
        };
        Pager::open(Box::new(Shared(storage.clone())), &small).unwrap();

        let big = EngineConfig {
            page_size: 512,
            cache_pages: 32,
            ..Default::default()
        };
        assert!(Pager::open(Box::new(Shared(storage)), &big).is_err());
    }
}
