//! # Positional Storage Backends
//!
//! This module implements `Storage`, the byte-addressed random-access
//! abstraction the pager is built on. All operations take an explicit offset
//! and carry no positioning state, so they are reentrant and safe to call
//! from multiple threads without external coordination.
//!
//! ## Backends
//!
//! - **FileStorage**: positional I/O over a regular file
//!   (`read_at`/`write_at`), create-if-missing. Writes past the end extend
//!   the file.
//! - **MemStorage**: a growable in-memory byte vector behind an `RwLock`,
//!   used for purely in-memory engines and for tests.
//!
//! ## Error Handling
//!
//! A read entirely beyond the end of storage returns `Ok(false)` — the pager
//! uses this to distinguish a never-written page from corruption. A partial
//! read inside the file is an error: pages are written atomically at page
//! granularity, so a short read means a truncated or corrupt file.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use parking_lot::RwLock;

/// Byte-addressed random-access storage.
pub trait Storage: Send + Sync {
    /// Reads `buf.len()` bytes at `offset`. Returns `Ok(false)` if the
    /// offset lies entirely beyond the end of storage.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<bool>;

    /// Writes `buf` at `offset`, extending the storage if needed.
    fn write(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Current storage size in bytes.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Durably persists previously written bytes.
    fn sync(&self) -> Result<()>;
}

/// Disk-backed storage using positional file I/O.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    path: std::path::PathBuf,
}

impl FileStorage {
    /// Opens the file at `path`, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open storage file '{}'", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }

    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.write_at(buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_write(buf, offset)
    }
}

impl Storage for FileStorage {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<bool> {
        let mut done = 0;
        while done < buf.len() {
            let n = self
                .read_at(&mut buf[done..], offset + done as u64)
                .wrap_err_with(|| {
                    format!("read of {} bytes at {} failed in '{}'", buf.len(), offset, self.path.display())
                })?;
            if n == 0 {
                ensure!(
                    done == 0,
                    "short read at offset {} in '{}': got {} of {} bytes",
                    offset,
                    self.path.display(),
                    done,
                    buf.len()
                );
                return Ok(false);
            }
            done += n;
        }
        Ok(true)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self
                .write_at(&buf[done..], offset + done as u64)
                .wrap_err_with(|| {
                    format!("write of {} bytes at {} failed in '{}'", buf.len(), offset, self.path.display())
                })?;
            ensure!(n > 0, "zero-length write at offset {} in '{}'", offset, self.path.display());
            done += n;
        }
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        let meta = self
            .file
            .metadata()
            .wrap_err_with(|| format!("stat failed for '{}'", self.path.display()))?;
        Ok(meta.len())
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("fsync failed for '{}'", self.path.display()))
    }
}

/// In-memory storage backend.
#[derive(Debug, Default)]
pub struct MemStorage {
    bytes: RwLock<Vec<u8>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<bool> {
        let bytes = self.bytes.read();
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(false);
        }
        ensure!(
            offset + buf.len() <= bytes.len(),
            "short read at offset {}: storage holds {} bytes, need {}",
            offset,
            bytes.len(),
            offset + buf.len()
        );
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(true)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.write();
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_storage_read_beyond_end_reports_missing() {
        let storage = MemStorage::new();
        let mut buf = [0u8; 8];
        assert!(!storage.read(0, &mut buf).unwrap());

        storage.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(storage.read(0, &mut buf).unwrap());
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn mem_storage_write_extends() {
        let storage = MemStorage::new();
        storage.write(100, &[9]).unwrap();
        assert_eq!(storage.len().unwrap(), 101);

        let mut buf = [0u8; 1];
        assert!(storage.read(100, &mut buf).unwrap());
        assert_eq!(buf[0], 9);
    }

    #[test]
    fn file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("data.tsr")).unwrap();

        storage.write(4096, b"hello").unwrap();
        let mut buf = [0u8; 5];
        assert!(storage.read(4096, &mut buf).unwrap());
        assert_eq!(&buf, b"hello");

        let mut beyond = [0u8; 5];
        assert!(!storage.read(1 << 20, &mut beyond).unwrap());
    }
}
