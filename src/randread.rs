//! Random-access readers for a segment's `.dat` file.
//!
//! [`FileRandRead`] is the seam between `FileChunk`/`WriteableFileChunk` and
//! the actual I/O strategy chosen by [`crate::config::RandReadKind`]:
//!
//! - [`NormalRandRead`] — plain positioned reads via `read_at`.
//! - [`MmapRandRead`] — a read-only `mmap` over a file whose size is fixed
//!   for the reader's lifetime (a frozen, closed segment).
//! - [`MmapRandReadDynamic`] — an `mmap` that can be re-established after the
//!   underlying file has grown, for the one segment still being appended to.
//!   Remapping swaps an `Arc<Mmap>` behind a lock so in-flight reads that
//!   already cloned the old mapping keep it alive until they finish.
//!
//! `DirectIo` is accepted as a [`crate::config::RandReadKind`] but currently
//! reads the same way `Normal` does — true `O_DIRECT` needs aligned buffers
//! and platform-specific flags this store doesn't yet need badly enough to
//! justify the complexity; it's kept as a distinct tune option so the
//! distinction is visible in configuration even though the two behave alike.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use memmap2::{Mmap, MmapOptions};

use crate::error::{Result, StoreError};

pub trait FileRandRead: Send + Sync {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct NormalRandRead {
    file: Arc<File>,
    path: PathBuf,
    len: u64,
}

impl NormalRandRead {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| StoreError::io(path.clone(), e))?;
        let len = file.metadata().map_err(|e| StoreError::io(path.clone(), e))?.len();
        Ok(Self {
            file: Arc::new(file),
            path,
            len,
        })
    }
}

impl FileRandRead for NormalRandRead {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| StoreError::io(self.path.clone(), e))
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Same I/O path as [`NormalRandRead`]; kept distinct so callers can select
/// it from [`crate::config::RandReadKind::DirectIo`] without assuming it
/// behaves identically forever.
pub type DirectIoRandRead = NormalRandRead;

pub struct MmapRandRead {
    map: Mmap,
    path: PathBuf,
}

impl MmapRandRead {
    /// Maps the whole file read-only. Safe in the sense this crate relies
    /// on: the `.dat` file is never truncated or rewritten out from under a
    /// frozen segment's mapping, only ever appended to by its own writer
    /// before freezing and left alone after.
    #[allow(unsafe_code)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| StoreError::io(path.clone(), e))?;
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(|e| StoreError::io(path.clone(), e))?;
        Ok(Self { map, path })
    }
}

impl FileRandRead for MmapRandRead {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.map.len() {
            return Err(StoreError::io(
                self.path.clone(),
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "read past mapped end"),
            ));
        }
        buf.copy_from_slice(&self.map[start..end]);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.map.len() as u64
    }
}

/// An `mmap` that can be refreshed as the underlying file grows — used for
/// the one segment a `WriteableFileChunk` is still appending to, where
/// readers must see bytes written after the mapping was first established.
pub struct MmapRandReadDynamic {
    file: File,
    path: PathBuf,
    map: RwLock<Arc<Mmap>>,
}

impl MmapRandReadDynamic {
    #[allow(unsafe_code)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| StoreError::io(path.clone(), e))?;
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(|e| StoreError::io(path.clone(), e))?;
        Ok(Self {
            file,
            path,
            map: RwLock::new(Arc::new(map)),
        })
    }

    /// Re-establish the mapping to cover the file's current length. Readers
    /// that already hold a clone of the previous mapping (via `current()`)
    /// keep reading through it safely until they drop it.
    #[allow(unsafe_code)]
    pub fn remap(&self) -> Result<()> {
        let map = unsafe { MmapOptions::new().map(&self.file) }
            .map_err(|e| StoreError::io(self.path.clone(), e))?;
        *self.map.write().unwrap() = Arc::new(map);
        Ok(())
    }

    fn current(&self) -> Arc<Mmap> {
        self.map.read().unwrap().clone()
    }
}

impl FileRandRead for MmapRandReadDynamic {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let map = self.current();
        let start = offset as usize;
        let end = start + buf.len();
        if end > map.len() {
            return Err(StoreError::io(
                self.path.clone(),
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "read past mapped end"),
            ));
        }
        buf.copy_from_slice(&map[start..end]);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.current().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn normal_rand_read_reads_back_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        tmp.flush().unwrap();
        let reader = NormalRandRead::open(tmp.path()).unwrap();
        let mut buf = [0u8; 5];
        reader.read_at(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn mmap_rand_read_reads_back_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();
        let reader = MmapRandRead::open(tmp.path()).unwrap();
        let mut buf = [0u8; 4];
        reader.read_at(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"3456");
    }

    #[test]
    fn dynamic_mmap_sees_appended_bytes_after_remap() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"abc").unwrap();
        let reader = MmapRandReadDynamic::open(tmp.path()).unwrap();
        assert_eq!(reader.len(), 3);
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(tmp.path()).unwrap();
            f.write_all(b"def").unwrap();
        }
        reader.remap().unwrap();
        assert_eq!(reader.len(), 6);
        let mut buf = [0u8; 3];
        reader.read_at(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"def");
    }
}
