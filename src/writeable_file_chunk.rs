//! The one segment in a store still being appended to.
//!
//! Lock order, outermost first: `write_lock` (serializes the whole
//! append-or-flush-and-append sequence) → `flush_lock` (serializes the act
//! of issuing a flush so a caller-triggered `flush()` can't race an
//! append-triggered rotation) → the inner state lock. Actual disk I/O for a
//! flush runs on the segment's [`SequentialExecutor`] so writes land on disk
//! in the same order chunks were rotated, regardless of which thread
//! triggered which rotation.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::chunk::Chunk;
use crate::config::FileChunkConfig;
use crate::error::{Result, StoreError};
use crate::executor::SequentialExecutor;
use crate::file_chunk::FileChunk;
use crate::header::{ChunkIndexRecord, FileHeader, LidMetaRecord};
use crate::lid::{Lid, LidInfo};
use crate::lid_index::LidIndex;
use crate::randread::MmapRandReadDynamic;

struct WriteState {
    current: Chunk,
    next_chunk_id: u32,
    flushed: Vec<ChunkIndexRecord>,
    dat_file: File,
    idx_file: File,
    dat_offset: u64,
    doc_id_limit: u32,
    pending_last_serial: u64,
    reader: Option<MmapRandReadDynamic>,
}

pub struct WriteableFileChunk {
    file_id: u16,
    dat_path: PathBuf,
    idx_path: PathBuf,
    config: FileChunkConfig,
    create_serial_num: u64,
    sync_writes: bool,
    write_lock: Mutex<()>,
    flush_lock: Mutex<()>,
    state: Mutex<WriteState>,
    executor: SequentialExecutor,
}

impl WriteableFileChunk {
    pub fn create(
        file_id: u16,
        dat_path: impl AsRef<Path>,
        idx_path: impl AsRef<Path>,
        config: FileChunkConfig,
        create_serial_num: u64,
        sync_writes: bool,
    ) -> Result<Self> {
        let dat_path = dat_path.as_ref().to_path_buf();
        let idx_path = idx_path.as_ref().to_path_buf();
        let dat_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&dat_path)
            .map_err(|e| StoreError::io(dat_path.clone(), e))?;
        let mut idx_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&idx_path)
            .map_err(|e| StoreError::io(idx_path.clone(), e))?;
        idx_file
            .write_all(&FileHeader { doc_id_limit: 0, create_serial_num }.to_bytes())
            .map_err(|e| StoreError::io(idx_path.clone(), e))?;

        Ok(Self {
            file_id,
            dat_path,
            idx_path,
            config,
            create_serial_num,
            sync_writes,
            write_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
            state: Mutex::new(WriteState {
                current: Chunk::new(0, config.max_chunk_bytes),
                next_chunk_id: 1,
                flushed: Vec::new(),
                dat_file,
                idx_file,
                dat_offset: 0,
                doc_id_limit: 0,
                pending_last_serial: create_serial_num,
                reader: None,
            }),
            executor: SequentialExecutor::new(),
        })
    }

    pub fn file_id(&self) -> u16 {
        self.file_id
    }

    pub fn dat_path(&self) -> &Path {
        &self.dat_path
    }

    /// Bytes on disk plus the still-unflushed active chunk — an upper bound
    /// used to decide when this segment has grown enough to rotate.
    pub fn approx_size(&self) -> u64 {
        let st = self.state.lock();
        st.dat_offset + st.current.len() as u64
    }

    /// Append `bytes` under `lid`, rotating the active chunk first if it has
    /// no room left, and publish the new location to `index` immediately —
    /// a document is visible to readers as soon as it's in the in-memory
    /// chunk, ahead of that chunk's eventual flush to disk.
    pub fn append(&self, lid: Lid, bytes: &[u8], serial_num: u64, index: &LidIndex) -> Result<()> {
        let _wg = self.write_lock.lock();
        let mut st = self.state.lock();
        if !st.current.has_room(bytes.len()) {
            self.flush_locked(&mut st)?;
        }
        st.pending_last_serial = st.pending_last_serial.max(serial_num);
        let meta = st.current.append(lid, bytes);
        let chunk_id = st.current.id();
        drop(st);
        let info = LidInfo::new(self.file_id, chunk_id, meta.size)?;
        index.set(lid, info);
        let mut st = self.state.lock();
        if lid + 1 > st.doc_id_limit {
            st.doc_id_limit = lid + 1;
        }
        Ok(())
    }

    /// Force the active chunk to disk even if it still has room. A no-op if
    /// nothing has been appended since the last flush.
    pub fn flush(&self) -> Result<()> {
        let _wg = self.write_lock.lock();
        let mut st = self.state.lock();
        self.flush_locked(&mut st)
    }

    fn flush_locked(&self, st: &mut WriteState) -> Result<()> {
        let _fg = self.flush_lock.lock();
        if st.current.is_empty() {
            return Ok(());
        }
        let last_serial = st.pending_last_serial;
        let entries: Vec<crate::chunk::Entry> = st.current.entries().to_vec();
        let num_entries = entries.len() as u32;
        let offset = st.dat_offset;
        let sync_writes = self.sync_writes;
        let compression = self.config.compression;
        let next_id = st.next_chunk_id;

        // Pack (compress/frame) the finished chunk on the segment's
        // sequential worker, so compression work never races the disk
        // writes for the chunk ahead of or behind it. Taking ownership of
        // the chunk avoids moving a `MutexGuard` into the worker thread.
        let mut finished = std::mem::replace(&mut st.current, Chunk::new(next_id, self.config.max_chunk_bytes));
        let framed = self
            .executor
            .submit_and_wait(move || finished.pack(last_serial, compression))?;

        st.dat_file
            .write_all(&framed)
            .map_err(|e| StoreError::io(self.dat_path.clone(), e))?;
        if sync_writes {
            st.dat_file
                .sync_data()
                .map_err(|e| StoreError::io(self.dat_path.clone(), e))?;
        }

        let record = ChunkIndexRecord {
            offset_in_dat: offset,
            last_serial,
            size: framed.len() as u32,
            num_entries,
        };
        st.idx_file
            .write_all(&record.to_bytes())
            .map_err(|e| StoreError::io(self.idx_path.clone(), e))?;
        for entry in &entries {
            st.idx_file
                .write_all(&LidMetaRecord { lid: entry.lid, size: entry.net_size() }.to_bytes())
                .map_err(|e| StoreError::io(self.idx_path.clone(), e))?;
        }
        if sync_writes {
            st.idx_file
                .sync_data()
                .map_err(|e| StoreError::io(self.idx_path.clone(), e))?;
        }

        st.dat_offset += framed.len() as u64;
        st.flushed.push(record);

        match &mut st.reader {
            Some(r) => r.remap()?,
            None => st.reader = Some(MmapRandReadDynamic::open(&self.dat_path)?),
        }

        st.next_chunk_id += 1;
        st.pending_last_serial = last_serial;
        Ok(())
    }

    pub fn read(&self, lid: Lid, info: LidInfo) -> Result<Vec<u8>> {
        debug_assert_eq!(info.file_id(), self.file_id);
        let st = self.state.lock();
        if info.chunk_id() == st.current.id() {
            return st
                .current
                .read(lid)
                .map(|b| b.to_vec())
                .ok_or_else(|| StoreError::corruption(format!("lid {lid} missing from active chunk")));
        }
        let record = st
            .flushed
            .get(info.chunk_id() as usize)
            .ok_or_else(|| StoreError::corruption(format!("no flushed chunk {}", info.chunk_id())))?;
        let reader = st
            .reader
            .as_ref()
            .ok_or_else(|| StoreError::corruption("no flushed data yet"))?;
        let mut framed = vec![0u8; record.size as usize];
        reader.read_at(&mut framed, record.offset_in_dat)?;
        let unpacked = crate::chunk_format::unpack(&framed, true)?;
        let chunk = Chunk::from_payload(info.chunk_id(), &unpacked.bytes)?;
        chunk
            .read(lid)
            .map(|b| b.to_vec())
            .ok_or_else(|| StoreError::corruption(format!("lid {lid} missing from its recorded chunk")))
    }

    /// Decode every chunk flushed to disk so far (the still-open active
    /// chunk is never visited — callers that need it included should call
    /// [`Self::flush`] first) and forward each lid's most recent write
    /// within that chunk to `sink`.
    pub fn visit_flushed(&self, mut sink: impl FnMut(u32, Lid, &[u8], u64) -> Result<()>) -> Result<()> {
        let st = self.state.lock();
        let reader = match &st.reader {
            Some(r) => r,
            None => return Ok(()),
        };
        for (chunk_id, record) in st.flushed.iter().enumerate() {
            let mut framed = vec![0u8; record.size as usize];
            reader.read_at(&mut framed, record.offset_in_dat)?;
            let unpacked = crate::chunk_format::unpack(&framed, true)?;
            let chunk = Chunk::from_payload(chunk_id as u32, &unpacked.bytes)?;
            let last_serial = chunk.last_serial();
            for entry in chunk.unique_entries() {
                sink(chunk_id as u32, entry.lid, chunk.payload_of(&entry), last_serial)?;
            }
        }
        Ok(())
    }

    /// Decode the still-open active chunk in memory and forward each lid's
    /// most recent write within it to `sink` — the counterpart to
    /// `visit_flushed` for entries that have been appended but not yet
    /// written to disk. Without this, `visit` would miss any document only
    /// present in the active chunk even though `read` already returns it.
    pub fn visit_active(&self, mut sink: impl FnMut(u32, Lid, &[u8], u64) -> Result<()>) -> Result<()> {
        let st = self.state.lock();
        let chunk_id = st.current.id();
        let last_serial = st.pending_last_serial;
        for entry in st.current.unique_entries() {
            sink(chunk_id, entry.lid, st.current.payload_of(&entry), last_serial)?;
        }
        Ok(())
    }

    /// Flush any pending data, finalize the `.idx` header with the true
    /// `docIdLimit`, and reopen the result read-only as a [`FileChunk`].
    pub fn freeze(self, rand_read: crate::config::RandReadKind) -> Result<FileChunk> {
        {
            let mut st = self.state.lock();
            self.flush_locked(&mut st)?;
            use std::io::{Seek, SeekFrom};
            st.idx_file
                .seek(SeekFrom::Start(0))
                .map_err(|e| StoreError::io(self.idx_path.clone(), e))?;
            st.idx_file
                .write_all(&FileHeader {
                    doc_id_limit: st.doc_id_limit,
                    create_serial_num: self.create_serial_num,
                }.to_bytes())
                .map_err(|e| StoreError::io(self.idx_path.clone(), e))?;
            st.idx_file
                .sync_all()
                .map_err(|e| StoreError::io(self.idx_path.clone(), e))?;
            st.dat_file
                .sync_all()
                .map_err(|e| StoreError::io(self.dat_path.clone(), e))?;
        }
        FileChunk::open(self.file_id, &self.dat_path, &self.idx_path, rand_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RandReadKind;

    #[test]
    fn append_then_read_back_before_flush() {
        let dir = tempfile::tempdir().unwrap();
        let wfc = WriteableFileChunk::create(
            0,
            dir.path().join("0.dat"),
            dir.path().join("0.idx"),
            FileChunkConfig::default(),
            0,
            false,
        )
        .unwrap();
        let index = LidIndex::new();
        wfc.append(1, b"hello", 1, &index).unwrap();
        let info = index.get(1);
        assert_eq!(wfc.read(1, info).unwrap(), b"hello");
    }

    #[test]
    fn freeze_produces_a_readable_file_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let wfc = WriteableFileChunk::create(
            0,
            dir.path().join("0.dat"),
            dir.path().join("0.idx"),
            FileChunkConfig::default(),
            0,
            false,
        )
        .unwrap();
        let index = LidIndex::new();
        wfc.append(1, b"hello", 1, &index).unwrap();
        wfc.append(2, b"world", 2, &index).unwrap();
        let fc = wfc.freeze(RandReadKind::Normal).unwrap();
        let fresh_index = LidIndex::new();
        fc.update_lid_map(&fresh_index);
        assert_eq!(fc.read(1, fresh_index.get(1)).unwrap(), b"hello");
        assert_eq!(fc.read(2, fresh_index.get(2)).unwrap(), b"world");
    }

    #[test]
    fn rotation_happens_when_chunk_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = FileChunkConfig::default();
        cfg.max_chunk_bytes = 32;
        let wfc = WriteableFileChunk::create(
            0,
            dir.path().join("0.dat"),
            dir.path().join("0.idx"),
            cfg,
            0,
            false,
        )
        .unwrap();
        let index = LidIndex::new();
        for lid in 0..20u32 {
            wfc.append(lid, b"0123456789", lid as u64, &index).unwrap();
        }
        let fc = wfc.freeze(RandReadKind::Normal).unwrap();
        assert!(fc.num_chunks() > 1);
    }
}
