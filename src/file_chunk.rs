//! A closed (read-only) segment: one `.dat`/`.idx` file pair plus the
//! in-memory chunk directory parsed out of the `.idx` file.
//!
//! `FileChunk` never re-reads its `.idx` file after `open`; the directory it
//! builds there is immutable for the rest of the segment's life. Only
//! `WriteableFileChunk` (the still-growing segment) appends to a file's
//! `.idx`/`.dat` pair — once it freezes, the result is a plain `FileChunk`.

use std::path::{Path, PathBuf};

use crate::chunk::Chunk;
use crate::chunk_format;
use crate::config::RandReadKind;
use crate::error::{Result, StoreError};
use crate::header::{ChunkIndexRecord, FileHeader, LidMetaRecord, CHUNK_INDEX_RECORD_LEN, FILE_HEADER_LEN, LID_META_RECORD_LEN};
use crate::lid::{Lid, LidInfo};
use crate::lid_index::LidIndex;
use crate::randread::{DirectIoRandRead, FileRandRead, MmapRandRead, NormalRandRead};

struct ChunkDirEntry {
    record: ChunkIndexRecord,
    lids: Vec<LidMetaRecord>,
}

pub struct FileChunk {
    file_id: u16,
    dat_path: PathBuf,
    header: FileHeader,
    chunks: Vec<ChunkDirEntry>,
    reader: Box<dyn FileRandRead>,
}

/// Parses an `.idx` file's header plus its chunk/lid record stream,
/// stopping cleanly (rather than erroring) at the first sign of a torn
/// trailing record — the crash-recovery scenario where the process died
/// mid-write to the `.idx` file.
fn parse_idx(bytes: &[u8]) -> Result<(FileHeader, Vec<ChunkDirEntry>)> {
    if bytes.len() < FILE_HEADER_LEN {
        return Err(StoreError::corruption("idx file shorter than its header"));
    }
    let header = FileHeader::from_bytes(&bytes[..FILE_HEADER_LEN])?;
    let mut pos = FILE_HEADER_LEN;
    let mut chunks = Vec::new();
    while pos < bytes.len() {
        if pos + CHUNK_INDEX_RECORD_LEN > bytes.len() {
            tracing::warn!(offset = pos, "torn chunk-index record tail, truncating");
            break;
        }
        let record = ChunkIndexRecord::from_bytes(&bytes[pos..pos + CHUNK_INDEX_RECORD_LEN])?;
        pos += CHUNK_INDEX_RECORD_LEN;
        let lids_len = record.num_entries as usize * LID_META_RECORD_LEN;
        if pos + lids_len > bytes.len() {
            tracing::warn!(offset = pos, "torn lid-record tail, dropping incomplete chunk");
            break;
        }
        let mut lids = Vec::with_capacity(record.num_entries as usize);
        for i in 0..record.num_entries as usize {
            let start = pos + i * LID_META_RECORD_LEN;
            lids.push(LidMetaRecord::from_bytes(
                &bytes[start..start + LID_META_RECORD_LEN],
            )?);
        }
        pos += lids_len;
        chunks.push(ChunkDirEntry { record, lids });
    }
    Ok((header, chunks))
}

fn open_reader(path: &Path, kind: RandReadKind) -> Result<Box<dyn FileRandRead>> {
    Ok(match kind {
        RandReadKind::Normal => Box::new(NormalRandRead::open(path)?),
        RandReadKind::DirectIo => Box::new(DirectIoRandRead::open(path)?),
        RandReadKind::Mmap => Box::new(MmapRandRead::open(path)?),
    })
}

impl FileChunk {
    pub fn open(file_id: u16, dat_path: impl AsRef<Path>, idx_path: impl AsRef<Path>, rand_read: RandReadKind) -> Result<Self> {
        let dat_path = dat_path.as_ref().to_path_buf();
        let idx_path = idx_path.as_ref().to_path_buf();
        let idx_bytes = std::fs::read(&idx_path).map_err(|e| StoreError::io(idx_path.clone(), e))?;
        let (header, chunks) = parse_idx(&idx_bytes)?;
        let reader = open_reader(&dat_path, rand_read)?;
        Ok(Self {
            file_id,
            dat_path,
            header,
            chunks,
            reader,
        })
    }

    pub fn file_id(&self) -> u16 {
        self.file_id
    }

    pub fn header(&self) -> FileHeader {
        self.header
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn disk_footprint(&self) -> u64 {
        self.reader.len()
    }

    /// The highest `lastSerial` recorded across this segment's chunks, or 0
    /// if it holds none — used by `LogDataStore::open` to resume serial
    /// numbering after a restart.
    pub fn max_last_serial(&self) -> u64 {
        self.chunks.iter().map(|e| e.record.last_serial).max().unwrap_or(0)
    }

    pub fn dat_path(&self) -> &Path {
        &self.dat_path
    }

    /// Replay this segment's chunk directory into `index`, publishing a
    /// `LidInfo` for every lid this segment last wrote. Later segments
    /// should be replayed after earlier ones so their writes win, matching
    /// wall-clock write order.
    pub fn update_lid_map(&self, index: &LidIndex) {
        index.raise_doc_id_limit(self.header.doc_id_limit);
        for (chunk_id, entry) in self.chunks.iter().enumerate() {
            for lm in &entry.lids {
                let info = LidInfo::new(self.file_id, chunk_id as u32, lm.size)
                    .expect("chunk/lid bounds already validated at write time");
                index.set(lm.lid, info);
            }
        }
    }

    fn read_chunk(&self, chunk_id: u32) -> Result<Chunk> {
        let entry = self
            .chunks
            .get(chunk_id as usize)
            .ok_or_else(|| StoreError::corruption(format!("no such chunk id {chunk_id}")))?;
        let mut framed = vec![0u8; entry.record.size as usize];
        self.reader.read_at(&mut framed, entry.record.offset_in_dat)?;
        let unpacked = chunk_format::unpack(&framed, true)?;
        Chunk::from_payload(chunk_id, &unpacked.bytes)
    }

    /// Read the payload for `lid`, located by `info` (which must name this
    /// segment's `file_id`).
    pub fn read(&self, lid: Lid, info: LidInfo) -> Result<Vec<u8>> {
        debug_assert_eq!(info.file_id(), self.file_id);
        let chunk = self.read_chunk(info.chunk_id())?;
        chunk
            .read(lid)
            .map(|b| b.to_vec())
            .ok_or_else(|| StoreError::corruption(format!("lid {lid} missing from its recorded chunk")))
    }

    /// Decode every chunk in the segment and forward each lid's most recent
    /// write within that chunk to `sink`. Used by compaction, which needs
    /// every chunk's content regardless of whether the live index still
    /// points at it (the caller filters against the live index itself).
    pub fn visit_all(&self, mut sink: impl FnMut(u32, Lid, &[u8], u64) -> Result<()>) -> Result<()> {
        for chunk_id in 0..self.chunks.len() as u32 {
            let chunk = self.read_chunk(chunk_id)?;
            let last_serial = chunk.last_serial();
            for entry in chunk.unique_entries() {
                let payload = chunk.payload_of(&entry);
                sink(chunk_id, entry.lid, payload, last_serial)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionConfig;

    fn write_segment(dir: &Path, file_id: u16, docs: &[(u32, &[u8])]) -> (PathBuf, PathBuf) {
        let dat_path = dir.join(format!("{file_id}.dat"));
        let idx_path = dir.join(format!("{file_id}.idx"));

        let mut chunk = Chunk::new(0, 4096);
        for (lid, bytes) in docs {
            chunk.append(*lid, bytes);
        }
        let framed = chunk.pack(1, CompressionConfig::none()).unwrap();

        std::fs::write(&dat_path, &framed).unwrap();

        let mut idx_bytes = FileHeader {
            doc_id_limit: docs.iter().map(|(l, _)| l + 1).max().unwrap_or(0),
            create_serial_num: 1,
        }
        .to_bytes()
        .to_vec();
        idx_bytes.extend_from_slice(&ChunkIndexRecord {
            offset_in_dat: 0,
            last_serial: 1,
            size: framed.len() as u32,
            num_entries: docs.len() as u32,
        }.to_bytes());
        for (lid, bytes) in docs {
            idx_bytes.extend_from_slice(&LidMetaRecord {
                lid: *lid,
                size: bytes.len() as u32,
            }.to_bytes());
        }
        std::fs::write(&idx_path, &idx_bytes).unwrap();
        (dat_path, idx_path)
    }

    #[test]
    fn opens_and_reads_back_a_segment() {
        let dir = tempfile::tempdir().unwrap();
        let (dat, idx) = write_segment(dir.path(), 0, &[(1, b"alpha"), (2, b"beta")]);
        let fc = FileChunk::open(0, dat, idx, RandReadKind::Normal).unwrap();
        assert_eq!(fc.num_chunks(), 1);

        let index = LidIndex::new();
        fc.update_lid_map(&index);
        let info = index.get(1);
        assert!(info.is_valid());
        assert_eq!(fc.read(1, info).unwrap(), b"alpha");
        assert_eq!(fc.read(2, index.get(2)).unwrap(), b"beta");
    }

    #[test]
    fn visit_all_sees_every_lid_once() {
        let dir = tempfile::tempdir().unwrap();
        let (dat, idx) = write_segment(dir.path(), 3, &[(5, b"x"), (6, b"y")]);
        let fc = FileChunk::open(3, dat, idx, RandReadKind::Normal).unwrap();
        let mut seen = Vec::new();
        fc.visit_all(|_chunk_id, lid, bytes, _serial| {
            seen.push((lid, bytes.to_vec()));
            Ok(())
        })
        .unwrap();
        seen.sort_by_key(|(l, _)| *l);
        assert_eq!(seen, vec![(5, b"x".to_vec()), (6, b"y".to_vec())]);
    }
}
