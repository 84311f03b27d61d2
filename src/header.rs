//! Fixed binary headers and `.idx` record framing.
//!
//! Every `.dat`/`.idx` pair starts with a [`FileHeader`]: a magic, a version
//! byte, the `docIdLimit` the segment was created with, and the serial
//! number of its first write. The `.idx` file then holds one
//! [`ChunkIndexRecord`] per chunk flushed to the `.dat` file, each
//! immediately followed by `num_entries` [`LidMetaRecord`]s — replaying
//! those two records in order is how `FileChunk::update_lid_map`
//! reconstructs the in-memory LID index on startup without touching the
//! (possibly much larger) `.dat` file at all.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, StoreError};

const HEADER_MAGIC: u32 = 0x444f_4353; // "DOCS"
const HEADER_VERSION: u8 = 1;
pub const FILE_HEADER_LEN: usize = 4 + 1 + 4 + 8;

/// Per-segment metadata written once, at the head of both the `.dat` and the
/// `.idx` file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub doc_id_limit: u32,
    pub create_serial_num: u64,
}

impl FileHeader {
    pub fn to_bytes(self) -> [u8; FILE_HEADER_LEN] {
        let mut buf = [0u8; FILE_HEADER_LEN];
        BigEndian::write_u32(&mut buf[0..4], HEADER_MAGIC);
        buf[4] = HEADER_VERSION;
        BigEndian::write_u32(&mut buf[5..9], self.doc_id_limit);
        BigEndian::write_u64(&mut buf[9..17], self.create_serial_num);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < FILE_HEADER_LEN {
            return Err(StoreError::corruption("file header shorter than expected"));
        }
        let magic = BigEndian::read_u32(&buf[0..4]);
        if magic != HEADER_MAGIC {
            return Err(StoreError::corruption("bad file header magic"));
        }
        let version = buf[4];
        if version != HEADER_VERSION {
            return Err(StoreError::corruption(format!(
                "unsupported file header version {version}"
            )));
        }
        Ok(FileHeader {
            doc_id_limit: BigEndian::read_u32(&buf[5..9]),
            create_serial_num: BigEndian::read_u64(&buf[9..17]),
        })
    }
}

/// One chunk's `.idx` record: where its framed bytes live in the `.dat`
/// file, the serial number of its last write, its framed size, and how many
/// [`LidMetaRecord`]s follow it.
///
/// Field order is `(offsetInDat, lastSerial, size, numEntries)` — chosen so
/// the two `u64`s (the ones a reader needs to seek the `.dat` file and order
/// chunks by recency) sit first, ahead of the two `u32`s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkIndexRecord {
    pub offset_in_dat: u64,
    pub last_serial: u64,
    pub size: u32,
    pub num_entries: u32,
}

pub const CHUNK_INDEX_RECORD_LEN: usize = 8 + 8 + 4 + 4;

impl ChunkIndexRecord {
    pub fn to_bytes(self) -> [u8; CHUNK_INDEX_RECORD_LEN] {
        let mut buf = [0u8; CHUNK_INDEX_RECORD_LEN];
        BigEndian::write_u64(&mut buf[0..8], self.offset_in_dat);
        BigEndian::write_u64(&mut buf[8..16], self.last_serial);
        BigEndian::write_u32(&mut buf[16..20], self.size);
        BigEndian::write_u32(&mut buf[20..24], self.num_entries);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < CHUNK_INDEX_RECORD_LEN {
            return Err(StoreError::TornRecord { offset: 0 });
        }
        Ok(ChunkIndexRecord {
            offset_in_dat: BigEndian::read_u64(&buf[0..8]),
            last_serial: BigEndian::read_u64(&buf[8..16]),
            size: BigEndian::read_u32(&buf[16..20]),
            num_entries: BigEndian::read_u32(&buf[20..24]),
        })
    }
}

/// One lid's placement within the chunk its enclosing [`ChunkIndexRecord`]
/// describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LidMetaRecord {
    pub lid: u32,
    pub size: u32,
}

pub const LID_META_RECORD_LEN: usize = 4 + 4;

impl LidMetaRecord {
    pub fn to_bytes(self) -> [u8; LID_META_RECORD_LEN] {
        let mut buf = [0u8; LID_META_RECORD_LEN];
        BigEndian::write_u32(&mut buf[0..4], self.lid);
        BigEndian::write_u32(&mut buf[4..8], self.size);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < LID_META_RECORD_LEN {
            return Err(StoreError::TornRecord { offset: 0 });
        }
        Ok(LidMetaRecord {
            lid: BigEndian::read_u32(&buf[0..4]),
            size: BigEndian::read_u32(&buf[4..8]),
        })
    }
}
