//! Packed `(fileId, chunkId, size)` triples addressed by LID.

use crate::error::{Result, StoreError};

pub type Lid = u32;

const NUM_FILE_BITS: u32 = 16;
const NUM_CHUNK_BITS: u32 = 22;
const NUM_SIZE_BITS: u32 = 26;
const SIZE_SHIFT: u32 = 32 - NUM_SIZE_BITS; // 6

const FILE_ID_MASK: u64 = (1 << NUM_FILE_BITS) - 1;
const CHUNK_ID_MASK: u64 = (1 << NUM_CHUNK_BITS) - 1;
const SIZE_MASK: u64 = (1 << NUM_SIZE_BITS) - 1;

const CHUNK_SHIFT: u32 = NUM_FILE_BITS;
const SIZE_FIELD_SHIFT: u32 = NUM_FILE_BITS + NUM_CHUNK_BITS;

/// A packed 64-bit `{fileId:16, chunkId:22, size:26}` triple. `size` is
/// stored rounded up to units of `1 << SIZE_SHIFT` bytes; zero means the LID
/// was removed. The all-ones bit pattern is reserved for "never written".
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LidInfo(u64);

impl LidInfo {
    pub const INVALID: LidInfo = LidInfo(u64::MAX);

    pub fn new(file_id: u32, chunk_id: u32, size: u32) -> Result<Self> {
        if file_id as u64 > FILE_ID_MASK {
            return Err(StoreError::state(format!(
                "fileId {file_id} exceeds limit {}",
                FILE_ID_MASK + 1
            )));
        }
        if chunk_id as u64 > CHUNK_ID_MASK {
            return Err(StoreError::state(format!(
                "chunkId {chunk_id} exceeds limit {}",
                CHUNK_ID_MASK + 1
            )));
        }
        let size_limit = u32::MAX - ((2u32 << SIZE_SHIFT) - 2);
        if size > size_limit {
            return Err(StoreError::state(format!(
                "size {size} exceeds limit {size_limit}"
            )));
        }
        let aligned = compute_aligned_size(size);
        let rep = (file_id as u64)
            | ((chunk_id as u64) << CHUNK_SHIFT)
            | ((aligned as u64) << SIZE_FIELD_SHIFT);
        Ok(LidInfo(rep))
    }

    /// An empty, but valid, entry: used to mark a removed LID.
    pub fn empty() -> Self {
        LidInfo(0)
    }

    pub fn from_raw(rep: u64) -> Self {
        LidInfo(rep)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn file_id(self) -> u32 {
        (self.0 & FILE_ID_MASK) as u32
    }

    pub fn chunk_id(self) -> u32 {
        ((self.0 >> CHUNK_SHIFT) & CHUNK_ID_MASK) as u32
    }

    /// Decoded size in bytes, rounded up to the alignment at construction
    /// time.
    pub fn size(self) -> u32 {
        (((self.0 >> SIZE_FIELD_SHIFT) & SIZE_MASK) as u32) << SIZE_SHIFT
    }

    pub fn is_empty(self) -> bool {
        self.size() == 0
    }

    pub fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }

    pub fn file_id_limit() -> u32 {
        1 << NUM_FILE_BITS
    }

    pub fn chunk_id_limit() -> u32 {
        1 << NUM_CHUNK_BITS
    }
}

/// `(fileId, chunkId)` equality, ignoring the size field — used to detect
/// whether a compacted entry still matches the live index.
impl LidInfo {
    pub fn same_location(self, other: LidInfo) -> bool {
        self.file_id() == other.file_id() && self.chunk_id() == other.chunk_id()
    }
}

fn compute_aligned_size(sz: u32) -> u32 {
    ((sz as u64 + ((1u64 << SIZE_SHIFT) - 1)) >> SIZE_SHIFT) as u32
}

/// A `LidInfo` paired with the LID it was looked up under; produced when
/// scanning an index range for bulk reads or compaction.
#[derive(Clone, Copy, Debug)]
pub struct LidInfoWithLid {
    pub info: LidInfo,
    pub lid: Lid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_extremes() {
        let li = LidInfo::new(65535, 4194303, 63).unwrap();
        assert_eq!(li.file_id(), 65535);
        assert_eq!(li.chunk_id(), 4194303);
        assert_eq!(li.size(), 64);
    }

    #[test]
    fn rejects_oversized_file_id() {
        assert!(LidInfo::new(65536, 0, 0).is_err());
    }

    #[test]
    fn rejects_oversized_chunk_id() {
        assert!(LidInfo::new(0, 1 << 22, 0).is_err());
    }

    #[test]
    fn equality_ignores_size() {
        let a = LidInfo::new(1, 2, 10).unwrap();
        let b = LidInfo::new(1, 2, 999).unwrap();
        assert!(a.same_location(b));
    }

    #[test]
    fn invalid_is_not_valid() {
        assert!(!LidInfo::INVALID.is_valid());
        assert!(LidInfo::empty().is_valid());
        assert!(LidInfo::empty().is_empty());
    }

    #[test]
    fn zero_size_round_trips_to_zero() {
        let li = LidInfo::new(0, 0, 0).unwrap();
        assert_eq!(li.size(), 0);
        assert!(li.is_empty());
    }
}
