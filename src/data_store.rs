//! The storage-engine seam: every operation a document store needs from the
//! underlying segment set, independent of caching or document semantics.

use crate::error::Result;
use crate::lid::Lid;

/// Snapshot of how much space a store is using, split between what readers
/// can address without any I/O (the index) and what's actually on disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryUsage {
    pub index_bytes: u64,
    pub disk_bytes: u64,
}

pub trait IDataStore: Send + Sync {
    /// `None` if `lid` was never written or has been removed.
    fn read(&self, lid: Lid) -> Result<Option<Vec<u8>>>;

    /// Returns the serial number assigned to this write.
    fn write(&self, lid: Lid, bytes: &[u8]) -> Result<u64>;

    /// Marks `lid` as removed; returns the serial number assigned to the
    /// tombstone.
    fn remove(&self, lid: Lid) -> Result<u64>;

    /// Force all buffered writes to disk and return the serial number now
    /// durable.
    fn flush(&self) -> Result<u64>;

    /// Begin (and, in this synchronous implementation, complete) a flush up
    /// to and including `serial_num`.
    fn init_flush(&self, serial_num: u64) -> Result<()>;

    /// Invoke `visitor` for every live `(lid, bytes)` pair in the store, in
    /// no particular order.
    fn visit(&self, visitor: &mut dyn FnMut(Lid, &[u8]) -> Result<()>) -> Result<()>;

    /// Compact segments whose live/total byte ratio has grown too bloated.
    fn compact_bloat(&self) -> Result<()>;

    /// Compact segments whose bucket spread has grown too uneven.
    fn compact_spread(&self) -> Result<()>;

    /// Invalidate every lid at or beyond `new_limit`.
    fn compact_lid_space(&self, new_limit: u32) -> Result<()>;

    /// Physically reclaim index capacity beyond the current doc-id limit.
    fn shrink_lid_space(&self) -> Result<()>;

    fn memory_usage(&self) -> MemoryUsage;

    fn doc_id_limit(&self) -> u32;
}
