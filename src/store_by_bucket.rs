//! Buffers compacted entries by bucket so `BucketCompacter` can forward them
//! to the destination segment in bucket order, grouping a bucket's
//! documents together instead of leaving them scattered in source-chunk
//! order.
//!
//! Each shard accumulates in memory rather than spilling to its own
//! mini-log file; bounding shard memory during compaction of a very large
//! segment is future work, noted in this crate's design notes.

use crate::bucketizer::{Bucketizer, BucketId};
use crate::lid::Lid;

struct Entry {
    lid: Lid,
    chunk_id: u32,
    bytes: Vec<u8>,
    serial: u64,
}

pub struct StoreByBucket<'b> {
    bucketizer: &'b dyn Bucketizer,
    shards: Vec<Vec<Entry>>,
}

impl<'b> StoreByBucket<'b> {
    pub fn new(bucketizer: &'b dyn Bucketizer) -> Self {
        let shards = (0..bucketizer.num_buckets()).map(|_| Vec::new()).collect();
        Self { bucketizer, shards }
    }

    pub fn add(&mut self, lid: Lid, chunk_id: u32, bytes: Vec<u8>, serial: u64) {
        let BucketId(b) = self.bucketizer.bucket_of(lid);
        self.shards[b as usize % self.shards.len()].push(Entry { lid, chunk_id, bytes, serial });
    }

    /// Drain all shards in ascending bucket order, yielding each shard's
    /// entries in the order they were added. The `chunk_id` each entry was
    /// originally read from is carried along so a caller can re-verify it's
    /// still the live location before forwarding it.
    pub fn drain(mut self) -> impl Iterator<Item = (Lid, u32, Vec<u8>, u64)> {
        self.shards
            .drain(..)
            .flat_map(|shard| shard.into_iter())
            .map(|e| (e.lid, e.chunk_id, e.bytes, e.serial))
    }

    pub fn num_buckets(&self) -> usize {
        self.shards.len()
    }

    /// Ratio of the busiest shard's entry count to the average shard's —
    /// the bucket-spread metric `compactSpread` decisions are based on.
    pub fn spread(&self) -> f64 {
        let total: usize = self.shards.iter().map(|s| s.len()).sum();
        if total == 0 {
            return 1.0;
        }
        let avg = total as f64 / self.shards.len() as f64;
        let max = self.shards.iter().map(|s| s.len()).max().unwrap_or(0) as f64;
        if avg == 0.0 { 1.0 } else { max / avg }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucketizer::ModuloBucketizer;

    #[test]
    fn drains_in_bucket_order() {
        let bucketizer = ModuloBucketizer::new(4);
        let mut sbb = StoreByBucket::new(&bucketizer);
        sbb.add(5, 0, b"a".to_vec(), 1); // bucket 1
        sbb.add(4, 0, b"b".to_vec(), 2); // bucket 0
        sbb.add(9, 0, b"c".to_vec(), 3); // bucket 1
        let drained: Vec<_> = sbb.drain().collect();
        assert_eq!(drained[0].0, 4);
        assert_eq!(drained[1].0, 5);
        assert_eq!(drained[2].0, 9);
    }
}
