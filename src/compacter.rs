//! Forwards a segment's still-live entries into a new one during
//! compaction.
//!
//! [`Compacter`] forwards entries in the order `FileChunk::visit_all`
//! produces them (source-chunk order). [`BucketCompacter`] stages them
//! through a [`StoreByBucket`] first so documents belonging to the same
//! bucket end up adjacent in the destination segment, at the cost of
//! buffering the whole segment's live entries in memory before forwarding
//! any of them.

use crate::bucketizer::Bucketizer;
use crate::error::Result;
use crate::file_chunk::FileChunk;
use crate::lid::Lid;
use crate::lid_index::LidIndex;
use crate::store_by_bucket::StoreByBucket;

/// Destination for compacted entries — typically a
/// [`crate::writeable_file_chunk::WriteableFileChunk`] being built to
/// replace one or more source segments.
pub trait IWriteData {
    fn write(&mut self, lid: Lid, bytes: &[u8], serial: u64) -> Result<()>;
}

/// True only if `index`'s current entry for `lid` still points at
/// `(source_file_id, chunk_id)` — i.e. this entry hasn't since been
/// overwritten or removed and is the one worth carrying forward.
pub(crate) fn still_live(index: &LidIndex, lid: Lid, source_file_id: u16, chunk_id: u32) -> bool {
    let current = index.get(lid);
    current.is_valid() && !current.is_empty() && current.file_id() == source_file_id && current.chunk_id() == chunk_id
}

pub struct Compacter<'a, W: IWriteData> {
    index: &'a LidIndex,
    source_file_id: u16,
    writer: &'a mut W,
}

impl<'a, W: IWriteData> Compacter<'a, W> {
    pub fn new(index: &'a LidIndex, source_file_id: u16, writer: &'a mut W) -> Self {
        Self { index, source_file_id, writer }
    }

    pub fn run(&mut self, source: &FileChunk) -> Result<()> {
        let index = self.index;
        let source_file_id = self.source_file_id;
        let writer = &mut self.writer;
        source.visit_all(|chunk_id, lid, bytes, serial| {
            if still_live(index, lid, source_file_id, chunk_id) {
                writer.write(lid, bytes, serial)?;
            }
            Ok(())
        })
    }
}

pub struct BucketCompacter<'a, W: IWriteData> {
    index: &'a LidIndex,
    source_file_id: u16,
    bucketizer: &'a dyn Bucketizer,
    writer: &'a mut W,
}

impl<'a, W: IWriteData> BucketCompacter<'a, W> {
    pub fn new(index: &'a LidIndex, source_file_id: u16, bucketizer: &'a dyn Bucketizer, writer: &'a mut W) -> Self {
        Self { index, source_file_id, bucketizer, writer }
    }

    pub fn run(&mut self, source: &FileChunk) -> Result<()> {
        let mut staging = StoreByBucket::new(self.bucketizer);
        let index = self.index;
        let source_file_id = self.source_file_id;
        source.visit_all(|chunk_id, lid, bytes, serial| {
            if still_live(index, lid, source_file_id, chunk_id) {
                staging.add(lid, chunk_id, bytes.to_vec(), serial);
            }
            Ok(())
        })?;
        for (lid, _chunk_id, bytes, serial) in staging.drain() {
            self.writer.write(lid, &bytes, serial)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucketizer::ModuloBucketizer;
    use crate::config::CompressionConfig;

    struct VecWriter(Vec<(Lid, Vec<u8>, u64)>);
    impl IWriteData for VecWriter {
        fn write(&mut self, lid: Lid, bytes: &[u8], serial: u64) -> Result<()> {
            self.0.push((lid, bytes.to_vec(), serial));
            Ok(())
        }
    }

    fn build_segment(dir: &std::path::Path, file_id: u16, docs: &[(u32, &[u8])]) -> FileChunk {
        let dat_path = dir.join(format!("{file_id}.dat"));
        let idx_path = dir.join(format!("{file_id}.idx"));
        let mut chunk = crate::chunk::Chunk::new(0, 4096);
        for (lid, bytes) in docs {
            chunk.append(*lid, bytes);
        }
        let framed = chunk.pack(1, CompressionConfig::none()).unwrap();
        std::fs::write(&dat_path, &framed).unwrap();
        let mut idx_bytes = crate::header::FileHeader {
            doc_id_limit: docs.iter().map(|(l, _)| l + 1).max().unwrap_or(0),
            create_serial_num: 1,
        }
        .to_bytes()
        .to_vec();
        idx_bytes.extend_from_slice(
            &crate::header::ChunkIndexRecord {
                offset_in_dat: 0,
                last_serial: 1,
                size: framed.len() as u32,
                num_entries: docs.len() as u32,
            }
            .to_bytes(),
        );
        for (lid, bytes) in docs {
            idx_bytes.extend_from_slice(
                &crate::header::LidMetaRecord { lid: *lid, size: bytes.len() as u32 }.to_bytes(),
            );
        }
        std::fs::write(&idx_path, &idx_bytes).unwrap();
        FileChunk::open(file_id, dat_path, idx_path, crate::config::RandReadKind::Normal).unwrap()
    }

    #[test]
    fn compacter_skips_overwritten_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fc = build_segment(dir.path(), 0, &[(1, b"old"), (2, b"keep")]);
        let index = LidIndex::new();
        fc.update_lid_map(&index);
        // simulate lid 1 being overwritten in a later segment
        index.set(1, crate::lid::LidInfo::new(1, 0, 3).unwrap());

        let mut writer = VecWriter(Vec::new());
        let mut compacter = Compacter::new(&index, 0, &mut writer);
        compacter.run(&fc).unwrap();
        assert_eq!(writer.0.len(), 1);
        assert_eq!(writer.0[0].0, 2);
    }

    #[test]
    fn bucket_compacter_forwards_all_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fc = build_segment(dir.path(), 0, &[(1, b"a"), (2, b"b"), (3, b"c")]);
        let index = LidIndex::new();
        fc.update_lid_map(&index);

        let bucketizer = ModuloBucketizer::new(2);
        let mut writer = VecWriter(Vec::new());
        let mut compacter = BucketCompacter::new(&index, 0, &bucketizer, &mut writer);
        compacter.run(&fc).unwrap();
        let mut lids: Vec<_> = writer.0.iter().map(|(l, _, _)| *l).collect();
        lids.sort();
        assert_eq!(lids, vec![1, 2, 3]);
    }
}
