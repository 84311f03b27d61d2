//! The top-level segment-set orchestrator: owns the active writer segment,
//! the frozen (read-only) segments behind it, and the LID index all reads
//! and writes go through.
//!
//! A single `update_lock` serializes `write`/`remove`/compaction against
//! each other; reads never take it, going straight through the RCU
//! [`LidIndex`] and a [`GenerationHandler`] guard instead.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::bucketizer::{Bucketizer, ModuloBucketizer};
use crate::compacter;
use crate::config::{LogDataStoreConfig, RandReadKind};
use crate::data_store::{IDataStore, MemoryUsage};
use crate::error::{Result, StoreError};
use crate::file_chunk::FileChunk;
use crate::lid::Lid;
use crate::lid_index::LidIndex;
use crate::generation::GenerationHandler;
use crate::synclog::{NoopSyncProxy, SyncProxy};
use crate::writeable_file_chunk::WriteableFileChunk;

/// Adapts a destination [`WriteableFileChunk`] to the [`compacter::IWriteData`]
/// contract `Compacter`/`BucketCompacter` write through, threading the live
/// index they also need to publish each forwarded entry's new location.
struct DestWriter<'a> {
    dest: &'a WriteableFileChunk,
    index: &'a LidIndex,
}

impl<'a> compacter::IWriteData for DestWriter<'a> {
    fn write(&mut self, lid: Lid, bytes: &[u8], serial: u64) -> Result<()> {
        self.dest.append(lid, bytes, serial, self.index)
    }
}

pub struct LogDataStore {
    dir: PathBuf,
    config: LogDataStoreConfig,
    index: LidIndex,
    generation: GenerationHandler,
    update_lock: Mutex<()>,
    frozen: RwLock<Vec<Arc<FileChunk>>>,
    active: Mutex<Option<WriteableFileChunk>>,
    next_file_id: AtomicU16,
    next_serial: AtomicU64,
    sync: Arc<dyn SyncProxy>,
    bucketizer: Arc<dyn Bucketizer>,
}

fn discover_segments(dir: &Path, rand_read: RandReadKind) -> Result<Vec<FileChunk>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| StoreError::io(dir.to_path_buf(), e))? {
        let entry = entry.map_err(|e| StoreError::io(dir.to_path_buf(), e))?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "dat") {
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u16>().ok()) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    let mut segments = Vec::with_capacity(ids.len());
    for id in ids {
        let dat = dir.join(format!("{id}.dat"));
        let idx = dir.join(format!("{id}.idx"));
        if idx.exists() {
            segments.push(FileChunk::open(id, dat, idx, rand_read)?);
        }
    }
    Ok(segments)
}

impl LogDataStore {
    pub fn open(dir: impl AsRef<Path>, config: LogDataStoreConfig) -> Result<Self> {
        Self::open_with(dir, config, Arc::new(NoopSyncProxy), Arc::new(ModuloBucketizer::default()))
    }

    pub fn open_with(
        dir: impl AsRef<Path>,
        config: LogDataStoreConfig,
        sync: Arc<dyn SyncProxy>,
        bucketizer: Arc<dyn Bucketizer>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.clone(), e))?;

        let segments = discover_segments(&dir, config.tune.rand_read)?;
        let index = LidIndex::new();
        for seg in &segments {
            seg.update_lid_map(&index);
        }

        let next_id = segments.iter().map(|s| s.file_id()).max().map(|m| m + 1).unwrap_or(0);
        let next_serial = segments.iter().map(|s| s.max_last_serial()).max().map(|s| s + 1).unwrap_or(0);

        let active = WriteableFileChunk::create(
            next_id,
            dir.join(format!("{next_id}.dat")),
            dir.join(format!("{next_id}.idx")),
            config.file_config,
            next_serial,
            config.tune.sync_writes,
        )?;

        Ok(Self {
            dir,
            config,
            index,
            generation: GenerationHandler::new(),
            update_lock: Mutex::new(()),
            frozen: RwLock::new(segments.into_iter().map(Arc::new).collect()),
            active: Mutex::new(Some(active)),
            next_file_id: AtomicU16::new(next_id + 1),
            next_serial: AtomicU64::new(next_serial),
            sync,
            bucketizer,
        })
    }

    fn append_active(&self, lid: Lid, bytes: &[u8], serial: u64) -> Result<()> {
        let mut active_guard = self.active.lock();
        {
            let active = active_guard.as_ref().expect("active segment always present");
            active.append(lid, bytes, serial, &self.index)?;
        }
        let needs_rotation = active_guard
            .as_ref()
            .expect("active segment always present")
            .approx_size()
            >= self.config.max_file_size;
        if needs_rotation {
            self.rotate_locked(&mut active_guard)?;
        }
        Ok(())
    }

    fn rotate_locked(&self, active_guard: &mut Option<WriteableFileChunk>) -> Result<()> {
        let old = active_guard.take().expect("active segment always present");
        let old_id = old.file_id();
        let frozen_chunk = old.freeze(self.config.tune.rand_read)?;
        self.frozen.write().push(Arc::new(frozen_chunk));

        let new_id = self.next_file_id.fetch_add(1, Ordering::AcqRel);
        let serial = self.next_serial.load(Ordering::Acquire);
        let new_active = WriteableFileChunk::create(
            new_id,
            self.dir.join(format!("{new_id}.dat")),
            self.dir.join(format!("{new_id}.idx")),
            self.config.file_config,
            serial,
            self.config.tune.sync_writes,
        )?;
        *active_guard = Some(new_active);
        tracing::info!(old_segment = old_id, new_segment = new_id, "segment rotated");
        Ok(())
    }

    fn segment_bloat(&self, seg: &FileChunk) -> Result<f64> {
        let mut total = 0u64;
        let mut live = 0u64;
        let file_id = seg.file_id();
        seg.visit_all(|chunk_id, lid, bytes, _serial| {
            total += bytes.len() as u64;
            if compacter::still_live(&self.index, lid, file_id, chunk_id) {
                live += bytes.len() as u64;
            }
            Ok(())
        })?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(1.0 - (live as f64 / total as f64))
    }

    /// Bucket-spread of `seg`'s still-live entries: the sum, over each
    /// chunk, of the number of distinct buckets that chunk's live entries
    /// fall into, divided by `max(chunks touching a live bucket, distinct
    /// buckets overall)`. 1.0 when every bucket's entries are confined to a
    /// single chunk (perfectly sorted); grows toward the chunk count as
    /// buckets get scattered across more chunks.
    fn segment_spread(&self, seg: &FileChunk) -> Result<f64> {
        use std::collections::{HashMap, HashSet};
        let file_id = seg.file_id();
        let mut per_chunk: HashMap<u32, HashSet<crate::bucketizer::BucketId>> = HashMap::new();
        let mut all_buckets: HashSet<crate::bucketizer::BucketId> = HashSet::new();
        seg.visit_all(|chunk_id, lid, _bytes, _serial| {
            if compacter::still_live(&self.index, lid, file_id, chunk_id) {
                let bucket = self.bucketizer.bucket_of(lid);
                per_chunk.entry(chunk_id).or_default().insert(bucket);
                all_buckets.insert(bucket);
            }
            Ok(())
        })?;
        if all_buckets.is_empty() {
            return Ok(1.0);
        }
        let sum_distinct_per_chunk: usize = per_chunk.values().map(|s| s.len()).sum();
        let denom = per_chunk.len().max(all_buckets.len());
        Ok(sum_distinct_per_chunk as f64 / denom as f64)
    }

    /// Rewrite `file_id`'s still-live entries into a brand-new segment,
    /// dropping the dead ones, then reclaim the old segment's files once no
    /// in-flight read can still be using it.
    ///
    /// Held for the whole operation, `update_lock` keeps the set of live
    /// entries stable from the moment they're scanned to the moment
    /// they're republished in the new segment's location, so no concurrent
    /// write can race a forwarded entry's index update.
    pub fn compact_segment(&self, file_id: u16, bucket_ordered: bool) -> Result<()> {
        tracing::info!(file_id, bucket_ordered, "compaction starting");
        let _g = self.update_lock.lock();
        let source = {
            let frozen = self.frozen.read();
            match frozen.iter().find(|s| s.file_id() == file_id).cloned() {
                Some(s) => s,
                None => return Ok(()),
            }
        };

        let dest_id = self.next_file_id.fetch_add(1, Ordering::AcqRel);
        let dest = WriteableFileChunk::create(
            dest_id,
            self.dir.join(format!("{dest_id}.dat")),
            self.dir.join(format!("{dest_id}.idx")),
            self.config.file_config,
            self.next_serial.load(Ordering::Acquire),
            self.config.tune.sync_writes,
        )?;

        let mut writer = DestWriter { dest: &dest, index: &self.index };
        if bucket_ordered {
            let mut bucket_compacter =
                compacter::BucketCompacter::new(&self.index, file_id, self.bucketizer.as_ref(), &mut writer);
            bucket_compacter.run(&source)?;
        } else {
            let mut plain_compacter = compacter::Compacter::new(&self.index, file_id, &mut writer);
            plain_compacter.run(&source)?;
        }

        let dest_chunk = dest.freeze(self.config.tune.rand_read)?;
        {
            let mut frozen = self.frozen.write();
            frozen.retain(|s| s.file_id() != file_id);
            frozen.push(Arc::new(dest_chunk));
        }
        drop(source);

        let pre_bump = self.generation.bump();
        while self.generation.oldest_used_generation() <= pre_bump {
            std::thread::yield_now();
        }
        let _ = std::fs::remove_file(self.dir.join(format!("{file_id}.dat")));
        let _ = std::fs::remove_file(self.dir.join(format!("{file_id}.idx")));
        tracing::info!(file_id, into = dest_id, "compaction finished");
        Ok(())
    }
}

impl IDataStore for LogDataStore {
    fn read(&self, lid: Lid) -> Result<Option<Vec<u8>>> {
        let _guard = self.generation.guard();
        let info = self.index.get(lid);
        if !info.is_valid() || info.is_empty() {
            return Ok(None);
        }
        {
            let active_guard = self.active.lock();
            if let Some(active) = active_guard.as_ref() {
                if active.file_id() == info.file_id() {
                    return active.read(lid, info).map(Some);
                }
            }
        }
        let seg = self.frozen.read().iter().find(|s| s.file_id() == info.file_id()).cloned();
        match seg {
            Some(seg) => seg.read(lid, info).map(Some),
            None => Err(StoreError::state(format!(
                "no segment {} for lid {lid}", info.file_id()
            ))),
        }
    }

    fn write(&self, lid: Lid, bytes: &[u8]) -> Result<u64> {
        let _g = self.update_lock.lock();
        let serial = self.next_serial.fetch_add(1, Ordering::AcqRel);
        self.append_active(lid, bytes, serial)?;
        Ok(serial)
    }

    fn remove(&self, lid: Lid) -> Result<u64> {
        let _g = self.update_lock.lock();
        let serial = self.next_serial.fetch_add(1, Ordering::AcqRel);
        self.append_active(lid, &[], serial)?;
        Ok(serial)
    }

    fn flush(&self) -> Result<u64> {
        let _g = self.update_lock.lock();
        let serial = self.next_serial.load(Ordering::Acquire).saturating_sub(1);
        {
            let active_guard = self.active.lock();
            if let Some(active) = active_guard.as_ref() {
                active.flush()?;
            }
        }
        self.sync.sync_to(serial)?;
        Ok(serial)
    }

    fn init_flush(&self, serial_num: u64) -> Result<()> {
        self.sync.sync_to(serial_num)?;
        let active_guard = self.active.lock();
        if let Some(active) = active_guard.as_ref() {
            active.flush()?;
        }
        Ok(())
    }

    fn visit(&self, visitor: &mut dyn FnMut(Lid, &[u8]) -> Result<()>) -> Result<()> {
        for seg in self.frozen.read().iter() {
            let file_id = seg.file_id();
            seg.visit_all(|chunk_id, lid, bytes, _serial| {
                if compacter::still_live(&self.index, lid, file_id, chunk_id) {
                    visitor(lid, bytes)?;
                }
                Ok(())
            })?;
        }
        let active_guard = self.active.lock();
        if let Some(active) = active_guard.as_ref() {
            let file_id = active.file_id();
            active.visit_flushed(|chunk_id, lid, bytes, _serial| {
                if compacter::still_live(&self.index, lid, file_id, chunk_id) {
                    visitor(lid, bytes)?;
                }
                Ok(())
            })?;
            active.visit_active(|chunk_id, lid, bytes, _serial| {
                if compacter::still_live(&self.index, lid, file_id, chunk_id) {
                    visitor(lid, bytes)?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn compact_bloat(&self) -> Result<()> {
        let candidates: Vec<u16> = self.frozen.read().iter().map(|s| s.file_id()).collect();
        for file_id in candidates {
            let seg = self.frozen.read().iter().find(|s| s.file_id() == file_id).cloned();
            let Some(seg) = seg else { continue };
            if self.segment_bloat(&seg)? >= self.config.compact_bloat_factor {
                self.compact_segment(file_id, false)?;
            }
        }
        Ok(())
    }

    fn compact_spread(&self) -> Result<()> {
        let candidates: Vec<u16> = self.frozen.read().iter().map(|s| s.file_id()).collect();
        for file_id in candidates {
            let seg = self.frozen.read().iter().find(|s| s.file_id() == file_id).cloned();
            let Some(seg) = seg else { continue };
            if self.segment_spread(&seg)? >= self.config.max_bucket_spread {
                self.compact_segment(file_id, true)?;
            }
        }
        Ok(())
    }

    fn compact_lid_space(&self, new_limit: u32) -> Result<()> {
        let _g = self.update_lock.lock();
        let current = self.index.doc_id_limit();
        for lid in new_limit..current {
            self.index.set_empty(lid);
        }
        Ok(())
    }

    fn shrink_lid_space(&self) -> Result<()> {
        let _g = self.update_lock.lock();
        let limit = self.index.doc_id_limit();
        self.index.shrink_to(limit as usize);
        Ok(())
    }

    fn memory_usage(&self) -> MemoryUsage {
        let index_bytes = self.index.doc_id_limit() as u64 * 8;
        let disk_bytes = self.frozen.read().iter().map(|s| s.disk_footprint()).sum::<u64>()
            + self.active.lock().as_ref().map(|a| a.approx_size()).unwrap_or(0);
        MemoryUsage { index_bytes, disk_bytes }
    }

    fn doc_id_limit(&self) -> u32 {
        self.index.doc_id_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
        store.write(1, b"hello").unwrap();
        store.write(2, b"world").unwrap();
        assert_eq!(store.read(1).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.read(2).unwrap(), Some(b"world".to_vec()));
        assert_eq!(store.read(3).unwrap(), None);
    }

    #[test]
    fn remove_makes_a_lid_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
        store.write(1, b"hello").unwrap();
        store.remove(1).unwrap();
        assert_eq!(store.read(1).unwrap(), None);
    }

    #[test]
    fn rotation_then_restart_recovers_all_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LogDataStoreConfig::default();
        config.max_file_size = 64;
        config.file_config.max_chunk_bytes = 32;
        {
            let store = LogDataStore::open(dir.path(), config).unwrap();
            for lid in 0..50u32 {
                store.write(lid, b"0123456789").unwrap();
            }
            store.flush().unwrap();
        }
        let store = LogDataStore::open(dir.path(), config).unwrap();
        for lid in 0..50u32 {
            assert_eq!(store.read(lid).unwrap(), Some(b"0123456789".to_vec()));
        }
    }

    #[test]
    fn overwrite_then_compact_bloat_drops_dead_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LogDataStoreConfig::default();
        config.max_file_size = 40;
        config.file_config.max_chunk_bytes = 24;
        config.compact_bloat_factor = 0.1;
        let store = LogDataStore::open(dir.path(), config).unwrap();
        for lid in 0..10u32 {
            store.write(lid, b"0123456789").unwrap();
        }
        for lid in 0..10u32 {
            store.write(lid, b"9876543210").unwrap();
        }
        store.flush().unwrap();
        store.compact_bloat().unwrap();
        for lid in 0..10u32 {
            assert_eq!(store.read(lid).unwrap(), Some(b"9876543210".to_vec()));
        }
    }

    #[test]
    fn visit_sees_every_live_document_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
        store.write(1, b"a").unwrap();
        store.write(2, b"b").unwrap();
        store.remove(2).unwrap();
        let mut seen = Vec::new();
        store
            .visit(&mut |lid, bytes| {
                seen.push((lid, bytes.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(1, b"a".to_vec())]);
    }
}
