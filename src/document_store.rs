//! A cache and document-level compression layer sitting on top of any
//! [`crate::data_store::IDataStore`].
//!
//! Document bytes are compressed independently of whatever compression the
//! backing store applies at the chunk level — the two are unrelated
//! knobs: [`crate::config::FileChunkConfig::compression`] governs how a
//! flushed chunk's bytes are framed on disk, while
//! [`crate::config::DocumentStoreConfig::compression`] governs what
//! `DocumentStore` itself hands the backing store.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::cache::{ReadCache, VisitCache};
use crate::codec;
use crate::config::{DocumentStoreConfig, UpdateStrategy};
use crate::data_store::IDataStore;
use crate::error::{Result, StoreError};
use crate::lid::Lid;

pub trait IDocumentStore: Send + Sync {
    fn read(&self, lid: Lid) -> Result<Option<Vec<u8>>>;
    fn write(&self, lid: Lid, bytes: &[u8]) -> Result<u64>;
    fn remove(&self, lid: Lid) -> Result<u64>;
    fn flush(&self) -> Result<u64>;
    fn visit(&self, visitor: &mut dyn FnMut(Lid, &[u8]) -> Result<()>) -> Result<()>;
}

const DOC_HEADER: usize = 1 + 4;

fn encode(bytes: &[u8], cfg: crate::config::CompressionConfig) -> Result<Vec<u8>> {
    let (codec_id, body) = codec::pack_with_fallback(bytes, cfg)?;
    let mut out = Vec::with_capacity(DOC_HEADER + body.len());
    out.push(codec_id as u8);
    let mut len_bytes = [0u8; 4];
    BigEndian::write_u32(&mut len_bytes, bytes.len() as u32);
    out.extend_from_slice(&len_bytes);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() < DOC_HEADER {
        return Err(StoreError::corruption("document record shorter than its header"));
    }
    let codec_id = crate::config::CompressionType::from_u8(raw[0])
        .ok_or_else(|| StoreError::corruption(format!("unknown document codec id {}", raw[0])))?;
    let uncompressed_len = BigEndian::read_u32(&raw[1..5]) as usize;
    codec::get(codec_id).decompress(&raw[DOC_HEADER..], uncompressed_len)
}

pub struct DocumentStore<D: IDataStore> {
    backing: D,
    config: DocumentStoreConfig,
    read_cache: ReadCache,
    visit_cache: Option<VisitCache>,
}

impl<D: IDataStore> DocumentStore<D> {
    pub fn new(backing: D, config: DocumentStoreConfig) -> Self {
        let visit_cache = config
            .allow_visit_caching
            .then(|| VisitCache::new(config.initial_cache_entries, config.max_cache_bytes));
        Self {
            backing,
            read_cache: ReadCache::new(config.initial_cache_entries, config.max_cache_bytes),
            visit_cache,
            config,
        }
    }

    pub fn backing(&self) -> &D {
        &self.backing
    }

    pub fn cached_len(&self) -> usize {
        self.read_cache.len()
    }
}

impl<D: IDataStore> IDocumentStore for DocumentStore<D> {
    fn read(&self, lid: Lid) -> Result<Option<Vec<u8>>> {
        if let Some(cached) = self.read_cache.get(lid) {
            return Ok(Some((*cached).clone()));
        }
        let raw = match self.backing.read(lid)? {
            Some(r) => r,
            None => return Ok(None),
        };
        let bytes = decode(&raw)?;
        self.read_cache.put(lid, Arc::new(bytes.clone()));
        Ok(Some(bytes))
    }

    fn write(&self, lid: Lid, bytes: &[u8]) -> Result<u64> {
        let encoded = encode(bytes, self.config.compression)?;
        let serial = self.backing.write(lid, &encoded)?;
        match self.config.update_strategy {
            UpdateStrategy::Invalidate => self.read_cache.invalidate(lid),
            UpdateStrategy::Update => self.read_cache.put(lid, Arc::new(bytes.to_vec())),
        }
        if let Some(vc) = &self.visit_cache {
            vc.invalidate(lid);
        }
        Ok(serial)
    }

    fn remove(&self, lid: Lid) -> Result<u64> {
        let serial = self.backing.remove(lid)?;
        self.read_cache.invalidate(lid);
        if let Some(vc) = &self.visit_cache {
            vc.invalidate(lid);
        }
        Ok(serial)
    }

    fn flush(&self) -> Result<u64> {
        self.backing.flush()
    }

    fn visit(&self, visitor: &mut dyn FnMut(Lid, &[u8]) -> Result<()>) -> Result<()> {
        self.backing.visit(&mut |lid, raw| {
            let bytes = decode(raw)?;
            if let Some(vc) = &self.visit_cache {
                vc.put(lid, Arc::new(bytes.clone()));
            }
            visitor(lid, &bytes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogDataStoreConfig;
    use crate::log_data_store::LogDataStore;

    #[test]
    fn write_read_remove_round_trip_through_compression_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let backing = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
        let store = DocumentStore::new(backing, DocumentStoreConfig::default());

        store.write(1, b"the quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            store.read(1).unwrap(),
            Some(b"the quick brown fox jumps over the lazy dog".to_vec())
        );
        assert_eq!(store.cached_len(), 1);

        store.remove(1).unwrap();
        assert_eq!(store.read(1).unwrap(), None);
    }

    #[test]
    fn update_strategy_populates_cache_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let backing = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
        let mut cfg = DocumentStoreConfig::default();
        cfg.update_strategy = UpdateStrategy::Update;
        let store = DocumentStore::new(backing, cfg);

        store.write(1, b"hello").unwrap();
        assert_eq!(store.cached_len(), 1);
    }

    #[test]
    fn visit_sees_decompressed_documents() {
        let dir = tempfile::tempdir().unwrap();
        let backing = LogDataStore::open(dir.path(), LogDataStoreConfig::default()).unwrap();
        let store = DocumentStore::new(backing, DocumentStoreConfig::default());
        store.write(1, b"alpha").unwrap();
        store.write(2, b"beta").unwrap();
        let mut seen = Vec::new();
        store
            .visit(&mut |lid, bytes| {
                seen.push((lid, bytes.to_vec()));
                Ok(())
            })
            .unwrap();
        seen.sort_by_key(|(l, _)| *l);
        assert_eq!(seen, vec![(1, b"alpha".to_vec()), (2, b"beta".to_vec())]);
    }
}
