//! The point-read and visit caches `DocumentStore` sits on top of.
//!
//! Both are bounded by total bytes held rather than entry count — `lru`
//! gives us recency order for free, eviction just keeps popping the least
//! recently used entry until the running byte total fits the budget again.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::lid::Lid;

struct Bounded {
    entries: LruCache<Lid, Arc<Vec<u8>>>,
    bytes: usize,
    max_bytes: usize,
}

impl Bounded {
    fn new(initial_entries: usize, max_bytes: usize) -> Self {
        let cap = NonZeroUsize::new(initial_entries.max(1)).unwrap();
        Self {
            entries: LruCache::new(cap),
            bytes: 0,
            max_bytes,
        }
    }

    fn put(&mut self, lid: Lid, value: Arc<Vec<u8>>) {
        if let Some(old) = self.entries.put(lid, value.clone()) {
            self.bytes -= old.len();
        }
        self.bytes += value.len();
        while self.bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.bytes -= evicted.len(),
                None => break,
            }
        }
    }

    fn get(&mut self, lid: Lid) -> Option<Arc<Vec<u8>>> {
        self.entries.get(&lid).cloned()
    }

    fn invalidate(&mut self, lid: Lid) {
        if let Some(removed) = self.entries.pop(&lid) {
            self.bytes -= removed.len();
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The point-read cache: `lid -> document bytes`, consulted by
/// `DocumentStore::read` before falling through to the underlying
/// [`crate::data_store::IDataStore`].
pub struct ReadCache {
    inner: Mutex<Bounded>,
}

impl ReadCache {
    pub fn new(initial_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Bounded::new(initial_entries, max_bytes)),
        }
    }

    pub fn get(&self, lid: Lid) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().get(lid)
    }

    pub fn put(&self, lid: Lid, bytes: Arc<Vec<u8>>) {
        self.inner.lock().put(lid, bytes);
    }

    pub fn invalidate(&self, lid: Lid) {
        self.inner.lock().invalidate(lid);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The visit cache: keyed by the compressed bytes a `visit()` pass read off
/// disk for a given lid, so a second visitor over the same unmodified data
/// skips decompression entirely. Disabled unless
/// [`crate::config::DocumentStoreConfig::allow_visit_caching`] is set.
pub struct VisitCache {
    inner: Mutex<Bounded>,
}

impl VisitCache {
    pub fn new(initial_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Bounded::new(initial_entries, max_bytes)),
        }
    }

    pub fn get(&self, lid: Lid) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().get(lid)
    }

    pub fn put(&self, lid: Lid, bytes: Arc<Vec<u8>>) {
        self.inner.lock().put(lid, bytes);
    }

    pub fn invalidate(&self, lid: Lid) {
        self.inner.lock().invalidate(lid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used_once_over_byte_budget() {
        let cache = ReadCache::new(16, 10);
        cache.put(1, Arc::new(vec![0u8; 6]));
        cache.put(2, Arc::new(vec![0u8; 6]));
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn invalidate_removes_an_entry() {
        let cache = ReadCache::new(16, 1024);
        cache.put(1, Arc::new(vec![1, 2, 3]));
        cache.invalidate(1);
        assert!(cache.get(1).is_none());
    }
}
