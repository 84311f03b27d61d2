//! The LID → `LidInfo` index: an RCU-style vector of atomics.
//!
//! Per-LID updates are plain atomic stores (no whole-vector republish
//! needed); growing the vector (raising the doc-id limit) swaps in a fresh,
//! larger `Arc<Vec<AtomicU64>>` via [`arc_swap::ArcSwap`]. Readers call
//! [`LidIndex::snapshot`], which clones the `Arc` (a refcount bump) so the
//! vector they're reading from outlives any concurrent grow — ordinary `Arc`
//! semantics, no extra bookkeeping required.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::lid::{Lid, LidInfo};

pub struct LidIndex {
    slots: ArcSwap<Vec<AtomicU64>>,
    doc_id_limit: AtomicU64,
}

/// A cloned `Arc` pinning one generation of the index vector alive for the
/// duration of a read.
pub struct Snapshot(Arc<Vec<AtomicU64>>);

impl Snapshot {
    pub fn get(&self, lid: Lid) -> LidInfo {
        match self.0.get(lid as usize) {
            Some(cell) => LidInfo::from_raw(cell.load(Ordering::Acquire)),
            None => LidInfo::INVALID,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for LidIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LidIndex {
    pub fn new() -> Self {
        Self {
            slots: ArcSwap::from_pointee(Vec::new()),
            doc_id_limit: AtomicU64::new(0),
        }
    }

    pub fn doc_id_limit(&self) -> u32 {
        self.doc_id_limit.load(Ordering::Acquire) as u32
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.slots.load_full())
    }

    pub fn get(&self, lid: Lid) -> LidInfo {
        self.snapshot().get(lid)
    }

    /// Grow the backing vector so `lid` is addressable, and raise
    /// `doc_id_limit` to `lid + 1` if that would increase it. Must be called
    /// only while holding the store's update lock (single-writer).
    pub fn ensure_capacity(&self, lid: Lid) {
        let needed = lid as usize + 1;
        let current_len = self.slots.load().len();
        if needed > current_len {
            let old = self.slots.load_full();
            let mut grown: Vec<AtomicU64> = Vec::with_capacity(needed);
            for cell in old.iter() {
                grown.push(AtomicU64::new(cell.load(Ordering::Acquire)));
            }
            while grown.len() < needed {
                grown.push(AtomicU64::new(LidInfo::INVALID.raw()));
            }
            self.slots.store(Arc::new(grown));
        }
        let limit = self.doc_id_limit.load(Ordering::Acquire);
        if needed as u64 > limit {
            self.doc_id_limit.store(needed as u64, Ordering::Release);
        }
    }

    /// Publish a new `LidInfo` for `lid`. Grows the vector first if needed.
    pub fn set(&self, lid: Lid, info: LidInfo) {
        self.ensure_capacity(lid);
        let slots = self.slots.load();
        slots[lid as usize].store(info.raw(), Ordering::Release);
    }

    /// Mark `lid` as present-but-empty (the remove sentinel).
    pub fn set_empty(&self, lid: Lid) {
        self.set(lid, LidInfo::empty());
    }

    /// Raise the doc-id limit without necessarily touching any slot — used
    /// by `FileChunk::update_lid_map` on replay, which sees the header's
    /// `docIdLimit` before any individual `LidMeta` records.
    pub fn raise_doc_id_limit(&self, new_limit: u32) {
        if new_limit == 0 {
            return;
        }
        self.ensure_capacity(new_limit - 1);
    }

    /// Physically shrink the backing vector to `new_len` slots, reclaiming
    /// the tail. Safe to call concurrently with readers: `Snapshot::get`
    /// bounds-checks against whatever vector it holds and returns
    /// `LidInfo::INVALID` past the end rather than panicking, so a reader
    /// mid-flight against the old, longer vector is unaffected. Callers are
    /// responsible for only shrinking past a range that is actually empty.
    pub fn shrink_to(&self, new_len: usize) {
        let current = self.slots.load_full();
        if new_len >= current.len() {
            return;
        }
        let shrunk: Vec<AtomicU64> = current[..new_len]
            .iter()
            .map(|cell| AtomicU64::new(cell.load(Ordering::Acquire)))
            .collect();
        self.slots.store(Arc::new(shrunk));
        let limit = self.doc_id_limit.load(Ordering::Acquire);
        if (new_len as u64) < limit {
            self.doc_id_limit.store(new_len as u64, Ordering::Release);
        }
    }
}
