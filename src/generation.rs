//! Epoch-based reclamation for the LID index and for segment teardown.
//!
//! Every read takes a [`Guard`] for the duration of the call. Writers bump
//! the generation counter after publishing a new state; a segment (or an old
//! index snapshot) is safe to free once the oldest generation any live guard
//! still references is newer than the generation at the moment of the bump.
//! This is deliberately simpler than the original's hazard-pointer style
//! handler: an explicit per-generation refcount table under a mutex, which
//! is cheap enough here because guards are held only for the duration of a
//! single store operation, never across an await or a blocking I/O call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

struct Inner {
    current: AtomicU64,
    active: Mutex<BTreeMap<u64, u64>>,
}

/// Shared generation clock. Cheap to clone (it's an `Arc` under the hood).
#[derive(Clone)]
pub struct GenerationHandler {
    inner: Arc<Inner>,
}

impl Default for GenerationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationHandler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                current: AtomicU64::new(0),
                active: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.inner.current.load(Ordering::Acquire)
    }

    /// Advance the generation. Returns the generation that was current
    /// *before* the bump — callers wait for `oldest_used_generation() >`
    /// this value before reclaiming state published prior to the bump.
    pub fn bump(&self) -> u64 {
        self.inner.current.fetch_add(1, Ordering::AcqRel)
    }

    /// Take a read guard pinning the current generation alive.
    pub fn guard(&self) -> Guard {
        let gen = self.inner.current.load(Ordering::Acquire);
        *self.inner.active.lock().entry(gen).or_insert(0) += 1;
        Guard {
            inner: self.inner.clone(),
            generation: gen,
        }
    }

    /// The oldest generation any live guard still references. If no guards
    /// are outstanding this is the current generation (nothing holds back
    /// reclamation).
    pub fn oldest_used_generation(&self) -> u64 {
        let active = self.inner.active.lock();
        match active.keys().next() {
            Some(&g) => g,
            None => self.current_generation(),
        }
    }
}

/// RAII guard pinning a generation; drop releases it.
pub struct Guard {
    inner: Arc<Inner>,
    generation: u64,
}

impl Guard {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let mut active = self.inner.active.lock();
        if let Some(count) = active.get_mut(&self.generation) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.generation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_generation_tracks_outstanding_guards() {
        let gh = GenerationHandler::new();
        let g0 = gh.guard();
        gh.bump();
        let g1 = gh.guard();
        assert_eq!(gh.oldest_used_generation(), 0);
        drop(g0);
        assert_eq!(gh.oldest_used_generation(), 1);
        drop(g1);
        assert_eq!(gh.oldest_used_generation(), gh.current_generation());
    }

    #[test]
    fn bump_returns_pre_bump_generation() {
        let gh = GenerationHandler::new();
        let pre = gh.bump();
        assert_eq!(pre, 0);
        assert_eq!(gh.current_generation(), 1);
    }
}
