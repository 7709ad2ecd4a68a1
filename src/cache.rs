//! Shared memo of solved positions.
//!
//! A solved path is written through: every state along it gets the remaining suffix of the
//! path, so any later request landing on an intermediate state is answered without searching.

use crate::moves::Move;
use crate::store::{MemoryStore, Store, StoreResult};
use crate::{Bits, StateKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum CacheEntry {
    /// Remaining moves from this state to a single piece.
    Solved(Vec<Move>),
    NoSolution,
    /// Handed to the solve queue, result pending.
    Queued,
}

impl CacheEntry {
    /// Whether this entry may take the place of `existing`.
    ///
    /// Paths are final. A no-solution verdict only displaces a queued marker, and a queued marker
    /// only fills an empty slot.
    pub fn may_replace(&self, existing: Option<&CacheEntry>) -> bool {
        match (self, existing) {
            (_, None) => true,
            (_, Some(CacheEntry::Solved(_))) => false,
            (CacheEntry::Solved(_), Some(_)) => true,
            (CacheEntry::NoSolution, Some(CacheEntry::Queued)) => true,
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct SolutionCache {
    store: Arc<dyn Store<CacheEntry>>,
}

impl SolutionCache {
    pub fn new(store: Arc<dyn Store<CacheEntry>>) -> Self {
        Self { store }
    }

    /// Cache backed by a fresh process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn get(&self, shape_id: &str, bits: Bits) -> StoreResult<Option<CacheEntry>> {
        self.store.get(&StateKey::new(shape_id, bits))
    }

    /// Writes the suffix of `path` for every state it passes through, `start` and the final
    /// single-piece state included. Returns the number of entries written.
    pub fn put_solution(&self, shape_id: &str, start: Bits, path: &[Move]) -> StoreResult<usize> {
        let mut state = start;
        let mut written = 0;
        for i in 0..=path.len() {
            if self.put(shape_id, state, CacheEntry::Solved(path[i..].to_vec()))? {
                written += 1;
            }
            if let Some(mv) = path.get(i) {
                state = mv.apply(state);
            }
        }
        debug!(
            "Cached {}/{} states of a {}-move path on {}",
            written,
            path.len() + 1,
            path.len(),
            shape_id
        );
        Ok(written)
    }

    /// Records that an exhaustive search found nothing.
    pub fn put_no_solution(&self, shape_id: &str, bits: Bits) -> StoreResult<bool> {
        self.put(shape_id, bits, CacheEntry::NoSolution)
    }

    /// Marks a state as handed to the solve queue.
    pub fn put_queued(&self, shape_id: &str, bits: Bits) -> StoreResult<bool> {
        self.put(shape_id, bits, CacheEntry::Queued)
    }

    /// Drops a queued marker whose queue item will never produce a result. Any other entry is
    /// left alone.
    pub fn clear_queued(&self, shape_id: &str, bits: Bits) -> StoreResult<bool> {
        let key = StateKey::new(shape_id, bits);
        let cleared = self
            .store
            .remove_if(&key, &mut |entry| *entry == CacheEntry::Queued)?;
        trace!("Cache clear queued {}: cleared={}", key, cleared);
        Ok(cleared)
    }

    fn put(&self, shape_id: &str, bits: Bits, entry: CacheEntry) -> StoreResult<bool> {
        let key = StateKey::new(shape_id, bits);
        let mut written = false;
        self.store.update(&key, &mut |existing| {
            if entry.may_replace(existing) {
                written = true;
                Some(entry.clone())
            } else {
                None
            }
        })?;
        trace!("Cache put {} -> {:?}: written={}", key, entry, written);
        Ok(written)
    }
}
