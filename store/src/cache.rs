//! Embedding cache consulted before calling the embedder.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::types::ContentHash;

/// Default number of vectors kept by [`MemoryEmbeddingCache`].
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Stores vectors keyed by chunk id and validated by content hash.
///
/// An entry is only valid while its stored hash equals the chunk's current hash. A lookup with a
/// different hash is a miss, never a stale vector.
pub trait EmbeddingCache: Send + Sync {
    /// Returns the cached vector if one exists for `chunk_id` with exactly `hash`.
    fn get(&self, chunk_id: &str, hash: ContentHash) -> Option<Vec<f32>>;

    /// Stores a vector for `chunk_id` at `hash`, replacing any previous entry.
    fn put(&self, chunk_id: &str, hash: ContentHash, vector: Vec<f32>);

    /// Drops the entry for `chunk_id`, if any.
    fn invalidate(&self, chunk_id: &str);
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, (ContentHash, Vec<f32>)>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

/// Hit/miss counters of a [`MemoryEmbeddingCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed, including hash mismatches.
    pub misses: u64,
}

/// Bounded in-memory [`EmbeddingCache`] evicting the oldest insertion first.
pub struct MemoryEmbeddingCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for MemoryEmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEmbeddingCache")
            .field("capacity", &self.capacity)
            .field("len", &self.state.lock().entries.len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryEmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl MemoryEmbeddingCache {
    /// Creates a cache holding at most `capacity` vectors.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns the hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}

impl EmbeddingCache for MemoryEmbeddingCache {
    fn get(&self, chunk_id: &str, hash: ContentHash) -> Option<Vec<f32>> {
        let mut state = self.state.lock();
        let cached = state
            .entries
            .get(chunk_id)
            .map(|(stored, vector)| (*stored == hash).then(|| vector.clone()));
        match cached {
            Some(Some(vector)) => {
                state.hits += 1;
                Some(vector)
            }
            Some(None) => {
                state.entries.remove(chunk_id);
                state.order.retain(|id| id != chunk_id);
                state.misses += 1;
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    fn put(&self, chunk_id: &str, hash: ContentHash, vector: Vec<f32>) {
        let mut state = self.state.lock();
        if state
            .entries
            .insert(chunk_id.to_owned(), (hash, vector))
            .is_none()
        {
            state.order.push_back(chunk_id.to_owned());
        }
        while state.entries.len() > self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
        }
    }

    fn invalidate(&self, chunk_id: &str) {
        let mut state = self.state.lock();
        if state.entries.remove(chunk_id).is_some() {
            state.order.retain(|id| id != chunk_id);
        }
    }
}
