//! Vector index implementations.
//!
//! A [`VectorIndex`] knows nothing about documents or text: it stores fixed-length vectors at
//! integer [`Slot`]s and answers nearest-neighbor queries over them. Removal tombstones a slot;
//! tombstoned slots never appear in search results or in [`VectorIndex::size`], and are only
//! reclaimed when the owner rebuilds the index from its live slots.
//!
//! Two implementations are provided:
//!
//! - [`FlatIndex`]: exact brute-force search, parallelized with rayon.
//! - [`HnswIndex`]: approximate search over an `instant-distance` HNSW graph, rebuilt lazily
//!   after mutation.

mod flat;
mod hnsw;
mod slots;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::IndexKind;
use crate::error::{Result, StoreError};
use crate::persistence;
use crate::types::{Neighbor, Slot};

/// Distance metric, fixed when an index is constructed.
///
/// The index never normalizes vectors. Pick [`Metric::InnerProduct`] only when the embedder
/// already produces unit vectors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    SquaredL2,
    /// Negated dot product.
    InnerProduct,
    /// One minus cosine similarity.
    Cosine,
}

impl Metric {
    /// Distance between two vectors of equal length. Lower is closer.
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::SquaredL2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = x - y;
                    d * d
                })
                .sum(),
            Self::InnerProduct => -dot(a, b),
            Self::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }

    /// Maps a distance under this metric to a similarity where higher is better.
    #[must_use]
    pub fn similarity(self, distance: f32) -> f32 {
        match self {
            Self::SquaredL2 => 1.0 / (1.0 + distance.max(0.0)),
            Self::InnerProduct => -distance,
            Self::Cosine => 1.0 - distance,
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::SquaredL2 => 0,
            Self::InnerProduct => 1,
            Self::Cosine => 2,
        }
    }

    pub(crate) const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::SquaredL2),
            1 => Some(Self::InnerProduct),
            2 => Some(Self::Cosine),
            _ => None,
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (lhs, rhs) in a.iter().zip(b) {
        dot += lhs * rhs;
        norm_a += lhs * lhs;
        norm_b += rhs * rhs;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Plain copy of an index's contents, used for persistence and compaction.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexSnapshot {
    /// Vector length.
    pub dimension: usize,
    /// Distance metric.
    pub metric: Metric,
    /// One vector per slot, tombstoned slots included.
    pub vectors: Vec<Vec<f32>>,
    /// Liveness flag per slot.
    pub live: Vec<bool>,
    /// Compaction generation. Every renumbering of slots bumps it, and the catalog records the
    /// generation its slot pointers refer to.
    pub generation: u64,
}

/// Trait for vector index implementations.
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    /// Returns the vector dimension.
    fn dimension(&self) -> usize;

    /// Returns the distance metric.
    fn metric(&self) -> Metric;

    /// Appends a vector and returns its new slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DimensionMismatch`] without writing anything when the vector has
    /// the wrong length.
    fn add(&mut self, vector: &[f32]) -> Result<Slot>;

    /// Appends several vectors. Either all are stored or none are.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DimensionMismatch`] for the first vector of the wrong length.
    fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<Slot>>;

    /// Returns up to `k` live slots ordered by ascending distance.
    ///
    /// Asking for more results than the index holds is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DimensionMismatch`] when the query has the wrong length.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Tombstones the given slots. Unknown or already removed slots are ignored.
    fn remove(&mut self, slots: &[Slot]);

    /// Number of live (non-tombstoned) slots.
    fn size(&self) -> usize;

    /// Number of tombstoned slots.
    fn tombstone_count(&self) -> usize;

    /// Returns `true` if the slot exists and is not tombstoned.
    fn is_live(&self, slot: Slot) -> bool;

    /// Returns the stored vector of a live slot.
    fn vector(&self, slot: Slot) -> Option<&[f32]>;

    /// All live slots in ascending order.
    fn live_slots(&self) -> Vec<Slot>;

    /// Compaction generation of the current slot numbering.
    fn generation(&self) -> u64;

    /// Copies the full contents out.
    fn snapshot(&self) -> IndexSnapshot;

    /// Replaces the full contents.
    ///
    /// # Errors
    ///
    /// Fails if the snapshot's dimension or metric differ from this index's.
    fn restore(&mut self, snapshot: IndexSnapshot) -> Result<()>;

    /// Returns `true` when no live slots remain.
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Writes the index to `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    fn save(&self, path: &Path) -> Result<()> {
        persistence::save_index(path, &self.snapshot())
    }

    /// Replaces the contents with the index stored at `path`. A missing file leaves the index
    /// empty.
    ///
    /// # Errors
    ///
    /// Fails if the file is unreadable, corrupt, or built with another dimension or metric.
    fn load(&mut self, path: &Path) -> Result<()> {
        match persistence::load_index(path)? {
            Some(snapshot) => self.restore(snapshot),
            None => self.restore(IndexSnapshot {
                dimension: self.dimension(),
                metric: self.metric(),
                vectors: Vec::new(),
                live: Vec::new(),
                generation: 0,
            }),
        }
    }
}

/// Creates an empty index of the requested kind.
#[must_use]
pub fn new_index(kind: IndexKind, dimension: usize, metric: Metric) -> Box<dyn VectorIndex> {
    match kind {
        IndexKind::Flat => Box::new(FlatIndex::new(dimension, metric)),
        IndexKind::Hnsw => Box::new(HnswIndex::new(dimension, metric)),
    }
}

pub(crate) fn check_snapshot(
    snapshot: &IndexSnapshot,
    dimension: usize,
    metric: Metric,
) -> Result<()> {
    if snapshot.dimension != dimension {
        return Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual: snapshot.dimension,
        });
    }
    if snapshot.metric != metric {
        return Err(StoreError::Config(format!(
            "index was built with {:?}, store is configured for {metric:?}",
            snapshot.metric
        )));
    }
    if snapshot.vectors.len() != snapshot.live.len() {
        return Err(StoreError::Serialization(format!(
            "index snapshot has {} vectors but {} liveness flags",
            snapshot.vectors.len(),
            snapshot.live.len()
        )));
    }
    Ok(())
}
