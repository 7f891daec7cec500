//! Exact brute-force vector index.

use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::error::Result;
use crate::types::{Neighbor, Slot};

use super::slots::SlotTable;
use super::{IndexSnapshot, Metric, VectorIndex};

/// Exact nearest-neighbor search over every live slot.
///
/// Distances are computed in parallel with rayon; results are ordered by ascending distance with
/// ties broken by slot, so identical stores always return identical rankings.
///
/// # Example
///
/// ```rust
/// use tessera_store::index::{FlatIndex, Metric, VectorIndex};
///
/// let mut index = FlatIndex::new(2, Metric::SquaredL2);
/// let slot = index.add(&[1.0, 0.0]).unwrap();
/// let hits = index.search(&[0.9, 0.1], 5).unwrap();
/// assert_eq!(hits[0].slot, slot);
/// ```
#[derive(Debug, Clone)]
pub struct FlatIndex {
    table: SlotTable,
}

impl FlatIndex {
    /// Creates an empty index.
    #[must_use]
    pub const fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            table: SlotTable::new(dimension, metric),
        }
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.table.dimension()
    }

    fn metric(&self) -> Metric {
        self.table.metric()
    }

    fn add(&mut self, vector: &[f32]) -> Result<Slot> {
        self.table.push(vector)
    }

    fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<Slot>> {
        self.table.push_batch(vectors)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.table.check(query)?;
        if k == 0 || self.table.size() == 0 {
            return Ok(Vec::new());
        }

        let metric = self.table.metric();
        let mut hits: Vec<Neighbor> = self
            .table
            .iter_live()
            .par_bridge()
            .map(|(slot, vector)| Neighbor {
                slot,
                distance: metric.distance(query, vector),
            })
            .collect();

        hits.sort_unstable_by_key(|hit| (OrderedFloat(hit.distance), hit.slot));
        hits.truncate(k);
        Ok(hits)
    }

    fn remove(&mut self, slots: &[Slot]) {
        self.table.remove(slots);
    }

    fn size(&self) -> usize {
        self.table.size()
    }

    fn tombstone_count(&self) -> usize {
        self.table.tombstones()
    }

    fn is_live(&self, slot: Slot) -> bool {
        self.table.is_live(slot)
    }

    fn vector(&self, slot: Slot) -> Option<&[f32]> {
        self.table.vector(slot)
    }

    fn live_slots(&self) -> Vec<Slot> {
        self.table.live_slots()
    }

    fn generation(&self) -> u64 {
        self.table.generation()
    }

    fn snapshot(&self) -> IndexSnapshot {
        self.table.snapshot()
    }

    fn restore(&mut self, snapshot: IndexSnapshot) -> Result<()> {
        self.table.restore(snapshot)
    }
}
