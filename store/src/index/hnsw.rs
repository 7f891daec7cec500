//! HNSW-based vector index using instant-distance.

use instant_distance::{Builder, HnswMap, Point, Search};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::types::{Neighbor, Slot};

use super::slots::SlotTable;
use super::{IndexSnapshot, Metric, VectorIndex};

/// A point wrapper for instant-distance carrying the index metric.
#[derive(Clone, Debug)]
struct MetricPoint {
    vector: Vec<f32>,
    metric: Metric,
}

impl Point for MetricPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.metric.distance(&self.vector, &other.vector)
    }
}

type Graph = HnswMap<MetricPoint, Slot>;

/// HNSW-based vector index for approximate nearest neighbor search.
///
/// Vectors live in a slot table; the HNSW graph is built over live slots only and rebuilt
/// lazily on the first search after a mutation. When the graph yields fewer candidates than
/// requested (its search beam is narrower than `k`), the index falls back to an exact scan so
/// over-fetching callers still see every live slot.
///
/// # Example
///
/// ```rust
/// use tessera_store::index::{HnswIndex, Metric, VectorIndex};
///
/// let mut index = HnswIndex::new(2, Metric::Cosine);
/// index.add(&[1.0, 0.0]).unwrap();
/// index.add(&[0.0, 1.0]).unwrap();
/// let hits = index.search(&[1.0, 0.1], 1).unwrap();
/// assert_eq!(hits.len(), 1);
/// ```
pub struct HnswIndex {
    table: SlotTable,
    graph: RwLock<Option<Arc<Graph>>>,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.table.dimension())
            .field("metric", &self.table.metric())
            .field("size", &self.table.size())
            .field("tombstones", &self.table.tombstones())
            .finish_non_exhaustive()
    }
}

impl HnswIndex {
    /// Creates an empty index.
    #[must_use]
    pub const fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            table: SlotTable::new(dimension, metric),
            graph: RwLock::new(None),
        }
    }

    fn invalidate(&mut self) {
        *self.graph.get_mut() = None;
    }

    fn graph(&self) -> Option<Arc<Graph>> {
        if let Some(graph) = self.graph.read().as_ref() {
            return Some(Arc::clone(graph));
        }

        let mut cached = self.graph.write();
        if cached.is_none() && self.table.size() > 0 {
            let metric = self.table.metric();
            let (points, slots): (Vec<_>, Vec<_>) = self
                .table
                .iter_live()
                .map(|(slot, vector)| {
                    (
                        MetricPoint {
                            vector: vector.to_vec(),
                            metric,
                        },
                        slot,
                    )
                })
                .unzip();
            debug!(points = points.len(), "rebuilding HNSW graph");
            *cached = Some(Arc::new(Builder::default().build(points, slots)));
        }
        (*cached).clone()
    }

    fn exact(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let metric = self.table.metric();
        let mut hits: Vec<Neighbor> = self
            .table
            .iter_live()
            .map(|(slot, vector)| Neighbor {
                slot,
                distance: metric.distance(query, vector),
            })
            .collect();
        hits.sort_unstable_by_key(|hit| (OrderedFloat(hit.distance), hit.slot));
        hits.truncate(k);
        hits
    }
}

impl VectorIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.table.dimension()
    }

    fn metric(&self) -> Metric {
        self.table.metric()
    }

    fn add(&mut self, vector: &[f32]) -> Result<Slot> {
        let slot = self.table.push(vector)?;
        self.invalidate();
        Ok(slot)
    }

    fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<Slot>> {
        let slots = self.table.push_batch(vectors)?;
        self.invalidate();
        Ok(slots)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.table.check(query)?;
        let live = self.table.size();
        if k == 0 || live == 0 {
            return Ok(Vec::new());
        }
        let Some(graph) = self.graph() else {
            return Ok(Vec::new());
        };

        let point = MetricPoint {
            vector: query.to_vec(),
            metric: self.table.metric(),
        };
        let mut search = Search::default();
        let mut candidates = graph.search(&point, &mut search);

        // Fixed-width candidate row; unfilled positions stay `None`.
        let row: Vec<Option<Neighbor>> = (0..k)
            .map(|_| {
                candidates.next().map(|item| Neighbor {
                    slot: *item.value,
                    distance: item.distance,
                })
            })
            .collect();

        let mut hits: Vec<Neighbor> = row
            .into_iter()
            .flatten()
            .filter(|hit| self.table.is_live(hit.slot))
            .collect();

        if hits.len() < k.min(live) {
            return Ok(self.exact(query, k));
        }

        hits.sort_by_key(|hit| (OrderedFloat(hit.distance), hit.slot));
        Ok(hits)
    }

    fn remove(&mut self, slots: &[Slot]) {
        if self.table.remove(slots) > 0 {
            self.invalidate();
        }
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
        self.table.restore(snapshot)?;
        self.invalidate();
        Ok(())
    }
}
