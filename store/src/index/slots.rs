//! Slot-addressed vector storage shared by the index implementations.

use crate::error::{Result, StoreError};
use crate::types::Slot;

use super::{IndexSnapshot, Metric};

/// Contiguous vector storage with per-slot tombstones.
#[derive(Debug, Clone)]
pub(super) struct SlotTable {
    dimension: usize,
    metric: Metric,
    data: Vec<f32>,
    live: Vec<bool>,
    tombstones: usize,
    generation: u64,
}

impl SlotTable {
    pub(super) const fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            data: Vec::new(),
            live: Vec::new(),
            tombstones: 0,
            generation: 0,
        }
    }

    pub(super) const fn dimension(&self) -> usize {
        self.dimension
    }

    pub(super) const fn metric(&self) -> Metric {
        self.metric
    }

    pub(super) fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }

    fn next_slot(&self, offset: usize) -> Result<Slot> {
        u32::try_from(self.live.len() + offset)
            .map(Slot)
            .map_err(|_| StoreError::Config("vector index is out of slots".into()))
    }

    pub(super) fn push(&mut self, vector: &[f32]) -> Result<Slot> {
        self.check(vector)?;
        let slot = self.next_slot(0)?;
        self.data.extend_from_slice(vector);
        self.live.push(true);
        Ok(slot)
    }

    pub(super) fn push_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<Slot>> {
        for vector in vectors {
            self.check(vector)?;
        }
        self.next_slot(vectors.len())?;
        vectors.iter().map(|vector| self.push(vector)).collect()
    }

    /// Tombstones slots and returns how many were live.
    pub(super) fn remove(&mut self, slots: &[Slot]) -> usize {
        let mut removed = 0;
        for slot in slots {
            if let Some(flag) = self.live.get_mut(slot.index()) {
                if *flag {
                    *flag = false;
                    removed += 1;
                }
            }
        }
        self.tombstones += removed;
        removed
    }

    pub(super) const fn size(&self) -> usize {
        self.live.len() - self.tombstones
    }

    pub(super) const fn tombstones(&self) -> usize {
        self.tombstones
    }

    pub(super) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(super) fn is_live(&self, slot: Slot) -> bool {
        self.live.get(slot.index()).copied().unwrap_or(false)
    }

    pub(super) fn vector(&self, slot: Slot) -> Option<&[f32]> {
        if !self.is_live(slot) {
            return None;
        }
        let start = slot.index() * self.dimension;
        self.data.get(start..start + self.dimension)
    }

    /// Iterates live slots with their vectors in ascending slot order.
    pub(super) fn iter_live(&self) -> impl Iterator<Item = (Slot, &[f32])> {
        self.data
            .chunks_exact(self.dimension.max(1))
            .zip(&self.live)
            .enumerate()
            .filter(|(_, (_, live))| **live)
            .filter_map(|(i, (vector, _))| u32::try_from(i).ok().map(|i| (Slot(i), vector)))
    }

    pub(super) fn live_slots(&self) -> Vec<Slot> {
        self.iter_live().map(|(slot, _)| slot).collect()
    }

    pub(super) fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            dimension: self.dimension,
            metric: self.metric,
            vectors: self
                .data
                .chunks_exact(self.dimension.max(1))
                .map(<[f32]>::to_vec)
                .collect(),
            live: self.live.clone(),
            generation: self.generation,
        }
    }

    pub(super) fn restore(&mut self, snapshot: IndexSnapshot) -> Result<()> {
        super::check_snapshot(&snapshot, self.dimension, self.metric)?;
        let mut data = Vec::with_capacity(snapshot.vectors.len() * self.dimension);
        for vector in &snapshot.vectors {
            self.check(vector)?;
            data.extend_from_slice(vector);
        }
        self.tombstones = snapshot.live.iter().filter(|live| !**live).count();
        self.data = data;
        self.live = snapshot.live;
        self.generation = snapshot.generation;
        Ok(())
    }
}
