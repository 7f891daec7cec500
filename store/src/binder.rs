//! The identity binder: the only writer of the vector index and the catalog.
//!
//! [`IdentityBinder`] owns a [`VectorIndex`], a [`MetadataCatalog`] and the bijection between
//! chunk ids and vector slots. Every mutation that touches more than one of the three goes
//! through it, under one exclusive lock, in a fixed order:
//!
//! | operation | order |
//! |-----------|-------|
//! | [`bind`](IdentityBinder::bind) | pending row, vector slot, slot pointer + binding |
//! | [`rebind`](IdentityBinder::rebind) | new vector slot, row with new hash and slot, binding, tombstone old slot |
//! | [`unbind`](IdentityBinder::unbind) | row, binding, tombstone slot |
//! | [`compact`](IdentityBinder::compact) | catalog generation, renumbered index, renumbered rows |
//!
//! A failure part way through rolls back the earlier steps. A crash part way through leaves at
//! worst a pending row or an unowned live slot, both of which [`verify`](IdentityBinder::verify)
//! reports and [`repair`](IdentityBinder::repair) removes.
//!
//! Compaction renumbers slots, so the catalog and the index each carry a generation that
//! compaction bumps. Slot pointers are only meaningful while both generations agree; when they
//! differ (the catalog was renumbered but the index on disk was not), every row is treated as
//! stale.
//!
//! Readers take a shared lock through [`IdentityBinder::read`] and never observe a binding whose
//! row or slot is missing.

use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogStats, MetadataCatalog};
use crate::error::{Result, StoreError};
use crate::hashing::document_fingerprint;
use crate::index::{IndexSnapshot, VectorIndex};
use crate::types::{Chunk, Document, Slot};

/// Outcome of a consistency check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Committed catalog rows.
    pub catalog_chunks: usize,
    /// Live vector slots.
    pub index_slots: usize,
    /// Binding entries.
    pub bindings: usize,
    /// Rows whose vector write never completed.
    pub pending_rows: Vec<String>,
    /// Committed rows pointing at a slot that is tombstoned or does not exist.
    pub dangling_rows: Vec<String>,
    /// Rows that claim a slot also claimed by another row.
    pub conflicting_rows: Vec<String>,
    /// Live slots no row points at.
    pub orphan_slots: Vec<Slot>,
    /// Compaction generation recorded by the catalog.
    pub catalog_generation: u64,
    /// Compaction generation of the vector index.
    pub index_generation: u64,
}

impl ConsistencyReport {
    /// Returns `true` when every slot and row pair up one to one.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.catalog_generation == self.index_generation
            && self.pending_rows.is_empty()
            && self.dangling_rows.is_empty()
            && self.conflicting_rows.is_empty()
            && self.orphan_slots.is_empty()
            && self.catalog_chunks == self.index_slots
            && self.index_slots == self.bindings
    }

    /// Converts an inconsistent report into a [`StoreError::ConsistencyViolation`].
    ///
    /// # Errors
    ///
    /// Returns the violation when [`is_consistent`](Self::is_consistent) is `false`.
    pub fn into_result(self) -> Result<()> {
        if self.is_consistent() {
            return Ok(());
        }
        let detail = if self.catalog_generation == self.index_generation {
            format!(
                "{} pending rows, {} dangling rows, {} conflicting rows, {} orphan slots",
                self.pending_rows.len(),
                self.dangling_rows.len(),
                self.conflicting_rows.len(),
                self.orphan_slots.len()
            )
        } else {
            format!(
                "catalog slots follow compaction generation {} but the index is at generation {}",
                self.catalog_generation, self.index_generation
            )
        };
        Err(StoreError::ConsistencyViolation {
            catalog_chunks: self.catalog_chunks,
            index_slots: self.index_slots,
            bindings: self.bindings,
            detail,
        })
    }
}

/// What [`IdentityBinder::repair`] changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Pending rows deleted.
    pub dropped_pending: usize,
    /// Rows deleted because their slot was not live.
    pub dropped_dangling: usize,
    /// Rows deleted because they shared a slot.
    pub dropped_conflicting: usize,
    /// Rows deleted because their slot pointers belong to another compaction generation.
    pub dropped_stale: usize,
    /// Live slots tombstoned because no row owned them.
    pub tombstoned_orphans: usize,
    /// Documents whose fingerprint was reset to their surviving chunks.
    pub documents_touched: usize,
}

impl RepairReport {
    /// Returns `true` if repair changed nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.dropped_pending == 0
            && self.dropped_dangling == 0
            && self.dropped_conflicting == 0
            && self.dropped_stale == 0
            && self.tombstoned_orphans == 0
    }
}

/// What [`IdentityBinder::compact`] changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Tombstoned slots reclaimed.
    pub reclaimed: usize,
    /// Bound chunks whose slot number changed.
    pub remapped: usize,
}

/// Sizes of the three structures the binder keeps in step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BinderStats {
    /// Catalog row counts.
    pub catalog: CatalogStats,
    /// Live vector slots.
    pub index_size: usize,
    /// Tombstoned vector slots.
    pub tombstones: usize,
    /// Binding entries.
    pub bindings: usize,
}

fn slot_at(offset: usize) -> Result<Slot> {
    u32::try_from(offset)
        .map(Slot)
        .map_err(|_| StoreError::Config("vector index is out of slots".into()))
}

/// State guarded by the binder's lock.
///
/// Only read access escapes this module.
#[derive(Debug)]
pub struct BinderState {
    index: Box<dyn VectorIndex>,
    catalog: Box<dyn MetadataCatalog>,
    by_id: HashMap<String, Slot>,
    by_slot: HashMap<Slot, String>,
}

/// Shared read access to the binder's state.
pub type BinderRead<'a> = RwLockReadGuard<'a, BinderState>;

impl BinderState {
    /// The vector index.
    #[must_use]
    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// The metadata catalog.
    #[must_use]
    pub fn catalog(&self) -> &dyn MetadataCatalog {
        self.catalog.as_ref()
    }

    /// Slot bound to `chunk_id`.
    #[must_use]
    pub fn slot_of(&self, chunk_id: &str) -> Option<Slot> {
        self.by_id.get(chunk_id).copied()
    }

    /// Maps slots to chunk ids, dropping tombstoned or unbound slots and keeping order.
    #[must_use]
    pub fn resolve_to_ids(&self, slots: &[Slot]) -> Vec<String> {
        slots
            .iter()
            .filter(|slot| self.index.is_live(**slot))
            .filter_map(|slot| self.by_slot.get(slot).cloned())
            .collect()
    }

    /// Number of binding entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        let expected = self.index.dimension();
        if vector.len() == expected {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected,
                actual: vector.len(),
            })
        }
    }

    fn rebuild_binding(&mut self) -> Result<()> {
        self.by_id.clear();
        self.by_slot.clear();
        for chunk in self.catalog.all_chunks()? {
            if let Some(slot) = chunk.slot {
                self.by_slot.insert(slot, chunk.id.clone());
                self.by_id.insert(chunk.id, slot);
            }
        }
        Ok(())
    }

    fn rollback_row(&mut self, chunk_id: &str) {
        if let Err(e) = self.catalog.delete_chunk(chunk_id) {
            warn!(chunk_id, error = %e, "rollback could not delete pending row");
        }
    }

    fn bind(&mut self, mut chunk: Chunk, vector: &[f32]) -> Result<Slot> {
        self.check_dimension(vector)?;
        if let Some(&slot) = self.by_id.get(&chunk.id) {
            return Err(StoreError::IdentityConflict {
                chunk_id: chunk.id,
                slot,
            });
        }

        let chunk_id = chunk.id.clone();
        chunk.slot = None;
        self.catalog.upsert_chunk(chunk)?;

        let slot = match self.index.add(vector) {
            Ok(slot) => slot,
            Err(e) => {
                self.rollback_row(&chunk_id);
                return Err(e);
            }
        };

        if let Err(e) = self.catalog.set_slot(&chunk_id, Some(slot)) {
            self.index.remove(&[slot]);
            self.rollback_row(&chunk_id);
            return Err(e);
        }

        self.by_slot.insert(slot, chunk_id.clone());
        self.by_id.insert(chunk_id, slot);
        Ok(slot)
    }

    fn rebind(&mut self, mut chunk: Chunk, vector: &[f32]) -> Result<Slot> {
        self.check_dimension(vector)?;
        let Some(&old) = self.by_id.get(&chunk.id) else {
            return Err(StoreError::NotBound(chunk.id));
        };

        let slot = self.index.add(vector)?;
        let chunk_id = chunk.id.clone();
        chunk.slot = Some(slot);
        if let Err(e) = self.catalog.upsert_chunk(chunk) {
            self.index.remove(&[slot]);
            return Err(e);
        }

        self.by_slot.remove(&old);
        self.by_slot.insert(slot, chunk_id.clone());
        self.by_id.insert(chunk_id, slot);
        self.index.remove(&[old]);
        Ok(slot)
    }

    fn unbind(&mut self, chunk_id: &str) -> Result<Slot> {
        let slot = self
            .slot_of(chunk_id)
            .ok_or_else(|| StoreError::NotBound(chunk_id.to_owned()))?;

        self.catalog.delete_chunk(chunk_id)?;
        self.by_id.remove(chunk_id);
        self.by_slot.remove(&slot);
        self.index.remove(&[slot]);
        Ok(slot)
    }

    fn verify(&self) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport {
            index_slots: self.index.size(),
            bindings: self.by_id.len(),
            catalog_generation: self.catalog.generation()?,
            index_generation: self.index.generation(),
            ..ConsistencyReport::default()
        };

        let mut claims: HashMap<Slot, Vec<String>> = HashMap::new();
        for chunk in self.catalog.all_chunks()? {
            match chunk.slot {
                None => report.pending_rows.push(chunk.id),
                Some(slot) => {
                    report.catalog_chunks += 1;
                    if self.index.is_live(slot) {
                        claims.entry(slot).or_default().push(chunk.id);
                    } else {
                        report.dangling_rows.push(chunk.id);
                    }
                }
            }
        }

        for ids in claims.values() {
            if ids.len() > 1 {
                report.conflicting_rows.extend(ids.iter().cloned());
            }
        }
        report.orphan_slots = self
            .index
            .live_slots()
            .into_iter()
            .filter(|slot| !claims.contains_key(slot))
            .collect();

        report.pending_rows.sort();
        report.dangling_rows.sort();
        report.conflicting_rows.sort();
        Ok(report)
    }

    fn repair(&mut self) -> Result<RepairReport> {
        let found = self.verify()?;
        if found.catalog_generation != found.index_generation {
            return self.reset_stale_numbering();
        }
        let mut report = RepairReport::default();
        let mut touched: HashSet<String> = HashSet::new();

        let mut drop_rows = |state: &mut Self, ids: &[String], counter: &mut usize| -> Result<()> {
            for id in ids {
                if let Some(chunk) = state.catalog.delete_chunk(id)? {
                    touched.insert(chunk.document_id);
                    *counter += 1;
                }
            }
            Ok(())
        };

        drop_rows(self, &found.pending_rows, &mut report.dropped_pending)?;
        drop_rows(self, &found.dangling_rows, &mut report.dropped_dangling)?;

        let mut conflicting_slots = Vec::new();
        for id in &found.conflicting_rows {
            if let Some(slot) = self.catalog.get_chunk(id)?.and_then(|c| c.slot) {
                conflicting_slots.push(slot);
            }
        }
        drop_rows(self, &found.conflicting_rows, &mut report.dropped_conflicting)?;
        self.index.remove(&conflicting_slots);

        self.index.remove(&found.orphan_slots);
        report.tombstoned_orphans = found.orphan_slots.len();

        for document_id in &touched {
            self.refresh_fingerprint(document_id)?;
        }
        report.documents_touched = touched.len();

        self.rebuild_binding()?;
        Ok(report)
    }

    /// Drops every chunk row and tombstones every live slot, then adopts the index's
    /// generation. Every chunk is re-detected as an insert on the next ingestion.
    fn reset_stale_numbering(&mut self) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let mut touched: HashSet<String> = HashSet::new();
        for chunk in self.catalog.all_chunks()? {
            if self.catalog.delete_chunk(&chunk.id)?.is_some() {
                touched.insert(chunk.document_id);
                report.dropped_stale += 1;
            }
        }

        let live = self.index.live_slots();
        self.index.remove(&live);
        report.tombstoned_orphans = live.len();
        self.catalog.set_generation(self.index.generation())?;

        for document_id in &touched {
            self.refresh_fingerprint(document_id)?;
        }
        report.documents_touched = touched.len();

        self.rebuild_binding()?;
        Ok(report)
    }

    fn refresh_fingerprint(&mut self, document_id: &str) -> Result<()> {
        let Some(mut document) = self.catalog.get_document(document_id)? else {
            return Ok(());
        };
        let hashes: Vec<_> = self
            .catalog
            .chunks_for_document(document_id)?
            .into_iter()
            .filter(Chunk::is_committed)
            .map(|chunk| chunk.content_hash)
            .collect();
        document.content_fingerprint =
            document_fingerprint(hashes, document.page_count, &document.filename);
        self.catalog.upsert_document(document)
    }

    fn compact(&mut self) -> Result<CompactionReport> {
        let snapshot = self.index.snapshot();
        let reclaimed = snapshot.live.iter().filter(|live| !**live).count();
        if reclaimed == 0 {
            return Ok(CompactionReport::default());
        }

        let mut remap: BTreeMap<Slot, Slot> = BTreeMap::new();
        let mut vectors = Vec::with_capacity(snapshot.vectors.len() - reclaimed);
        for (old, (vector, live)) in snapshot.vectors.into_iter().zip(snapshot.live).enumerate() {
            if !live {
                continue;
            }
            remap.insert(slot_at(old)?, slot_at(vectors.len())?);
            vectors.push(vector);
        }

        // The catalog moves to the new generation before any slot pointer changes, so a crash
        // anywhere below leaves the two artifacts on different generations.
        let previous = snapshot.generation;
        let generation = previous + 1;
        self.catalog.set_generation(generation)?;

        let compacted = IndexSnapshot {
            dimension: snapshot.dimension,
            metric: snapshot.metric,
            live: vec![true; vectors.len()],
            vectors,
            generation,
        };
        if let Err(e) = self.index.restore(compacted) {
            if let Err(rollback) = self.catalog.set_generation(previous) {
                warn!(error = %rollback, "could not restore catalog generation");
            }
            return Err(e);
        }

        let mut remapped = 0;
        for (chunk_id, old) in self.by_id.clone() {
            match remap.get(&old) {
                Some(&new) if new != old => {
                    self.catalog.set_slot(&chunk_id, Some(new))?;
                    remapped += 1;
                }
                Some(_) => {}
                None => {
                    warn!(chunk_id = %chunk_id, slot = %old, "bound slot was not live during compaction");
                }
            }
        }
        self.rebuild_binding()?;

        Ok(CompactionReport {
            reclaimed,
            remapped,
        })
    }
}

/// Keeps the vector index, the catalog and the id/slot binding consistent.
pub struct IdentityBinder {
    state: RwLock<BinderState>,
}

impl std::fmt::Debug for IdentityBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("IdentityBinder")
            .field("bindings", &state.by_id.len())
            .field("index", &state.index)
            .finish_non_exhaustive()
    }
}

impl IdentityBinder {
    /// Takes ownership of an index and a catalog and derives the binding from the catalog's
    /// committed rows.
    ///
    /// No consistency check runs here; call [`verify`](Self::verify) before serving.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn new(index: Box<dyn VectorIndex>, catalog: Box<dyn MetadataCatalog>) -> Result<Self> {
        let mut state = BinderState {
            index,
            catalog,
            by_id: HashMap::new(),
            by_slot: HashMap::new(),
        };
        state.rebuild_binding()?;
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Takes the shared lock for reading.
    pub fn read(&self) -> BinderRead<'_> {
        self.state.read()
    }

    /// Vector dimension of the index.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.state.read().index.dimension()
    }

    /// Binds a new chunk to a new vector slot and commits its row.
    ///
    /// Nothing is written if the vector has the wrong dimension or the chunk is already bound.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DimensionMismatch`] when the vector length is wrong.
    /// - [`StoreError::IdentityConflict`] when the chunk id is already bound; use
    ///   [`rebind`](Self::rebind) to replace its content.
    /// - Storage errors from the catalog, after rolling back.
    pub fn bind(&self, chunk: Chunk, vector: &[f32]) -> Result<Slot> {
        let chunk_id = chunk.id.clone();
        let slot = self.state.write().bind(chunk, vector)?;
        debug!(chunk_id = %chunk_id, slot = %slot, "bound chunk");
        Ok(slot)
    }

    /// Replaces the content and vector of a bound chunk. The chunk gets a fresh slot and the old
    /// slot is tombstoned, never reused.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DimensionMismatch`] when the vector length is wrong.
    /// - [`StoreError::NotBound`] when the chunk has no binding.
    pub fn rebind(&self, chunk: Chunk, vector: &[f32]) -> Result<Slot> {
        let chunk_id = chunk.id.clone();
        let slot = self.state.write().rebind(chunk, vector)?;
        debug!(chunk_id = %chunk_id, slot = %slot, "rebound chunk");
        Ok(slot)
    }

    /// Removes a chunk's row, its binding and its vector slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotBound`] when the chunk has no binding.
    pub fn unbind(&self, chunk_id: &str) -> Result<Slot> {
        let slot = self.state.write().unbind(chunk_id)?;
        debug!(chunk_id, slot = %slot, "unbound chunk");
        Ok(slot)
    }

    /// Maps slots to chunk ids, dropping tombstoned or unbound slots and keeping order.
    #[must_use]
    pub fn resolve_to_ids(&self, slots: &[Slot]) -> Vec<String> {
        self.state.read().resolve_to_ids(slots)
    }

    /// Slot bound to `chunk_id`.
    #[must_use]
    pub fn slot_of(&self, chunk_id: &str) -> Option<Slot> {
        self.state.read().slot_of(chunk_id)
    }

    /// Number of binding entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// Returns `true` when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Writes a document row.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be written.
    pub fn record_document(&self, document: Document) -> Result<()> {
        self.state.write().catalog.upsert_document(document)
    }

    /// Unbinds every chunk of a document, deletes its pending rows, then deletes the document
    /// row. Returns the number of chunks removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DocumentNotFound`] if neither a document row nor chunk rows exist.
    pub fn remove_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write();
        let chunks = state.catalog.chunks_for_document(document_id)?;
        let document = state.catalog.get_document(document_id)?;
        if document.is_none() && chunks.is_empty() {
            return Err(StoreError::DocumentNotFound(document_id.to_owned()));
        }

        for chunk in &chunks {
            if state.slot_of(&chunk.id).is_some() {
                state.unbind(&chunk.id)?;
            } else {
                state.catalog.delete_chunk(&chunk.id)?;
            }
        }
        state.catalog.delete_document(document_id)?;
        Ok(chunks.len())
    }

    /// Checks that rows, slots and the binding pair up one to one.
    ///
    /// # Errors
    ///
    /// Fails only if the catalog cannot be read; inconsistencies are reported, not raised.
    pub fn verify(&self) -> Result<ConsistencyReport> {
        self.state.read().verify()
    }

    /// Restores consistency with the catalog as the authority.
    ///
    /// Pending rows, rows whose slot is not live and rows sharing a slot are deleted, so their
    /// chunks are re-detected as inserts on the next ingestion. Live slots that no row owns are
    /// tombstoned. Affected documents get a fingerprint over their surviving chunks, and the
    /// binding is rebuilt.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read or written.
    #[instrument(skip(self))]
    pub fn repair(&self) -> Result<RepairReport> {
        let report = self.state.write().repair()?;
        if report.is_noop() {
            debug!("repair found nothing to fix");
        } else {
            warn!(?report, "repaired store");
        }
        Ok(report)
    }

    /// Rebuilds the index from its live slots, renumbering slots densely and clearing every
    /// tombstone. Catalog rows and the binding follow the new numbering, and both the catalog
    /// and the index move to the next generation.
    ///
    /// The catalog's generation is written immediately, the index's only when it is saved. A
    /// store reopened before that save fails [`verify`](Self::verify), and
    /// [`repair`](Self::repair) then drops every row so all chunks are ingested again.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be written.
    #[instrument(skip(self))]
    pub fn compact(&self) -> Result<CompactionReport> {
        let report = self.state.write().compact()?;
        if report.reclaimed > 0 {
            info!(
                reclaimed = report.reclaimed,
                remapped = report.remapped,
                "compacted vector index"
            );
        }
        Ok(report)
    }

    /// Sizes of the catalog, the index and the binding.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn stats(&self) -> Result<BinderStats> {
        let state = self.state.read();
        Ok(BinderStats {
            catalog: state.catalog.stats()?,
            index_size: state.index.size(),
            tombstones: state.index.tombstone_count(),
            bindings: state.by_id.len(),
        })
    }

    /// Writes the vector index to `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save_index(&self, path: &Path) -> Result<()> {
        self.state.read().index.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::index::{FlatIndex, Metric};

    fn binder() -> IdentityBinder {
        IdentityBinder::new(
            Box::new(FlatIndex::new(2, Metric::SquaredL2)),
            Box::new(MemoryCatalog::new()),
        )
        .unwrap()
    }

    fn assert_invariant(binder: &IdentityBinder) {
        let stats = binder.stats().unwrap();
        assert_eq!(stats.index_size, stats.catalog.chunk_count);
        assert_eq!(stats.index_size, stats.bindings);
        assert!(binder.verify().unwrap().is_consistent());
    }

    #[test]
    fn bind_writes_all_three() {
        let binder = binder();
        let slot = binder.bind(Chunk::new("D1", 0, "a"), &[1.0, 0.0]).unwrap();

        assert_eq!(binder.slot_of("D1#chunk_0"), Some(slot));
        let state = binder.read();
        assert_eq!(
            state.catalog().get_chunk("D1#chunk_0").unwrap().unwrap().slot,
            Some(slot)
        );
        assert!(state.index().is_live(slot));
        drop(state);
        assert_invariant(&binder);
    }

    #[test]
    fn dimension_mismatch_writes_nothing() {
        let binder = binder();
        let err = binder
            .bind(Chunk::new("D1", 0, "a"), &[1.0, 0.0, 0.0])
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        let stats = binder.stats().unwrap();
        assert_eq!(stats.catalog.pending_count, 0);
        assert_eq!(stats.index_size, 0);
        assert_invariant(&binder);
    }

    #[test]
    fn double_bind_is_a_conflict() {
        let binder = binder();
        let slot = binder.bind(Chunk::new("D1", 0, "a"), &[1.0, 0.0]).unwrap();
        let err = binder
            .bind(Chunk::new("D1", 0, "a2"), &[0.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, StoreError::IdentityConflict { slot: s, .. } if s == slot));
        assert_invariant(&binder);
    }

    #[test]
    fn rebind_moves_to_a_fresh_slot() {
        let binder = binder();
        let old = binder.bind(Chunk::new("D1", 0, "a"), &[1.0, 0.0]).unwrap();
        let new = binder
            .rebind(Chunk::new("D1", 0, "b"), &[0.0, 1.0])
            .unwrap();

        assert_ne!(old, new);
        let state = binder.read();
        assert!(!state.index().is_live(old));
        assert_eq!(state.index().tombstone_count(), 1);
        assert_eq!(
            state.catalog().get_chunk("D1#chunk_0").unwrap().unwrap().text,
            "b"
        );
        assert!(state.resolve_to_ids(&[old]).is_empty());
        drop(state);
        assert_invariant(&binder);

        assert!(matches!(
            binder.rebind(Chunk::new("D9", 0, "x"), &[0.0, 1.0]),
            Err(StoreError::NotBound(_))
        ));
    }

    #[test]
    fn unbind_removes_all_three() {
        let binder = binder();
        let slot = binder.bind(Chunk::new("D1", 0, "a"), &[1.0, 0.0]).unwrap();
        binder.bind(Chunk::new("D1", 1, "b"), &[0.0, 1.0]).unwrap();

        assert_eq!(binder.unbind("D1#chunk_0").unwrap(), slot);
        assert_eq!(binder.len(), 1);
        assert!(binder.read().catalog().get_chunk("D1#chunk_0").unwrap().is_none());
        assert!(matches!(
            binder.unbind("D1#chunk_0"),
            Err(StoreError::NotBound(_))
        ));
        assert_invariant(&binder);
    }

    #[test]
    fn resolve_keeps_order_and_drops_unknown() {
        let binder = binder();
        let a = binder.bind(Chunk::new("D1", 0, "a"), &[1.0, 0.0]).unwrap();
        let b = binder.bind(Chunk::new("D1", 1, "b"), &[0.0, 1.0]).unwrap();

        let ids = binder.resolve_to_ids(&[b, Slot(99), a]);
        assert_eq!(ids, vec!["D1#chunk_1".to_owned(), "D1#chunk_0".to_owned()]);
    }

    #[test]
    fn repair_drops_pending_rows_and_orphans() {
        let mut catalog = MemoryCatalog::new();
        let mut index = FlatIndex::new(2, Metric::SquaredL2);

        // A committed pair, a pending row and an unowned slot.
        let owned = index.add(&[1.0, 0.0]).unwrap();
        let orphan = index.add(&[0.0, 1.0]).unwrap();
        let mut row = Chunk::new("D1", 0, "a");
        row.slot = Some(owned);
        catalog.upsert_chunk(row).unwrap();
        catalog.upsert_chunk(Chunk::new("D1", 1, "b")).unwrap();
        let mut dangling = Chunk::new("D1", 2, "c");
        dangling.slot = Some(Slot(42));
        catalog.upsert_chunk(dangling).unwrap();

        let binder = IdentityBinder::new(Box::new(index), Box::new(catalog)).unwrap();
        let report = binder.verify().unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.pending_rows, vec!["D1#chunk_1".to_owned()]);
        assert_eq!(report.dangling_rows, vec!["D1#chunk_2".to_owned()]);
        assert_eq!(report.orphan_slots, vec![orphan]);
        assert!(matches!(
            report.into_result(),
            Err(StoreError::ConsistencyViolation { .. })
        ));

        let repaired = binder.repair().unwrap();
        assert_eq!(repaired.dropped_pending, 1);
        assert_eq!(repaired.dropped_dangling, 1);
        assert_eq!(repaired.tombstoned_orphans, 1);
        assert_invariant(&binder);
        assert!(binder.repair().unwrap().is_noop());
    }

    #[test]
    fn compaction_renumbers_slots() {
        let binder = binder();
        binder.bind(Chunk::new("D1", 0, "a"), &[1.0, 0.0]).unwrap();
        binder.bind(Chunk::new("D1", 1, "b"), &[0.0, 1.0]).unwrap();
        binder.bind(Chunk::new("D1", 2, "c"), &[1.0, 1.0]).unwrap();
        binder.unbind("D1#chunk_0").unwrap();
        binder
            .rebind(Chunk::new("D1", 1, "b2"), &[0.0, 2.0])
            .unwrap();

        let report = binder.compact().unwrap();
        assert_eq!(report.reclaimed, 2);
        assert_eq!(report.remapped, 2);

        let stats = binder.stats().unwrap();
        assert_eq!(stats.tombstones, 0);
        assert_eq!(stats.index_size, 2);
        assert_eq!(binder.slot_of("D1#chunk_2"), Some(Slot(0)));
        assert_eq!(binder.slot_of("D1#chunk_1"), Some(Slot(1)));
        let state = binder.read();
        assert_eq!(state.index().vector(Slot(1)), Some(&[0.0, 2.0][..]));
        assert_eq!(state.index().generation(), 1);
        assert_eq!(state.catalog().generation().unwrap(), 1);
        drop(state);
        assert_invariant(&binder);

        assert_eq!(binder.compact().unwrap(), CompactionReport::default());
    }

    #[test]
    fn remove_document_unbinds_every_chunk() {
        let binder = binder();
        binder.bind(Chunk::new("D1", 0, "a"), &[1.0, 0.0]).unwrap();
        binder.bind(Chunk::new("D1", 1, "b"), &[0.0, 1.0]).unwrap();
        binder.bind(Chunk::new("D2", 0, "c"), &[1.0, 1.0]).unwrap();

        assert_eq!(binder.remove_document("D1").unwrap(), 2);
        assert_eq!(binder.len(), 1);
        assert!(matches!(
            binder.remove_document("D1"),
            Err(StoreError::DocumentNotFound(_))
        ));
        assert_invariant(&binder);
    }

    #[test]
    fn generation_mismatch_drops_every_row() {
        let mut catalog = MemoryCatalog::new();
        let mut index = FlatIndex::new(2, Metric::SquaredL2);

        // Rows renumbered by a compaction whose index never reached disk: every pointer lands
        // on a live slot, but on the wrong vector.
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        for (position, slot) in [(0, 1), (1, 0)] {
            let mut row = Chunk::new("D1", position, "text");
            row.slot = Some(Slot(slot));
            catalog.upsert_chunk(row).unwrap();
        }
        catalog.set_generation(1).unwrap();

        let binder = IdentityBinder::new(Box::new(index), Box::new(catalog)).unwrap();
        let report = binder.verify().unwrap();
        assert!(report.dangling_rows.is_empty());
        assert!(report.orphan_slots.is_empty());
        assert_eq!((report.catalog_generation, report.index_generation), (1, 0));
        assert!(!report.is_consistent());

        let repaired = binder.repair().unwrap();
        assert_eq!(repaired.dropped_stale, 2);
        assert_eq!(repaired.tombstoned_orphans, 2);
        assert!(binder.is_empty());
        assert_eq!(binder.read().catalog().generation().unwrap(), 0);
        assert_invariant(&binder);
        assert!(binder.repair().unwrap().is_noop());
    }
}
