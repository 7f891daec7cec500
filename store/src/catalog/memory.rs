//! In-memory catalog.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{Result, StoreError};
use crate::predicate::Predicate;
use crate::types::{Chunk, ContentHash, Document, Slot};

use super::{CatalogStats, MetadataCatalog};

/// Catalog held entirely in memory.
///
/// Also serves as the read mirror of [`RedbCatalog`](super::RedbCatalog).
#[derive(Debug, Default, Clone)]
pub struct MemoryCatalog {
    documents: BTreeMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    by_document: HashMap<String, BTreeSet<(u32, String)>>,
    generation: u64,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn committed(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values().filter(|chunk| chunk.is_committed())
    }

    fn unindex(&mut self, chunk: &Chunk) {
        if let Some(ids) = self.by_document.get_mut(&chunk.document_id) {
            ids.remove(&(chunk.chunk_index, chunk.id.clone()));
            if ids.is_empty() {
                self.by_document.remove(&chunk.document_id);
            }
        }
    }
}

impl MetadataCatalog for MemoryCatalog {
    fn upsert_document(&mut self, document: Document) -> Result<()> {
        self.documents.insert(document.id.clone(), document);
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.get(id).cloned())
    }

    fn list_documents(&self) -> Result<Vec<Document>> {
        Ok(self.documents.values().cloned().collect())
    }

    fn list_documents_page(&self, offset: usize, limit: usize) -> Result<Vec<Document>> {
        Ok(self
            .documents
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn delete_document(&mut self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.remove(id))
    }

    fn upsert_chunk(&mut self, chunk: Chunk) -> Result<()> {
        if let Some(previous) = self.chunks.remove(&chunk.id) {
            self.unindex(&previous);
        }
        self.by_document
            .entry(chunk.document_id.clone())
            .or_default()
            .insert((chunk.chunk_index, chunk.id.clone()));
        self.chunks.insert(chunk.id.clone(), chunk);
        Ok(())
    }

    fn set_slot(&mut self, chunk_id: &str, slot: Option<Slot>) -> Result<()> {
        let chunk = self
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| StoreError::NotBound(chunk_id.to_owned()))?;
        chunk.slot = slot;
        Ok(())
    }

    fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        Ok(self.chunks.get(id).cloned())
    }

    fn get_chunk_hashes(&self, document_id: &str) -> Result<HashMap<String, ContentHash>> {
        let Some(ids) = self.by_document.get(document_id) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|(_, id)| self.chunks.get(id))
            .filter(|chunk| chunk.is_committed())
            .map(|chunk| (chunk.id.clone(), chunk.content_hash))
            .collect())
    }

    fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.chunks.get(id))
            .filter(|chunk| chunk.is_committed())
            .cloned()
            .collect())
    }

    fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let Some(ids) = self.by_document.get(document_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|(_, id)| self.chunks.get(id).cloned())
            .collect())
    }

    fn all_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.chunks.values().cloned().collect())
    }

    fn filter(
        &self,
        predicate: &Predicate,
        candidates: Option<&[String]>,
    ) -> Result<HashSet<String>> {
        let matches = |chunk: &&Chunk| chunk.is_committed() && predicate.matches(chunk);
        Ok(match candidates {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.chunks.get(id))
                .filter(matches)
                .map(|chunk| chunk.id.clone())
                .collect(),
            None => self
                .committed()
                .filter(|chunk| predicate.matches(chunk))
                .map(|chunk| chunk.id.clone())
                .collect(),
        })
    }

    fn delete_chunk(&mut self, id: &str) -> Result<Option<Chunk>> {
        let removed = self.chunks.remove(id);
        if let Some(chunk) = &removed {
            self.unindex(chunk);
        }
        Ok(removed)
    }

    fn stats(&self) -> Result<CatalogStats> {
        let chunk_count = self.committed().count();
        Ok(CatalogStats {
            document_count: self.documents.len(),
            chunk_count,
            pending_count: self.chunks.len() - chunk_count,
        })
    }

    fn generation(&self) -> Result<u64> {
        Ok(self.generation)
    }

    fn set_generation(&mut self, generation: u64) -> Result<()> {
        self.generation = generation;
        Ok(())
    }
}
