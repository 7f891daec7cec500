//! Metadata catalogs: the relational side of the store.
//!
//! A catalog holds [`Document`] and [`Chunk`] rows keyed by string id. Each chunk row carries a
//! slot pointer that stays `None` while its vector write is in flight; only rows with a slot are
//! *committed*, and only committed rows are visible to [`MetadataCatalog::get_chunk_hashes`],
//! [`MetadataCatalog::filter`] and [`MetadataCatalog::stats`].

mod memory;
mod redb_backend;

pub use memory::MemoryCatalog;
pub use redb_backend::RedbCatalog;

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::predicate::Predicate;
use crate::types::{Chunk, ContentHash, Document, Slot};

/// Row counts reported by a catalog.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    /// Documents known to the catalog.
    pub document_count: usize,
    /// Committed chunks (rows with a bound slot).
    pub chunk_count: usize,
    /// Rows whose vector write never completed.
    pub pending_count: usize,
}

/// Relational store of documents and chunks.
///
/// Only the [`IdentityBinder`](crate::binder::IdentityBinder) calls the chunk mutators.
pub trait MetadataCatalog: Send + Sync + std::fmt::Debug {
    /// Inserts or replaces a document row.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be written.
    fn upsert_document(&mut self, document: Document) -> Result<()>;

    /// Looks up a document row.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All document rows ordered by id.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn list_documents(&self) -> Result<Vec<Document>>;

    /// At most `limit` document rows ordered by id, skipping the first `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn list_documents_page(&self, offset: usize, limit: usize) -> Result<Vec<Document>> {
        Ok(self
            .list_documents()?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// Removes a document row; its chunk rows are untouched. Returns the removed row.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be written.
    fn delete_document(&mut self, id: &str) -> Result<Option<Document>>;

    /// Inserts or replaces a chunk row.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be written.
    fn upsert_chunk(&mut self, chunk: Chunk) -> Result<()>;

    /// Sets or clears the slot pointer of an existing chunk row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotBound`](crate::StoreError::NotBound) if no row exists.
    fn set_slot(&mut self, chunk_id: &str, slot: Option<Slot>) -> Result<()>;

    /// Looks up one chunk row, committed or not.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Content hashes of a document's committed chunks, keyed by chunk id.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn get_chunk_hashes(&self, document_id: &str) -> Result<HashMap<String, ContentHash>>;

    /// Committed chunks for the given ids, in input order. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// All rows of a document, committed or not, ordered by position.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Every chunk row, committed or not.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn all_chunks(&self) -> Result<Vec<Chunk>>;

    /// Ids of committed chunks matching `predicate`, restricted to `candidates` when given.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn filter(&self, predicate: &Predicate, candidates: Option<&[String]>)
    -> Result<HashSet<String>>;

    /// Removes a chunk row and returns it.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be written.
    fn delete_chunk(&mut self, id: &str) -> Result<Option<Chunk>>;

    /// Row counts.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn stats(&self) -> Result<CatalogStats>;

    /// Compaction generation the slot pointers refer to. Zero for a new catalog.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn generation(&self) -> Result<u64>;

    /// Records the compaction generation the slot pointers refer to.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be written.
    fn set_generation(&mut self, generation: u64) -> Result<()>;
}
