//! Durable catalog on redb.

use redb::{Database, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::predicate::Predicate;
use crate::types::{Chunk, ContentHash, Document, Slot};

use super::{CatalogStats, MemoryCatalog, MetadataCatalog};

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

const DOCUMENTS_TABLE: JsonTable = TableDefinition::new("documents");
const CHUNKS_TABLE: JsonTable = TableDefinition::new("chunks");
const META_TABLE: TableDefinition<'static, &'static str, u64> = TableDefinition::new("meta");

const GENERATION_KEY: &str = "generation";

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Catalog persisted in a redb database.
///
/// Every mutation is committed to disk before it is applied to an in-memory mirror, and all
/// reads are served from the mirror. Rows are stored as JSON so metadata keys added later never
/// require migrating existing rows.
///
/// # Example
///
/// ```rust,no_run
/// use tessera_store::catalog::{MetadataCatalog, RedbCatalog};
///
/// let catalog = RedbCatalog::open("./store/default/catalog.redb").unwrap();
/// println!("{:?}", catalog.stats().unwrap());
/// ```
pub struct RedbCatalog {
    path: PathBuf,
    db: Database,
    mirror: MemoryCatalog,
}

impl std::fmt::Debug for RedbCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCatalog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbCatalog {
    /// Creates or opens a catalog database and loads it into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or a stored row cannot be decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(db_err)?;

        let write_txn = db.begin_write().map_err(db_err)?;
        write_txn.open_table(DOCUMENTS_TABLE).map_err(db_err)?;
        write_txn.open_table(CHUNKS_TABLE).map_err(db_err)?;
        write_txn.open_table(META_TABLE).map_err(db_err)?;
        write_txn.commit().map_err(db_err)?;

        let mirror = Self::load_mirror(&db)?;
        info!(
            path = %path.display(),
            documents = mirror.list_documents()?.len(),
            chunks = mirror.all_chunks()?.len(),
            "opened catalog"
        );

        Ok(Self { path, db, mirror })
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_mirror(db: &Database) -> Result<MemoryCatalog> {
        let mut mirror = MemoryCatalog::new();
        for document in Self::read_all::<Document>(db, DOCUMENTS_TABLE)? {
            mirror.upsert_document(document)?;
        }
        for chunk in Self::read_all::<Chunk>(db, CHUNKS_TABLE)? {
            mirror.upsert_chunk(chunk)?;
        }
        mirror.set_generation(Self::read_generation(db)?)?;
        Ok(mirror)
    }

    fn read_generation(db: &Database) -> Result<u64> {
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(META_TABLE).map_err(db_err)?;
        Ok(table
            .get(GENERATION_KEY)
            .map_err(db_err)?
            .map_or(0, |value| value.value()))
    }

    fn read_all<T: DeserializeOwned>(db: &Database, definition: JsonTable) -> Result<Vec<T>> {
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(definition).map_err(db_err)?;

        let mut rows = Vec::new();
        for result in table.iter().map_err(db_err)? {
            let (_, value) = result.map_err(db_err)?;
            let row = serde_json::from_slice(value.value())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn put<T: Serialize>(&self, definition: JsonTable, key: &str, row: &T) -> Result<()> {
        let serialized =
            serde_json::to_vec(row).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(definition).map_err(db_err)?;
            table
                .insert(key, serialized.as_slice())
                .map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn delete(&self, definition: JsonTable, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(definition).map_err(db_err)?;
            table.remove(key).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }
}

impl MetadataCatalog for RedbCatalog {
    fn upsert_document(&mut self, document: Document) -> Result<()> {
        self.put(DOCUMENTS_TABLE, &document.id, &document)?;
        self.mirror.upsert_document(document)
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.mirror.get_document(id)
    }

    fn list_documents(&self) -> Result<Vec<Document>> {
        self.mirror.list_documents()
    }

    fn delete_document(&mut self, id: &str) -> Result<Option<Document>> {
        if self.mirror.get_document(id)?.is_none() {
            return Ok(None);
        }
        self.delete(DOCUMENTS_TABLE, id)?;
        self.mirror.delete_document(id)
    }

    fn upsert_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.put(CHUNKS_TABLE, &chunk.id, &chunk)?;
        self.mirror.upsert_chunk(chunk)
    }

    fn set_slot(&mut self, chunk_id: &str, slot: Option<Slot>) -> Result<()> {
        let mut chunk = self
            .mirror
            .get_chunk(chunk_id)?
            .ok_or_else(|| StoreError::NotBound(chunk_id.to_owned()))?;
        chunk.slot = slot;
        self.put(CHUNKS_TABLE, chunk_id, &chunk)?;
        debug!(chunk_id, ?slot, "slot pointer written");
        self.mirror.set_slot(chunk_id, slot)
    }

    fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        self.mirror.get_chunk(id)
    }

    fn get_chunk_hashes(&self, document_id: &str) -> Result<HashMap<String, ContentHash>> {
        self.mirror.get_chunk_hashes(document_id)
    }

    fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        self.mirror.get_chunks(ids)
    }

    fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.mirror.chunks_for_document(document_id)
    }

    fn all_chunks(&self) -> Result<Vec<Chunk>> {
        self.mirror.all_chunks()
    }

    fn filter(
        &self,
        predicate: &Predicate,
        candidates: Option<&[String]>,
    ) -> Result<HashSet<String>> {
        self.mirror.filter(predicate, candidates)
    }

    fn delete_chunk(&mut self, id: &str) -> Result<Option<Chunk>> {
        if self.mirror.get_chunk(id)?.is_none() {
            return Ok(None);
        }
        self.delete(CHUNKS_TABLE, id)?;
        self.mirror.delete_chunk(id)
    }

    fn stats(&self) -> Result<CatalogStats> {
        self.mirror.stats()
    }

    fn generation(&self) -> Result<u64> {
        self.mirror.generation()
    }

    fn set_generation(&mut self, generation: u64) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(META_TABLE).map_err(db_err)?;
            table.insert(GENERATION_KEY, generation).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        debug!(generation, "catalog generation written");
        self.mirror.set_generation(generation)
    }
}
