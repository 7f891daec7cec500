//! The store handle: one namespace of documents, chunks and vectors.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::Embedder;
use tracing::{info, instrument, warn};

use crate::binder::{CompactionReport, ConsistencyReport, IdentityBinder, RepairReport};
use crate::cache::EmbeddingCache;
use crate::catalog::{MemoryCatalog, RedbCatalog};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::index::new_index;
use crate::ingest::{
    CancelFlag, DifferentialIngestor, IngestPlan, IngestReport, IngestStage, ParsedDocument,
};
use crate::persistence::{CATALOG_FILE, INDEX_FILE};
use crate::predicate::Predicate;
use crate::query::{HybridQueryEngine, QueryRequest};
use crate::types::{Chunk, Document, RetrievalResult};

/// Options for [`Store::open`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    repair: bool,
}

impl OpenOptions {
    /// Default options: an inconsistent store fails to open.
    #[must_use]
    pub const fn new() -> Self {
        Self { repair: false }
    }

    /// Repairs an inconsistent store on open instead of failing.
    #[must_use]
    pub const fn repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }
}

/// Store-wide counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StoreStats {
    /// Document rows.
    pub documents: usize,
    /// Committed chunks.
    pub chunks: usize,
    /// Chunk rows whose vector write never completed.
    pub pending: usize,
    /// Live vector slots.
    pub vectors: usize,
    /// Tombstoned vector slots awaiting compaction.
    pub tombstones: usize,
    /// Share of slots that are tombstoned.
    pub tombstone_ratio: f32,
}

/// A content-addressed hybrid retrieval store.
///
/// Cloning is cheap: clones share the same index and catalog.
///
/// # Example
///
/// ```rust,no_run
/// use tessera_store::{OpenOptions, ParsedDocument, Store, StoreConfig};
/// use tessera_core::Embedder;
///
/// async fn example<E: Embedder>(embedder: &E) -> tessera_store::Result<()> {
///     let config = StoreConfig::new(embedder.dim());
///     let store = Store::open("./data", "papers", config, OpenOptions::new())?;
///
///     let document = ParsedDocument::from_texts("D1", ["The sky is blue.", "Grass is green."]);
///     let report = store.ingest(&document, embedder).await?;
///     println!("inserted {} chunks", report.inserted.len());
///
///     for hit in store.query_text(embedder, "what colour is the sky", 3, None).await? {
///         println!("{}. {} ({:.3})", hit.rank, hit.chunk.text, hit.score);
///     }
///     store.save()
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Store {
    binder: Arc<IdentityBinder>,
    ingestor: Arc<DifferentialIngestor>,
    engine: Arc<HybridQueryEngine>,
    config: StoreConfig,
    dir: Option<PathBuf>,
}

impl Store {
    /// Creates a store that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the configuration is unusable.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let index = new_index(config.index_kind, config.dimension, config.metric);
        let binder = IdentityBinder::new(index, Box::new(MemoryCatalog::new()))?;
        Ok(Self::assemble(Arc::new(binder), config, None))
    }

    /// Opens or creates the namespace directory `<root>/<namespace>`.
    ///
    /// The catalog is written through on every mutation; the vector index is written by
    /// [`save`](Self::save). Both are loaded and checked against each other before the store is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConsistencyViolation`] if the index and catalog disagree and
    ///   [`OpenOptions::repair`] is not set.
    /// - [`StoreError::DimensionMismatch`] or [`StoreError::Config`] if the stored index was built
    ///   with another dimension or metric.
    /// - Storage errors if either file cannot be read.
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub fn open(
        root: impl AsRef<Path>,
        namespace: &str,
        config: StoreConfig,
        options: OpenOptions,
    ) -> Result<Self> {
        config.validate()?;
        let dir = root.as_ref().join(namespace);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Persistence {
            path: dir.clone(),
            source,
        })?;

        let mut index = new_index(config.index_kind, config.dimension, config.metric);
        index.load(&dir.join(INDEX_FILE))?;
        let catalog = RedbCatalog::open(dir.join(CATALOG_FILE))?;
        let binder = Arc::new(IdentityBinder::new(index, Box::new(catalog))?);

        let report = binder.verify()?;
        if !report.is_consistent() {
            if options.repair {
                binder.repair()?;
                binder.save_index(&dir.join(INDEX_FILE))?;
            } else {
                warn!(?report, "store is inconsistent, refusing to open");
                report.into_result()?;
            }
        }

        info!(
            path = %dir.display(),
            chunks = binder.len(),
            "opened store"
        );
        Ok(Self::assemble(binder, config, Some(dir)))
    }

    fn assemble(binder: Arc<IdentityBinder>, config: StoreConfig, dir: Option<PathBuf>) -> Self {
        let ingestor = DifferentialIngestor::new(Arc::clone(&binder), config.embed_batch_size);
        let engine = HybridQueryEngine::new(Arc::clone(&binder), &config);
        Self {
            binder,
            ingestor: Arc::new(ingestor),
            engine: Arc::new(engine),
            config,
            dir,
        }
    }

    /// Reuses embeddings from `cache` for chunks whose content has not changed.
    ///
    /// The cache is installed on the shared ingestor, so every clone of this store uses it.
    #[must_use]
    pub fn with_cache(self, cache: Arc<dyn EmbeddingCache>) -> Self {
        self.ingestor.set_cache(cache);
        self
    }

    /// Configuration the store was created with.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Namespace directory, or `None` for an in-memory store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The binder behind this store.
    #[must_use]
    pub fn binder(&self) -> &IdentityBinder {
        &self.binder
    }

    /// Diffs a document against the stored state without changing anything.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn plan(&self, document: &ParsedDocument) -> Result<IngestPlan> {
        self.ingestor.plan(document)
    }

    /// Ingests a document, embedding only chunks that are new or changed.
    ///
    /// # Errors
    ///
    /// Fails on structural or storage errors. Per-chunk embedding failures are listed in the
    /// report.
    pub async fn ingest<E: Embedder>(
        &self,
        document: &ParsedDocument,
        embedder: &E,
    ) -> Result<IngestReport> {
        self.ingestor.ingest(document, embedder).await
    }

    /// Ingests a document, reporting each stage to `on_progress`.
    ///
    /// # Errors
    ///
    /// See [`ingest`](Self::ingest).
    pub async fn ingest_with_progress<E, F>(
        &self,
        document: &ParsedDocument,
        embedder: &E,
        on_progress: F,
    ) -> Result<IngestReport>
    where
        E: Embedder,
        F: FnMut(&IngestStage) + Send,
    {
        self.ingestor
            .ingest_with_progress(document, embedder, on_progress)
            .await
    }

    /// Ingests a document until `cancel` is set.
    ///
    /// # Errors
    ///
    /// See [`ingest`](Self::ingest).
    pub async fn ingest_cancellable<E: Embedder>(
        &self,
        document: &ParsedDocument,
        embedder: &E,
        cancel: &CancelFlag,
    ) -> Result<IngestReport> {
        self.ingestor
            .ingest_cancellable(document, embedder, cancel)
            .await
    }

    /// Runs a hybrid query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DimensionMismatch`] for a query vector of the wrong length.
    pub fn query(&self, request: &QueryRequest) -> Result<Vec<RetrievalResult>> {
        self.engine.query(request)
    }

    /// Embeds `text` and runs a query re-ranked by lexical overlap with it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryEmbedding`] if the embedder fails, or any error of
    /// [`query`](Self::query).
    pub async fn query_text<E: Embedder>(
        &self,
        embedder: &E,
        text: &str,
        k: usize,
        predicate: Option<Predicate>,
    ) -> Result<Vec<RetrievalResult>> {
        let vector = embedder
            .embed(text)
            .await
            .map_err(StoreError::QueryEmbedding)?;
        let mut request = QueryRequest::new(vector, k).rerank(text);
        request.predicate = predicate;
        self.engine.query(&request)
    }

    /// Finds chunks similar to a stored chunk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotBound`] if `chunk_id` is not stored.
    pub fn similar_to(
        &self,
        chunk_id: &str,
        k: usize,
        predicate: Option<Predicate>,
    ) -> Result<Vec<RetrievalResult>> {
        self.engine.similar_to(chunk_id, k, predicate)
    }

    /// Removes a document and every chunk and vector belonging to it. Returns the number of
    /// chunks removed.
    ///
    /// Waits for an ingestion of the same document that is already running.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DocumentNotFound`] for an unknown document.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let removed = self.ingestor.delete_document(document_id).await?;
        info!(document_id, removed, "deleted document");
        Ok(removed)
    }

    /// Looks up a document row.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        self.binder.read().catalog().get_document(document_id)
    }

    /// All document rows.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        self.binder.read().catalog().list_documents()
    }

    /// One page of document rows ordered by id.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn list_documents_page(&self, offset: usize, limit: usize) -> Result<Vec<Document>> {
        self.binder
            .read()
            .catalog()
            .list_documents_page(offset, limit)
    }

    /// Chunk rows of a document in position order.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.binder.read().catalog().chunks_for_document(document_id)
    }

    /// Writes the vector index to the namespace directory. A no-op for in-memory stores.
    ///
    /// # Errors
    ///
    /// Fails if the index file cannot be written.
    pub fn save(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        self.binder.save_index(&dir.join(INDEX_FILE))?;
        info!(path = %dir.display(), vectors = self.binder.len(), "saved store");
        Ok(())
    }

    /// Store-wide counters.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> Result<StoreStats> {
        let stats = self.binder.stats()?;
        let slots = stats.index_size + stats.tombstones;
        let tombstone_ratio = if slots == 0 {
            0.0
        } else {
            stats.tombstones as f32 / slots as f32
        };
        Ok(StoreStats {
            documents: stats.catalog.document_count,
            chunks: stats.catalog.chunk_count,
            pending: stats.catalog.pending_count,
            vectors: stats.index_size,
            tombstones: stats.tombstones,
            tombstone_ratio,
        })
    }

    /// Checks that the index and the catalog agree.
    ///
    /// # Errors
    ///
    /// Fails only if the catalog cannot be read.
    pub fn verify(&self) -> Result<ConsistencyReport> {
        self.binder.verify()
    }

    /// Repairs inconsistencies with the catalog as the authority, then saves.
    ///
    /// # Errors
    ///
    /// Fails if the catalog or the index file cannot be written.
    pub fn repair(&self) -> Result<RepairReport> {
        let report = self.binder.repair()?;
        if !report.is_noop() {
            self.save()?;
        }
        Ok(report)
    }

    /// Reclaims tombstoned slots, then saves.
    ///
    /// # Errors
    ///
    /// Fails if the catalog or the index file cannot be written.
    pub fn compact(&self) -> Result<CompactionReport> {
        let report = self.binder.compact()?;
        if report.reclaimed > 0 {
            self.save()?;
        }
        Ok(report)
    }

    /// Compacts when the tombstone ratio exceeds
    /// [`compaction_threshold`](StoreConfig::compaction_threshold).
    ///
    /// # Errors
    ///
    /// See [`compact`](Self::compact).
    pub fn compact_if_needed(&self) -> Result<Option<CompactionReport>> {
        if self.stats()?.tombstone_ratio <= self.config.compaction_threshold {
            return Ok(None);
        }
        self.compact().map(Some)
    }
}
