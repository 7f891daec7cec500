//! Differential ingestion.
//!
//! Re-ingesting a document only embeds and binds the chunks whose content hash changed since the
//! last pass. Ingestion runs in three phases so a slow or failing embedder never holds a store
//! lock:
//!
//! 1. **Plan**: hash the incoming chunks and diff them against the catalog's committed hashes.
//!    A document whose fingerprint is unchanged short-circuits here.
//! 2. **Embed**: fetch vectors for the changed chunks from the cache, then from the embedder in
//!    batches. Per-chunk failures are recorded and the chunk is retried on the next pass.
//! 3. **Commit**: bind or rebind each embedded chunk through the [`IdentityBinder`], checking
//!    for cancellation between chunks, then unbind chunks past the document's new end and
//!    record the document row.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_core::Embedder;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::binder::IdentityBinder;
use crate::cache::EmbeddingCache;
use crate::error::{Result, StoreError};
use crate::hashing::{content_hash, document_fingerprint};
use crate::types::{Chunk, ChunkKind, ContentHash, Document, Metadata, MetadataValue};

/// One chunk as produced by the parser/chunker collaborator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkInput {
    /// Chunk text.
    pub text: String,
    /// Page the chunk starts on.
    pub page_number: Option<u32>,
    /// Structural kind.
    pub kind: ChunkKind,
    /// Filterable metadata.
    pub metadata: Metadata,
}

impl ChunkInput {
    /// Creates a plain text chunk.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Sets the page number.
    #[must_use]
    pub const fn page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    /// Sets the chunk kind.
    #[must_use]
    pub const fn kind(mut self, kind: ChunkKind) -> Self {
        self.kind = kind;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A parsed document: an ordered list of chunks keyed by position.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedDocument {
    /// Stable document id.
    pub id: String,
    /// Where the document was read from.
    pub source_path: String,
    /// File name used in the fingerprint.
    pub filename: String,
    /// Page count reported by the parser.
    pub page_count: u32,
    /// Document-level metadata.
    pub metadata: Metadata,
    /// Chunks in document order.
    pub chunks: Vec<ChunkInput>,
}

impl ParsedDocument {
    /// Creates an empty document; the file name is taken from the last path component.
    #[must_use]
    pub fn new(id: impl Into<String>, source_path: impl Into<String>) -> Self {
        let source_path = source_path.into();
        let filename = Path::new(&source_path)
            .file_name()
            .map_or_else(|| source_path.clone(), |name| name.to_string_lossy().into_owned());
        Self {
            id: id.into(),
            source_path,
            filename,
            page_count: 0,
            metadata: Metadata::new(),
            chunks: Vec::new(),
        }
    }

    /// Creates a document from plain chunk texts.
    #[must_use]
    pub fn from_texts<I, S>(id: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let mut document = Self::new(id.clone(), id);
        document.chunks = texts.into_iter().map(ChunkInput::new).collect();
        document
    }

    /// Sets the page count.
    #[must_use]
    pub const fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count;
        self
    }

    /// Appends a chunk.
    #[must_use]
    pub fn with_chunk(mut self, chunk: ChunkInput) -> Self {
        self.chunks.push(chunk);
        self
    }

    /// Builds the catalog rows for every chunk, in order.
    ///
    /// # Errors
    ///
    /// Fails if the document has more chunks than a `u32` position can address.
    pub fn to_chunks(&self) -> Result<Vec<Chunk>> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(position, input)| {
                let index = u32::try_from(position).map_err(|_| {
                    StoreError::Config(format!("document {} has too many chunks", self.id))
                })?;
                Ok(Chunk::new(self.id.clone(), index, input.text.clone())
                    .with_page(input.page_number)
                    .with_kind(input.kind)
                    .with_metadata(input.metadata.clone()))
            })
            .collect()
    }

    /// Fingerprint of this version of the document.
    #[must_use]
    pub fn fingerprint(&self) -> ContentHash {
        document_fingerprint(
            self.chunks.iter().map(|chunk| content_hash(&chunk.text)),
            self.page_count,
            &self.filename,
        )
    }
}

/// Whether a planned chunk is new or replaces committed content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkChange {
    /// No committed chunk at this position.
    Insert,
    /// A committed chunk at this position has a different hash.
    Update,
}

/// A chunk that needs a vector.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedChunk {
    /// The new catalog row.
    pub chunk: Chunk,
    /// Insert or update.
    pub change: ChunkChange,
}

/// The minimal set of changes that brings the store up to date with a document.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestPlan {
    /// Document being planned.
    pub document_id: String,
    /// Fingerprint of the incoming version.
    pub fingerprint: ContentHash,
    /// Chunks to embed and bind.
    pub to_embed: Vec<PlannedChunk>,
    /// Chunks whose committed hash already matches.
    pub unchanged_ids: BTreeSet<String>,
    /// Committed chunks past the document's new end.
    pub to_delete: Vec<String>,
    /// The fingerprint matched and nothing else was read.
    pub skipped: bool,
}

impl IngestPlan {
    /// Returns `true` when applying the plan would change nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.to_embed.is_empty() && self.to_delete.is_empty()
    }
}

/// Stage reported to an ingestion progress callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestStage {
    /// Diffing against the catalog.
    Planning,
    /// The document fingerprint matched; nothing to do.
    Skipped,
    /// Vectors obtained so far.
    Embedding {
        /// Chunks with a vector or a failure.
        done: usize,
        /// Chunks needing a vector.
        total: usize,
    },
    /// Chunks committed so far.
    Binding {
        /// Chunks bound.
        done: usize,
        /// Chunks to bind.
        total: usize,
    },
    /// Removing chunks past the document's new end.
    Deleting {
        /// Chunks to remove.
        count: usize,
    },
    /// Ingestion finished.
    Done,
}

/// Cooperative cancellation flag, checked between chunk commits.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Summary of one ingestion call.
///
/// Per-chunk embedding failures land in [`failures`](Self::failures) instead of failing the call.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Document ingested.
    pub document_id: String,
    /// Chunks in the incoming document.
    pub total: usize,
    /// Newly bound chunks.
    pub inserted: Vec<String>,
    /// Chunks whose content and vector were replaced.
    pub updated: Vec<String>,
    /// Chunks left as they were.
    pub unchanged: Vec<String>,
    /// Chunks removed because the document shrank.
    pub deleted: Vec<String>,
    /// Chunks that could not be embedded this pass.
    pub failed: Vec<String>,
    /// Errors behind [`failed`](Self::failed).
    pub failures: Vec<StoreError>,
    /// The fingerprint matched and nothing was read beyond the document row.
    pub skipped: bool,
    /// Cancellation stopped the pass before every chunk was committed.
    pub cancelled: bool,
}

impl IngestReport {
    /// Chunks that are up to date after this pass.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.unchanged.len()
    }

    /// Returns `true` if every chunk is up to date.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Computes and applies differential updates through an [`IdentityBinder`].
pub struct DifferentialIngestor {
    binder: Arc<IdentityBinder>,
    cache: RwLock<Option<Arc<dyn EmbeddingCache>>>,
    batch_size: usize,
    locks: Mutex<HashMap<String, Arc<async_lock::Mutex<()>>>>,
}

impl std::fmt::Debug for DifferentialIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifferentialIngestor")
            .field("batch_size", &self.batch_size)
            .field("cached", &self.cache.read().is_some())
            .finish_non_exhaustive()
    }
}

impl DifferentialIngestor {
    /// Creates an ingestor that embeds at most `batch_size` texts per embedder call.
    #[must_use]
    pub fn new(binder: Arc<IdentityBinder>, batch_size: usize) -> Self {
        Self {
            binder,
            cache: RwLock::new(None),
            batch_size: batch_size.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Consults `cache` before calling the embedder and fills it afterwards.
    #[must_use]
    pub fn with_cache(self, cache: Arc<dyn EmbeddingCache>) -> Self {
        self.set_cache(cache);
        self
    }

    /// Installs `cache` for every later ingestion through this ingestor.
    pub fn set_cache(&self, cache: Arc<dyn EmbeddingCache>) {
        *self.cache.write() = Some(cache);
    }

    fn cache(&self) -> Option<Arc<dyn EmbeddingCache>> {
        self.cache.read().clone()
    }

    /// Diffs a document against the catalog's committed state.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn plan(&self, document: &ParsedDocument) -> Result<IngestPlan> {
        let fingerprint = document.fingerprint();
        let chunks = document.to_chunks()?;
        let state = self.binder.read();
        let catalog = state.catalog();

        let stored = catalog.get_document(&document.id)?;
        if stored.is_some_and(|stored| stored.content_fingerprint == fingerprint) {
            return Ok(IngestPlan {
                document_id: document.id.clone(),
                fingerprint,
                to_embed: Vec::new(),
                unchanged_ids: chunks.into_iter().map(|chunk| chunk.id).collect(),
                to_delete: Vec::new(),
                skipped: true,
            });
        }

        let mut existing = catalog.get_chunk_hashes(&document.id)?;
        drop(state);

        let mut to_embed = Vec::new();
        let mut unchanged_ids = BTreeSet::new();
        for chunk in chunks {
            match existing.remove(&chunk.id) {
                Some(hash) if hash == chunk.content_hash => {
                    unchanged_ids.insert(chunk.id);
                }
                Some(_) => to_embed.push(PlannedChunk {
                    chunk,
                    change: ChunkChange::Update,
                }),
                None => to_embed.push(PlannedChunk {
                    chunk,
                    change: ChunkChange::Insert,
                }),
            }
        }

        let mut to_delete: Vec<String> = existing.into_keys().collect();
        to_delete.sort();

        Ok(IngestPlan {
            document_id: document.id.clone(),
            fingerprint,
            to_embed,
            unchanged_ids,
            to_delete,
            skipped: false,
        })
    }

    /// Ingests a document.
    ///
    /// # Errors
    ///
    /// Fails on structural or storage errors. Per-chunk embedding failures are reported in the
    /// returned [`IngestReport`] instead.
    pub async fn ingest<E: Embedder>(
        &self,
        document: &ParsedDocument,
        embedder: &E,
    ) -> Result<IngestReport> {
        self.run(document, embedder, None, |_| {}).await
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
        self.run(document, embedder, None, on_progress).await
    }

    /// Ingests a document, stopping between chunk commits once `cancel` is set.
    ///
    /// Chunks committed before cancellation stay committed; the rest are picked up by the next
    /// ingestion of the same document.
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
        self.run(document, embedder, Some(cancel), |_| {}).await
    }

    /// Removes a document and all of its chunks. Waits for any ingestion of the same document
    /// to finish first. Returns the number of chunks removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DocumentNotFound`] if the document has no rows.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        self.serialized(document_id, async { self.binder.remove_document(document_id) })
            .await
    }

    /// Runs `work` while holding the document's lock, then drops the lock entry if no other
    /// caller is waiting on it.
    async fn serialized<T>(&self, document_id: &str, work: impl Future<Output = T>) -> T {
        let lock = self.document_lock(document_id);
        let output = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.release_lock(document_id);
        output
    }

    fn document_lock(&self, document_id: &str) -> Arc<async_lock::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(document_id.to_owned())
                .or_default(),
        )
    }

    fn release_lock(&self, document_id: &str) {
        let mut locks = self.locks.lock();
        if locks
            .get(document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(document_id);
        }
    }

    #[instrument(skip_all, fields(document_id = %document.id))]
    async fn run<E, F>(
        &self,
        document: &ParsedDocument,
        embedder: &E,
        cancel: Option<&CancelFlag>,
        mut on_progress: F,
    ) -> Result<IngestReport>
    where
        E: Embedder,
        F: FnMut(&IngestStage) + Send,
    {
        self.serialized(
            &document.id,
            self.run_locked(document, embedder, cancel, &mut on_progress),
        )
        .await
    }

    async fn run_locked<E, F>(
        &self,
        document: &ParsedDocument,
        embedder: &E,
        cancel: Option<&CancelFlag>,
        on_progress: &mut F,
    ) -> Result<IngestReport>
    where
        E: Embedder,
        F: FnMut(&IngestStage) + Send,
    {
        on_progress(&IngestStage::Planning);
        let plan = self.plan(document)?;
        let mut report = IngestReport {
            document_id: document.id.clone(),
            total: document.chunks.len(),
            unchanged: plan.unchanged_ids.iter().cloned().collect(),
            ..IngestReport::default()
        };

        if plan.skipped {
            debug!("fingerprint unchanged, skipping");
            report.skipped = true;
            on_progress(&IngestStage::Skipped);
            on_progress(&IngestStage::Done);
            return Ok(report);
        }

        let embedded = self
            .embed_all(&plan.to_embed, embedder, &mut report, on_progress)
            .await?;

        let total = embedded.len();
        let mut cancelled = false;
        for (done, (planned, vector)) in embedded.into_iter().enumerate() {
            if cancel.is_some_and(CancelFlag::is_cancelled) {
                cancelled = true;
                break;
            }
            let chunk_id = planned.chunk.id.clone();
            let rebind = self.binder.slot_of(&chunk_id).is_some();
            if rebind {
                self.binder.rebind(planned.chunk, &vector)?;
                report.updated.push(chunk_id);
            } else {
                self.binder.bind(planned.chunk, &vector)?;
                report.inserted.push(chunk_id);
            }
            on_progress(&IngestStage::Binding {
                done: done + 1,
                total,
            });
        }

        if cancelled {
            warn!(
                committed = report.inserted.len() + report.updated.len(),
                remaining = total - report.inserted.len() - report.updated.len(),
                "ingestion cancelled"
            );
            report.cancelled = true;
        } else if !plan.to_delete.is_empty() {
            on_progress(&IngestStage::Deleting {
                count: plan.to_delete.len(),
            });
            for chunk_id in &plan.to_delete {
                match self.binder.unbind(chunk_id) {
                    Ok(_) | Err(StoreError::NotBound(_)) => {}
                    Err(e) => return Err(e),
                }
                if let Some(cache) = self.cache() {
                    cache.invalidate(chunk_id);
                }
                report.deleted.push(chunk_id.clone());
            }
        }

        self.record_document(document)?;

        info!(
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "ingested document"
        );
        on_progress(&IngestStage::Done);
        Ok(report)
    }

    /// Obtains vectors for every planned chunk, from the cache first. Failed chunks are recorded
    /// in `report` and left out of the result.
    async fn embed_all<E, F>(
        &self,
        planned: &[PlannedChunk],
        embedder: &E,
        report: &mut IngestReport,
        on_progress: &mut F,
    ) -> Result<Vec<(PlannedChunk, Vec<f32>)>>
    where
        E: Embedder,
        F: FnMut(&IngestStage) + Send,
    {
        let total = planned.len();
        let dimension = self.binder.dimension();
        let cache = self.cache();
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; total];
        let mut misses = Vec::new();

        for (position, item) in planned.iter().enumerate() {
            let cached = cache
                .as_ref()
                .and_then(|cache| cache.get(&item.chunk.id, item.chunk.content_hash));
            match cached {
                Some(vector) => vectors[position] = Some(vector),
                None => misses.push(position),
            }
        }

        let mut done = total - misses.len();
        if total > 0 {
            on_progress(&IngestStage::Embedding { done, total });
        }

        for batch in misses.chunks(self.batch_size) {
            let texts: Vec<&str> = batch
                .iter()
                .map(|&position| planned[position].chunk.text.as_str())
                .collect();
            let mut results = embedder.embed_batch(&texts).await.into_iter();

            for &position in batch {
                let chunk = &planned[position].chunk;
                let outcome = results.next().unwrap_or_else(|| {
                    Err(anyhow::anyhow!(
                        "embedder returned fewer results than inputs"
                    ))
                });
                match outcome {
                    Ok(vector) if vector.len() != dimension => {
                        return Err(StoreError::DimensionMismatch {
                            expected: dimension,
                            actual: vector.len(),
                        });
                    }
                    Ok(vector) => {
                        if let Some(cache) = &cache {
                            cache.put(&chunk.id, chunk.content_hash, vector.clone());
                        }
                        vectors[position] = Some(vector);
                    }
                    Err(source) => {
                        warn!(chunk_id = %chunk.id, error = %source, "embedding failed, will retry next pass");
                        report.failed.push(chunk.id.clone());
                        report.failures.push(StoreError::Embedding {
                            chunk_id: chunk.id.clone(),
                            source,
                        });
                    }
                }
            }
            done += batch.len();
            on_progress(&IngestStage::Embedding { done, total });
        }

        Ok(planned
            .iter()
            .cloned()
            .zip(vectors)
            .filter_map(|(item, vector)| vector.map(|vector| (item, vector)))
            .collect())
    }

    /// Writes the document row with a fingerprint over its committed chunks.
    fn record_document(&self, document: &ParsedDocument) -> Result<()> {
        let committed: Vec<ContentHash> = self
            .binder
            .read()
            .catalog()
            .chunks_for_document(&document.id)?
            .into_iter()
            .filter(Chunk::is_committed)
            .map(|chunk| chunk.content_hash)
            .collect();

        self.binder.record_document(Document {
            id: document.id.clone(),
            source_path: document.source_path.clone(),
            filename: document.filename.clone(),
            content_fingerprint: document_fingerprint(
                committed,
                document.page_count,
                &document.filename,
            ),
            page_count: document.page_count,
            ingested_at: OffsetDateTime::now_utc(),
            metadata: document.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryEmbeddingCache;
    use crate::catalog::MemoryCatalog;
    use crate::index::{FlatIndex, Metric};
    use std::sync::atomic::AtomicUsize;

    /// Deterministic embedder: the vector depends only on the text.
    #[derive(Clone, Default)]
    struct MockEmbedder {
        calls: Arc<AtomicUsize>,
        texts: Arc<AtomicUsize>,
        fail_on: Option<&'static str>,
    }

    impl Embedder for MockEmbedder {
        fn dim(&self) -> usize {
            4
        }

        #[allow(clippy::cast_precision_loss)]
        async fn embed(&self, text: &str) -> tessera_core::Result<Vec<f32>> {
            self.texts.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.is_some_and(|needle| text.contains(needle)) {
                anyhow::bail!("refused {text:?}");
            }
            let hash = content_hash(text).0;
            Ok((0..4)
                .map(|i| ((hash >> (i * 16)) & 0xffff) as f32 / 65535.0)
                .collect())
        }

        async fn embed_batch(&self, texts: &[&str]) -> Vec<tessera_core::Result<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await);
            }
            out
        }
    }

    /// Holds every text at a gate until the test opens it.
    #[derive(Clone)]
    struct GatedEmbedder {
        inner: MockEmbedder,
        gate: Arc<async_lock::Semaphore>,
        arrived: Arc<AtomicUsize>,
    }

    impl GatedEmbedder {
        fn closed() -> Self {
            Self {
                inner: MockEmbedder::default(),
                gate: Arc::new(async_lock::Semaphore::new(0)),
                arrived: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn open(&self) {
            self.gate.add_permits(1);
        }

        fn arrived(&self) -> usize {
            self.arrived.load(Ordering::SeqCst)
        }
    }

    impl Embedder for GatedEmbedder {
        fn dim(&self) -> usize {
            self.inner.dim()
        }

        async fn embed(&self, text: &str) -> tessera_core::Result<Vec<f32>> {
            self.arrived.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await;
            self.inner.embed(text).await
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        while !condition() {
            tokio::task::yield_now().await;
        }
    }

    fn ingestor() -> DifferentialIngestor {
        let binder = IdentityBinder::new(
            Box::new(FlatIndex::new(4, Metric::SquaredL2)),
            Box::new(MemoryCatalog::new()),
        )
        .unwrap();
        DifferentialIngestor::new(Arc::new(binder), 2)
    }

    fn doc(texts: &[&str]) -> ParsedDocument {
        ParsedDocument::from_texts("D1", texts.iter().copied())
    }

    #[tokio::test]
    async fn first_pass_inserts_everything() {
        let ingestor = ingestor();
        let embedder = MockEmbedder::default();

        let report = ingestor.ingest(&doc(&["a", "b", "c"]), &embedder).await.unwrap();
        assert_eq!(report.inserted.len(), 3);
        assert_eq!(report.processed(), 3);
        assert!(report.is_complete());
        // Batch size 2: two embedder calls for three texts.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ingestor.binder.len(), 3);
    }

    #[tokio::test]
    async fn identical_resubmission_is_a_noop() {
        let ingestor = ingestor();
        let embedder = MockEmbedder::default();
        ingestor.ingest(&doc(&["a", "b"]), &embedder).await.unwrap();
        let calls = embedder.calls.load(Ordering::SeqCst);

        let report = ingestor.ingest(&doc(&["a", "b"]), &embedder).await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.unchanged.len(), 2);
        assert!(report.inserted.is_empty() && report.updated.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn plan_partitions_by_hash() {
        let ingestor = ingestor();
        let binder = &ingestor.binder;
        for (i, text) in ["A", "B", "C"].iter().enumerate() {
            binder
                .bind(Chunk::new("D1", i as u32, *text), &[i as f32, 0.0, 0.0, 0.0])
                .unwrap();
        }

        let plan = ingestor.plan(&doc(&["A", "B'", "C", "D"])).unwrap();
        assert!(!plan.skipped);
        assert_eq!(
            plan.unchanged_ids,
            BTreeSet::from(["D1#chunk_0".to_owned(), "D1#chunk_2".to_owned()])
        );
        let changes: Vec<_> = plan
            .to_embed
            .iter()
            .map(|p| (p.chunk.id.as_str(), p.change))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("D1#chunk_1", ChunkChange::Update),
                ("D1#chunk_3", ChunkChange::Insert)
            ]
        );
        assert!(plan.to_delete.is_empty());

        let shrink = ingestor.plan(&doc(&["A"])).unwrap();
        assert_eq!(
            shrink.to_delete,
            vec!["D1#chunk_1".to_owned(), "D1#chunk_2".to_owned()]
        );
    }

    #[tokio::test]
    async fn failed_chunks_are_retried_next_pass() {
        let ingestor = ingestor();
        let flaky = MockEmbedder {
            fail_on: Some("bad"),
            ..MockEmbedder::default()
        };

        let report = ingestor
            .ingest(&doc(&["good", "bad", "fine", "also good"]), &flaky)
            .await
            .unwrap();
        assert_eq!(report.processed(), 3);
        assert_eq!(report.failed, vec!["D1#chunk_1".to_owned()]);
        assert!(matches!(
            report.failures[0],
            StoreError::Embedding { ref chunk_id, .. } if chunk_id == "D1#chunk_1"
        ));
        assert!(!report.is_complete());

        let healthy = MockEmbedder::default();
        let retry = ingestor
            .ingest(&doc(&["good", "bad", "fine", "also good"]), &healthy)
            .await
            .unwrap();
        assert!(!retry.skipped);
        assert_eq!(retry.inserted, vec!["D1#chunk_1".to_owned()]);
        assert_eq!(retry.unchanged.len(), 3);
        assert_eq!(healthy.texts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_dimension_aborts_before_any_write() {
        struct Wide;
        impl Embedder for Wide {
            fn dim(&self) -> usize {
                8
            }
            async fn embed(&self, _text: &str) -> tessera_core::Result<Vec<f32>> {
                Ok(vec![0.0; 8])
            }
        }

        let ingestor = ingestor();
        let err = ingestor.ingest(&doc(&["a"]), &Wide).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 4, actual: 8 }));
        assert!(ingestor.binder.is_empty());
        assert!(ingestor.binder.read().catalog().get_document("D1").unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_between_chunks() {
        let ingestor = ingestor();
        let embedder = MockEmbedder::default();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = ingestor
            .ingest_cancellable(&doc(&["a", "b"]), &embedder, &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.inserted.is_empty());
        assert!(ingestor.binder.verify().unwrap().is_consistent());

        let resumed = ingestor.ingest(&doc(&["a", "b"]), &embedder).await.unwrap();
        assert!(!resumed.skipped);
        assert_eq!(resumed.inserted.len(), 2);
    }

    #[tokio::test]
    async fn progress_stages_in_order() {
        let ingestor = ingestor();
        let embedder = MockEmbedder::default();
        let mut stages = Vec::new();

        ingestor
            .ingest_with_progress(&doc(&["a", "b", "c"]), &embedder, |stage| {
                stages.push(stage.clone());
            })
            .await
            .unwrap();

        assert_eq!(stages.first(), Some(&IngestStage::Planning));
        assert_eq!(stages.last(), Some(&IngestStage::Done));
        assert!(stages.contains(&IngestStage::Embedding { done: 3, total: 3 }));
        assert!(stages.contains(&IngestStage::Binding { done: 3, total: 3 }));
    }

    #[tokio::test]
    async fn cache_hits_skip_the_embedder() {
        let cache = Arc::new(MemoryEmbeddingCache::new(16));
        let ingestor = ingestor().with_cache(cache.clone());
        let embedder = MockEmbedder::default();

        ingestor.ingest(&doc(&["a", "b"]), &embedder).await.unwrap();
        ingestor.binder.remove_document("D1").unwrap();

        let texts = embedder.texts.load(Ordering::SeqCst);
        let report = ingestor.ingest(&doc(&["a", "b"]), &embedder).await.unwrap();
        assert_eq!(report.inserted.len(), 2);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), texts);
        assert_eq!(cache.stats().hits, 2);
    }

    fn stored_texts(ingestor: &DifferentialIngestor) -> Vec<String> {
        ingestor
            .binder
            .read()
            .catalog()
            .chunks_for_document("D1")
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.text)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_document_ingestions_run_one_at_a_time() {
        let ingestor = Arc::new(ingestor());
        let embedder = GatedEmbedder::closed();

        let first = {
            let ingestor = Arc::clone(&ingestor);
            let embedder = embedder.clone();
            tokio::spawn(async move { ingestor.ingest(&doc(&["a", "b", "c"]), &embedder).await })
        };
        wait_for(|| embedder.arrived() == 1).await;

        let second = {
            let ingestor = Arc::clone(&ingestor);
            let embedder = embedder.clone();
            tokio::spawn(async move { ingestor.ingest(&doc(&["x", "y"]), &embedder).await })
        };
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
        // The second call is parked on the document lock, not in the embedder.
        assert_eq!(embedder.arrived(), 1);

        embedder.open();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(first.inserted.len(), 3);
        assert_eq!(second.updated.len(), 2);
        assert_eq!(second.deleted, vec!["D1#chunk_2".to_owned()]);
        assert_eq!(stored_texts(&ingestor), ["x", "y"]);
        assert!(ingestor.binder.verify().unwrap().is_consistent());
        assert!(ingestor.locks.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn deletion_waits_for_a_running_ingestion() {
        let ingestor = Arc::new(ingestor());
        ingestor
            .ingest(&doc(&["a", "b"]), &MockEmbedder::default())
            .await
            .unwrap();

        let embedder = GatedEmbedder::closed();
        let update = {
            let ingestor = Arc::clone(&ingestor);
            let embedder = embedder.clone();
            tokio::spawn(async move { ingestor.ingest(&doc(&["a2", "b2"]), &embedder).await })
        };
        wait_for(|| embedder.arrived() == 1).await;

        let delete = {
            let ingestor = Arc::clone(&ingestor);
            tokio::spawn(async move { ingestor.delete_document("D1").await })
        };
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
        assert!(!delete.is_finished());
        assert_eq!(ingestor.binder.len(), 2);

        embedder.open();
        let update = update.await.unwrap().unwrap();
        assert_eq!(update.updated.len(), 2);
        assert_eq!(delete.await.unwrap().unwrap(), 2);

        assert!(ingestor.binder.is_empty());
        assert!(ingestor.binder.verify().unwrap().is_consistent());
        assert!(ingestor.locks.lock().is_empty());
    }
}
