//! Content-addressed hybrid retrieval store.
//!
//! A [`Store`] keeps three structures in lockstep:
//! - a [`VectorIndex`] holding one vector per integer [`Slot`],
//! - a [`MetadataCatalog`] holding document and chunk rows,
//! - the binding between chunk ids and slots, owned by the [`IdentityBinder`].
//!
//! Every chunk carries a content hash. Re-ingesting a document embeds only the chunks whose hash
//! changed, and an identical resubmission is recognised from the document fingerprint alone
//! without calling the embedder.
//!
//! Queries run vector search first, then narrow the hits with a structured [`Predicate`] and
//! optionally blend in lexical overlap with the query text:
//!
//! ```rust,no_run
//! use tessera_store::{Predicate, QueryRequest, Store};
//!
//! # fn example(store: &Store) -> tessera_store::Result<()> {
//! let request = QueryRequest::new(vec![0.1; 384], 5)
//!     .filter(Predicate::document("D1").and(Predicate::pages(1, 3)))
//!     .rerank("solar panel efficiency");
//! for hit in store.query(&request)? {
//!     println!("{} {:.3} {}", hit.rank, hit.score, hit.chunk.text);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! On disk a store is a namespace directory holding `catalog.redb`, written through on every
//! mutation, and `vectors.rkyv`, written by [`Store::save`].

pub mod binder;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hashing;
pub mod index;
pub mod ingest;
pub mod lexical;
pub mod persistence;
pub mod predicate;
pub mod query;
pub mod store;
pub mod types;

pub use binder::{BinderStats, CompactionReport, ConsistencyReport, IdentityBinder, RepairReport};
pub use cache::{EmbeddingCache, MemoryEmbeddingCache};
pub use catalog::{CatalogStats, MemoryCatalog, MetadataCatalog, RedbCatalog};
pub use config::{IndexKind, StoreConfig, StoreConfigBuilder};
pub use error::{Result, StoreError};
pub use index::{FlatIndex, HnswIndex, Metric, VectorIndex};
pub use ingest::{
    CancelFlag, ChunkInput, DifferentialIngestor, IngestPlan, IngestReport, IngestStage,
    ParsedDocument,
};
pub use predicate::Predicate;
pub use query::{HybridQueryEngine, QueryRequest};
pub use store::{OpenOptions, Store, StoreStats};
pub use tessera_core::Embedder;
pub use types::{
    Chunk, ChunkKind, ContentHash, Document, Metadata, MetadataValue, Neighbor, RetrievalResult,
    Slot,
};
