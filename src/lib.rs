//! # tessera
//!
//! Facade crate for the tessera retrieval store. It re-exports [`tessera_core`] (the
//! [`Embedder`] contract) and, behind the default `store` feature, the [`store`] crate.
//!
//! ## What's inside?
//!
//! - [`Embedder`] + [`probe_dimension`] for plugging any embedding provider in.
//! - [`Store`](store::Store): a vector index and a metadata catalog bound one to one, with
//!   differential ingestion keyed on content hashes and hybrid vector + predicate queries.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tessera::Embedder;
//! use tessera::store::{OpenOptions, ParsedDocument, Predicate, Store, StoreConfig};
//!
//! async fn demo<E: Embedder>(embedder: &E) -> tessera::store::Result<()> {
//!     let config = StoreConfig::new(embedder.dim());
//!     let store = Store::open("./index", "handbook", config, OpenOptions::new())?;
//!
//!     let handbook = ParsedDocument::from_texts("handbook", [
//!         "Expenses are reimbursed within 30 days.",
//!         "Remote work requires manager approval.",
//!     ]);
//!     store.ingest(&handbook, embedder).await?;
//!     store.save()?;
//!
//!     let only_handbook = Some(Predicate::document("handbook"));
//!     let hits = store
//!         .query_text(embedder, "how long do reimbursements take", 3, only_handbook)
//!         .await?;
//!     for hit in hits {
//!         println!("{:.3} {}", hit.score, hit.chunk.text);
//!     }
//!     Ok(())
//! }
//! ```

pub use tessera_core::*;

#[cfg(feature = "store")]
pub use tessera_store as store;
