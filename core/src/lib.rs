#![no_std]
//! # tessera-core
//!
//! Collaborator contracts consumed by the tessera retrieval store.
//!
//! The store never computes embeddings itself. Whatever produces vectors (a local model, a
//! remote API, a test double) implements [`Embedder`] and is handed to the store at ingestion
//! or query time.
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │  Parser/Chunker │───▶│  tessera-store   │◀───│    Embedder     │
//! │  (collaborator) │    │                  │    │ (this crate's   │
//! │                 │    │ - VectorIndex    │    │  trait)         │
//! │                 │    │ - Catalog        │    │                 │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! The crate is `no_std` + `alloc` so embedder implementations can live anywhere.

extern crate alloc;

pub mod embedding;

pub use embedding::{Embedder, Embedding, probe_dimension};

/// Result type used by collaborator traits.
pub type Result<T = ()> = anyhow::Result<T>;
