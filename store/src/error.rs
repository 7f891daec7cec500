//! Error types for the retrieval store.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Slot;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Vector length does not match the dimension the index was built with.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension provided.
        actual: usize,
    },

    /// A chunk that is already bound was bound again outside the update path.
    #[error("chunk {chunk_id} is already bound to slot {slot}")]
    IdentityConflict {
        /// The chunk that was bound twice.
        chunk_id: String,
        /// The slot it currently owns.
        slot: Slot,
    },

    /// An update or removal referenced a chunk with no binding.
    #[error("chunk {0} has no vector binding")]
    NotBound(String),

    /// Document not found in the catalog.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The vector index and the catalog disagree.
    #[error(
        "consistency violation: {catalog_chunks} catalog chunks, {index_slots} live slots, {bindings} bindings ({detail})"
    )]
    ConsistencyViolation {
        /// Committed chunks in the catalog.
        catalog_chunks: usize,
        /// Live (non-tombstoned) slots in the vector index.
        index_slots: usize,
        /// Entries in the binding.
        bindings: usize,
        /// What the check found.
        detail: String,
    },

    /// The embedding collaborator failed for one chunk.
    #[error("embedding failed for chunk {chunk_id}: {source}")]
    Embedding {
        /// The chunk whose text could not be embedded.
        chunk_id: String,
        /// Underlying collaborator error.
        #[source]
        source: anyhow::Error,
    },

    /// The embedding collaborator failed for a query text.
    #[error("embedding failed for query: {0}")]
    QueryEmbedding(#[source] anyhow::Error),

    /// Persistence operation failed.
    #[error("persistence error at {path}: {source}")]
    Persistence {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Store configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Returns `true` for errors that indicate a caller bug or a damaged store rather than a
    /// transient condition.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::IdentityConflict { .. }
                | Self::ConsistencyViolation { .. }
                | Self::Config(_)
        )
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
