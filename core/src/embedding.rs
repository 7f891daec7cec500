//! # Embedding Module
//!
//! Types and traits for the embedding collaborator.
//!
//! An embedder turns text into fixed-length `f32` vectors. The retrieval store only ever consumes
//! those vectors: it does not normalize them, it does not guess their length, and it never calls
//! the embedder while holding a lock on its own state.
//!
//! ## Batching and partial failure
//!
//! [`Embedder::embed_batch`] returns one result per input text. A remote provider that rejects a
//! single oversized input should fail that input only, so the store can keep the rest of the batch
//! and retry the failed chunk on the next ingestion pass.
//!
//! ```rust
//! use tessera_core::Embedder;
//!
//! async fn example<T: Embedder>(model: &T) -> tessera_core::Result<()> {
//!     let vectors = model.embed_batch(&["first passage", "second passage"]).await;
//!     for vector in vectors {
//!         assert_eq!(vector?.len(), model.dim());
//!     }
//!     Ok(())
//! }
//! ```

use alloc::vec::Vec;
use core::future::Future;

/// A dense embedding vector of 32-bit floats.
pub type Embedding = Vec<f32>;

/// Text used by [`probe_dimension`].
const PROBE_TEXT: &str = "dimension probe";

/// Converts text to vector representations.
///
/// # Implementation Requirements
///
/// - Every successful vector must have length [`dim`](Embedder::dim).
/// - Vectors must follow one normalization convention for the lifetime of a store; the store's
///   distance metric is chosen to match it and never renormalizes.
/// - [`embed_batch`](Embedder::embed_batch) must return exactly one result per input, in order.
///
/// # Example
///
/// ```rust
/// use tessera_core::Embedder;
///
/// struct Constant;
///
/// impl Embedder for Constant {
///     fn dim(&self) -> usize {
///         3
///     }
///
///     async fn embed(&self, _text: &str) -> tessera_core::Result<Vec<f32>> {
///         Ok(vec![0.5; 3])
///     }
/// }
/// ```
pub trait Embedder: Send + Sync {
    /// Returns the embedding vector dimension.
    fn dim(&self) -> usize;

    /// Converts a single text to an embedding vector.
    fn embed(&self, text: &str) -> impl Future<Output = crate::Result<Embedding>> + Send;

    /// Converts a batch of texts, one result per input.
    ///
    /// The default implementation embeds texts one at a time. Providers with a native batch
    /// endpoint should override it.
    fn embed_batch(
        &self,
        texts: &[&str],
    ) -> impl Future<Output = Vec<crate::Result<Embedding>>> + Send {
        async move {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await);
            }
            out
        }
    }
}

/// Discovers the real output dimension of an embedder with one live call.
///
/// This is meant to run once, before a store is constructed, for providers whose advertised
/// [`Embedder::dim`] cannot be trusted. The store itself never probes.
///
/// # Errors
///
/// Fails if the probe call fails or the provider returns an empty vector.
pub async fn probe_dimension<E: Embedder>(embedder: &E) -> crate::Result<usize> {
    let vector = embedder.embed(PROBE_TEXT).await?;
    if vector.is_empty() {
        anyhow::bail!("embedder returned an empty vector for the dimension probe");
    }
    Ok(vector.len())
}
