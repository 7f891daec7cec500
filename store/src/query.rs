//! Hybrid queries: vector search narrowed by predicates and optionally re-ranked lexically.

use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::binder::{BinderState, IdentityBinder};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::lexical;
use crate::predicate::Predicate;
use crate::types::RetrievalResult;

/// A hybrid query.
///
/// ```rust
/// use tessera_store::{Predicate, QueryRequest};
///
/// let request = QueryRequest::new(vec![0.1, 0.9], 5)
///     .filter(Predicate::document("D1"))
///     .rerank("what colour is the sky")
///     .min_similarity(0.2);
/// assert_eq!(request.k, 5);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    /// Query vector.
    pub vector: Vec<f32>,
    /// Maximum number of results.
    pub k: usize,
    /// Structured filter applied after vector search.
    pub predicate: Option<Predicate>,
    /// Query text for lexical re-ranking; `None` ranks by vector distance alone.
    pub rerank_text: Option<String>,
    /// Results below this similarity are dropped.
    pub min_similarity: Option<f32>,
}

impl QueryRequest {
    /// Creates an unfiltered vector query.
    #[must_use]
    pub const fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            predicate: None,
            rerank_text: None,
            min_similarity: None,
        }
    }

    /// Narrows results to chunks matching `predicate`.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Blends token overlap with `text` into the ranking.
    #[must_use]
    pub fn rerank(mut self, text: impl Into<String>) -> Self {
        self.rerank_text = Some(text.into());
        self
    }

    /// Drops results whose similarity is below `threshold`.
    #[must_use]
    pub const fn min_similarity(mut self, threshold: f32) -> Self {
        self.min_similarity = Some(threshold);
        self
    }
}

/// A vector hit that survived resolution and filtering.
struct Candidate {
    chunk_id: String,
    distance: f32,
    similarity: f32,
}

/// Answers [`QueryRequest`]s against an [`IdentityBinder`].
///
/// Filtering happens after vector search, so filtered queries over-fetch `k * overfetch_factor`
/// neighbors and widen the fetch a bounded number of times when too few candidates survive.
#[derive(Debug)]
pub struct HybridQueryEngine {
    binder: Arc<IdentityBinder>,
    overfetch_factor: usize,
    max_rounds: usize,
    vector_weight: f32,
}

impl HybridQueryEngine {
    /// Creates an engine using the tuning in `config`.
    #[must_use]
    pub fn new(binder: Arc<IdentityBinder>, config: &StoreConfig) -> Self {
        Self {
            binder,
            overfetch_factor: config.overfetch_factor.max(1),
            max_rounds: config.max_overfetch_rounds,
            vector_weight: config.rerank_vector_weight,
        }
    }

    /// Runs a hybrid query and returns results best first, ranked from 1.
    ///
    /// An empty store yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DimensionMismatch`] for a query vector of the wrong length.
    pub fn query(&self, request: &QueryRequest) -> Result<Vec<RetrievalResult>> {
        let state = self.binder.read();
        self.run(&state, request, None)
    }

    /// Finds chunks similar to a bound chunk, excluding the chunk itself.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotBound`] if `chunk_id` has no vector.
    pub fn similar_to(
        &self,
        chunk_id: &str,
        k: usize,
        predicate: Option<Predicate>,
    ) -> Result<Vec<RetrievalResult>> {
        let state = self.binder.read();
        let vector = state
            .slot_of(chunk_id)
            .and_then(|slot| state.index().vector(slot))
            .ok_or_else(|| StoreError::NotBound(chunk_id.to_owned()))?
            .to_vec();

        let mut request = QueryRequest::new(vector, k);
        request.predicate = predicate;
        self.run(&state, &request, Some(chunk_id))
    }

    fn run(
        &self,
        state: &BinderState,
        request: &QueryRequest,
        exclude: Option<&str>,
    ) -> Result<Vec<RetrievalResult>> {
        let index = state.index();
        if request.vector.len() != index.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: index.dimension(),
                actual: request.vector.len(),
            });
        }

        let live = index.size();
        let k = request.k;
        if k == 0 || live == 0 {
            return Ok(Vec::new());
        }

        let narrowed = request.predicate.is_some()
            || request.rerank_text.is_some()
            || request.min_similarity.is_some()
            || exclude.is_some();
        let mut fetch = if narrowed {
            k.saturating_mul(self.overfetch_factor)
        } else {
            k
        }
        .min(live);
        let widen_by = self.overfetch_factor.max(2);
        let metric = index.metric();

        let mut round = 0;
        let candidates = loop {
            let hits = index.search(&request.vector, fetch)?;

            let mut candidates: Vec<Candidate> = Vec::with_capacity(hits.len());
            for hit in &hits {
                let Some(chunk_id) = state.resolve_to_ids(&[hit.slot]).pop() else {
                    continue;
                };
                if exclude == Some(chunk_id.as_str()) {
                    continue;
                }
                let similarity = metric.similarity(hit.distance);
                if request.min_similarity.is_some_and(|floor| similarity < floor) {
                    continue;
                }
                candidates.push(Candidate {
                    chunk_id,
                    distance: hit.distance,
                    similarity,
                });
            }

            if let Some(predicate) = &request.predicate {
                let ids: Vec<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
                let allowed = state.catalog().filter(predicate, Some(&ids))?;
                candidates.retain(|c| allowed.contains(&c.chunk_id));
            }

            if candidates.len() >= k || fetch >= live {
                break candidates;
            }
            if round >= self.max_rounds {
                warn!(
                    wanted = k,
                    found = candidates.len(),
                    fetched = fetch,
                    "over-fetch widening exhausted"
                );
                break candidates;
            }
            round += 1;
            fetch = fetch.saturating_mul(widen_by).min(live);
            debug!(round, fetch, "widening over-fetch");
        };

        let ids: Vec<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
        let mut chunks: HashMap<String, _> = state
            .catalog()
            .get_chunks(&ids)?
            .into_iter()
            .map(|chunk| (chunk.id.clone(), chunk))
            .collect();

        let query_tokens = request.rerank_text.as_deref().map(lexical::tokens);
        let mut results: Vec<RetrievalResult> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let chunk = chunks.remove(&candidate.chunk_id)?;
                let lexical_score = query_tokens
                    .as_ref()
                    .map(|query| lexical::overlap(query, &lexical::tokens(&chunk.text)));
                let score = lexical_score.map_or(candidate.similarity, |lexical| {
                    lexical::blend(candidate.similarity, lexical, self.vector_weight)
                });
                Some(RetrievalResult {
                    chunk,
                    distance: candidate.distance,
                    similarity: candidate.similarity,
                    lexical_score,
                    score,
                    rank: 0,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            Reverse(OrderedFloat(a.score))
                .cmp(&Reverse(OrderedFloat(b.score)))
                .then_with(|| OrderedFloat(a.distance).cmp(&OrderedFloat(b.distance)))
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        results.truncate(k);
        for (position, result) in results.iter_mut().enumerate() {
            result.rank = position + 1;
        }
        Ok(results)
    }
}
