//! Configuration for a retrieval store.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::index::Metric;

/// Which vector index implementation backs the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact brute-force search.
    #[default]
    Flat,
    /// Approximate search over an HNSW graph.
    Hnsw,
}

const fn default_overfetch_factor() -> usize {
    4
}

const fn default_max_overfetch_rounds() -> usize {
    3
}

const fn default_rerank_vector_weight() -> f32 {
    0.7
}

const fn default_embed_batch_size() -> usize {
    32
}

const fn default_compaction_threshold() -> f32 {
    0.3
}

/// Configuration for a [`Store`](crate::Store).
///
/// The embedding dimension has no default: it must be known before the store exists. Use
/// [`tessera_core::probe_dimension`] beforehand if the embedder cannot report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Length of every stored vector.
    pub dimension: usize,
    /// Distance metric, fixed for the lifetime of the index.
    #[serde(default)]
    pub metric: Metric,
    /// Vector index implementation.
    #[serde(default)]
    pub index_kind: IndexKind,
    /// Multiplier applied to `k` when a predicate narrows the candidates.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    /// How many times a filtered query may widen its over-fetch.
    #[serde(default = "default_max_overfetch_rounds")]
    pub max_overfetch_rounds: usize,
    /// Weight of vector similarity in the re-ranked score; lexical overlap gets the rest.
    #[serde(default = "default_rerank_vector_weight")]
    pub rerank_vector_weight: f32,
    /// Number of texts sent to the embedder per call.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    /// Tombstone ratio above which [`Store::compact_if_needed`](crate::Store::compact_if_needed)
    /// rebuilds the index.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
}

impl StoreConfig {
    /// Creates a configuration with default tuning for the given dimension.
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension,
            metric: Metric::SquaredL2,
            index_kind: IndexKind::Flat,
            overfetch_factor: default_overfetch_factor(),
            max_overfetch_rounds: default_max_overfetch_rounds(),
            rerank_vector_weight: default_rerank_vector_weight(),
            embed_batch_size: default_embed_batch_size(),
            compaction_threshold: default_compaction_threshold(),
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub const fn builder(dimension: usize) -> StoreConfigBuilder {
        StoreConfigBuilder::new(dimension)
    }

    /// Checks that every field is usable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(StoreError::Config("dimension must be non-zero".into()));
        }
        if self.overfetch_factor == 0 {
            return Err(StoreError::Config("overfetch_factor must be at least 1".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(StoreError::Config("embed_batch_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.rerank_vector_weight) {
            return Err(StoreError::Config(format!(
                "rerank_vector_weight must be within [0, 1], got {}",
                self.rerank_vector_weight
            )));
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(StoreError::Config(format!(
                "compaction_threshold must be within (0, 1], got {}",
                self.compaction_threshold
            )));
        }
        Ok(())
    }
}

/// Builder for store configuration.
#[derive(Debug)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Creates a builder with default tuning for the given dimension.
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self {
            config: StoreConfig::new(dimension),
        }
    }

    /// Sets the distance metric.
    #[must_use]
    pub const fn metric(mut self, metric: Metric) -> Self {
        self.config.metric = metric;
        self
    }

    /// Sets the vector index implementation.
    #[must_use]
    pub const fn index_kind(mut self, kind: IndexKind) -> Self {
        self.config.index_kind = kind;
        self
    }

    /// Sets the over-fetch multiplier for filtered queries.
    #[must_use]
    pub const fn overfetch_factor(mut self, factor: usize) -> Self {
        self.config.overfetch_factor = factor;
        self
    }

    /// Sets how many times a filtered query may widen.
    #[must_use]
    pub const fn max_overfetch_rounds(mut self, rounds: usize) -> Self {
        self.config.max_overfetch_rounds = rounds;
        self
    }

    /// Sets the vector weight used when re-ranking.
    #[must_use]
    pub const fn rerank_vector_weight(mut self, weight: f32) -> Self {
        self.config.rerank_vector_weight = weight;
        self
    }

    /// Sets the embedder batch size.
    #[must_use]
    pub const fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Sets the tombstone ratio that triggers compaction.
    #[must_use]
    pub const fn compaction_threshold(mut self, ratio: f32) -> Self {
        self.config.compaction_threshold = ratio;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub const fn build(self) -> StoreConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning() {
        let config = StoreConfig::new(384);
        assert_eq!(config.dimension, 384);
        assert_eq!(config.metric, Metric::SquaredL2);
        assert_eq!(config.index_kind, IndexKind::Flat);
        assert_eq!(config.overfetch_factor, 4);
        assert_eq!(config.max_overfetch_rounds, 3);
        assert!((config.rerank_vector_weight - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.embed_batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_config() {
        let config = StoreConfig::builder(8)
            .metric(Metric::Cosine)
            .index_kind(IndexKind::Hnsw)
            .overfetch_factor(10)
            .max_overfetch_rounds(1)
            .rerank_vector_weight(0.5)
            .embed_batch_size(4)
            .compaction_threshold(0.5)
            .build();

        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.index_kind, IndexKind::Hnsw);
        assert_eq!(config.overfetch_factor, 10);
        assert_eq!(config.max_overfetch_rounds, 1);
        assert_eq!(config.embed_batch_size, 4);
    }

    #[test]
    fn rejects_unusable_values() {
        assert!(StoreConfig::new(0).validate().is_err());
        assert!(
            StoreConfig::builder(4)
                .rerank_vector_weight(1.5)
                .build()
                .validate()
                .is_err()
        );
        assert!(
            StoreConfig::builder(4)
                .overfetch_factor(0)
                .build()
                .validate()
                .is_err()
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"dimension": 16}"#).unwrap();
        assert_eq!(config, StoreConfig::new(16));
    }
}
