//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tessera_store::{Embedder, ParsedDocument, Store};

/// Words that each own one axis of the embedding space.
pub const AXES: [&str; 4] = ["sky", "grass", "sea", "stone"];

/// Embeds a text as keyword counts along [`AXES`], so tests can predict neighbors.
#[derive(Clone, Default)]
pub struct KeywordEmbedder {
    /// Texts embedded so far.
    pub texts: Arc<AtomicUsize>,
    /// Texts containing this word fail to embed.
    pub fail_on: Option<&'static str>,
    /// Yield to the runtime before every text.
    pub yielding: bool,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(word: &'static str) -> Self {
        Self {
            fail_on: Some(word),
            ..Self::default()
        }
    }

    pub fn yielding() -> Self {
        Self {
            yielding: true,
            ..Self::default()
        }
    }

    pub fn embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        AXES.iter()
            .map(|axis| lower.matches(axis).count() as f32)
            .collect()
    }
}

impl Embedder for KeywordEmbedder {
    fn dim(&self) -> usize {
        AXES.len()
    }

    async fn embed(&self, text: &str) -> tessera_core::Result<Vec<f32>> {
        self.texts.fetch_add(1, Ordering::SeqCst);
        if self.yielding {
            tokio::task::yield_now().await;
        }
        if self.fail_on.is_some_and(|word| text.contains(word)) {
            anyhow::bail!("embedder refused {text:?}");
        }
        Ok(Self::vector(text))
    }
}

/// Builds a document from chunk texts.
pub fn document(id: &str, texts: &[&str]) -> ParsedDocument {
    ParsedDocument::from_texts(id, texts.iter().copied())
}

/// Asserts that rows, live slots and bindings pair up one to one.
pub fn assert_consistent(store: &Store) {
    let report = store.verify().unwrap();
    assert!(report.is_consistent(), "{report:?}");
    let stats = store.stats().unwrap();
    assert_eq!(stats.chunks, stats.vectors, "{stats:?}");
    assert_eq!(stats.pending, 0, "{stats:?}");
}
