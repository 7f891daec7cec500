//! Core types for the retrieval store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Integer offset of one stored vector inside a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(pub u32);

impl Slot {
    /// Returns the slot as a vector offset.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 64-bit content hash of a chunk or a whole document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub u64);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A typed metadata value.
///
/// Metadata keys are open-ended, but every value carries its type so predicates never compare a
/// string against a number by accident.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    /// UTF-8 string.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// List of values, matched by membership.
    List(Vec<MetadataValue>),
}

impl MetadataValue {
    /// Orders two scalar values of compatible type.
    ///
    /// Integers and floats compare numerically; any other cross-type pair, and any list, is
    /// unordered.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality used by predicates: numeric types compare by value, lists element-wise.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y))
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Key/value metadata attached to documents and chunks.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Structural kind of a chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Running prose.
    #[default]
    Text,
    /// Text extracted from a table.
    Table,
}

/// A document known to the catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier for the document.
    pub id: String,
    /// Where the document was read from.
    pub source_path: String,
    /// File name component of the source path.
    pub filename: String,
    /// Hash over the committed chunk hashes plus page count and file name.
    pub content_fingerprint: ContentHash,
    /// Number of pages reported by the parser.
    pub page_count: u32,
    /// When the document was last ingested.
    #[serde(with = "time::serde::rfc3339")]
    pub ingested_at: OffsetDateTime,
    /// Arbitrary document-level metadata.
    pub metadata: Metadata,
}

/// A position-addressed unit of a document's text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier derived from the document id and chunk position.
    pub id: String,
    /// Parent document ID.
    pub document_id: String,
    /// Position of this chunk within the document.
    pub chunk_index: u32,
    /// Text content of the chunk.
    pub text: String,
    /// Hash of `text`.
    pub content_hash: ContentHash,
    /// Number of characters in `text`.
    pub char_count: usize,
    /// Page the chunk starts on, if the parser knows it.
    pub page_number: Option<u32>,
    /// Structural kind.
    #[serde(default)]
    pub kind: ChunkKind,
    /// Filterable metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Vector slot, present once the chunk's vector is bound.
    pub slot: Option<Slot>,
}

impl Chunk {
    /// Creates an unbound chunk, deriving its id, hash and character count.
    #[must_use]
    pub fn new(document_id: impl Into<String>, chunk_index: u32, text: impl Into<String>) -> Self {
        let document_id = document_id.into();
        let text = text.into();
        Self {
            id: crate::hashing::chunk_id(&document_id, chunk_index),
            content_hash: crate::hashing::content_hash(&text),
            char_count: text.chars().count(),
            document_id,
            chunk_index,
            text,
            page_number: None,
            kind: ChunkKind::Text,
            metadata: Metadata::new(),
            slot: None,
        }
    }

    /// Sets the page number.
    #[must_use]
    pub const fn with_page(mut self, page_number: Option<u32>) -> Self {
        self.page_number = page_number;
        self
    }

    /// Sets the chunk kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: ChunkKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns `true` once the chunk's vector has been bound.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.slot.is_some()
    }
}

/// One raw hit from a vector index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    /// Slot of the stored vector.
    pub slot: Slot,
    /// Distance to the query under the index metric (lower is closer).
    pub distance: f32,
}

/// A ranked hit returned by the hybrid query engine.
#[derive(Clone, Debug, Serialize)]
pub struct RetrievalResult {
    /// The matching chunk.
    pub chunk: Chunk,
    /// Raw distance reported by the vector index.
    pub distance: f32,
    /// Similarity derived from `distance` (higher is better).
    pub similarity: f32,
    /// Token overlap with the query text, when re-ranking was requested.
    pub lexical_score: Option<f32>,
    /// Final ranking score (higher is better).
    pub score: f32,
    /// 1-indexed rank.
    pub rank: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_identity_is_positional() {
        let a = Chunk::new("doc", 1, "Grass is green.");
        let b = Chunk::new("doc", 1, "Grass is purple.");
        assert_eq!(a.id, b.id);
        assert_ne!(a.content_hash, b.content_hash);
        assert_eq!(a.char_count, 15);
        assert!(!a.is_committed());
    }

    #[test]
    fn numeric_values_compare_across_types() {
        let int = MetadataValue::Int(3);
        let float = MetadataValue::Float(3.0);
        assert!(int.matches(&float));
        assert_eq!(
            MetadataValue::Int(2).compare(&MetadataValue::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(MetadataValue::from("3").compare(&int), None);
    }

    #[test]
    fn metadata_values_are_tagged_in_json() {
        let json = serde_json::to_string(&MetadataValue::Int(7)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":7}"#);
        let back: MetadataValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MetadataValue::Int(7));
    }

    #[test]
    fn hash_renders_as_hex() {
        assert_eq!(ContentHash(255).to_string(), "00000000000000ff");
    }
}
