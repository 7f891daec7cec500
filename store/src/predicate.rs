//! Structured predicates over chunk metadata.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::{Chunk, ChunkKind, MetadataValue};

/// A filter evaluated against catalog rows.
///
/// Predicates on metadata keys a chunk does not carry evaluate to `false`; an absent key is
/// never treated as a zero or empty value. Comparing values of different types is also
/// `false`, except integers and floats, which compare numerically.
///
/// ```rust
/// use tessera_store::{Predicate, MetadataValue};
///
/// let predicate = Predicate::document("report-2024")
///     .and(Predicate::equals("section", MetadataValue::from("methods")));
/// # let _ = predicate;
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Chunk belongs to this document.
    DocumentId {
        /// Document id.
        id: String,
    },
    /// Chunk belongs to any of these documents.
    DocumentIn {
        /// Document ids.
        ids: Vec<String>,
    },
    /// Chunk starts on a page within `start..=end`. Chunks without a page never match.
    PageRange {
        /// First page, inclusive.
        start: u32,
        /// Last page, inclusive.
        end: u32,
    },
    /// Chunk length in characters lies within the optional bounds.
    CharCount {
        /// Lower bound, inclusive.
        min: Option<usize>,
        /// Upper bound, inclusive.
        max: Option<usize>,
    },
    /// Chunk has this structural kind.
    Kind {
        /// Expected kind.
        kind: ChunkKind,
    },
    /// Metadata value at `key` equals `value`.
    Eq {
        /// Metadata key.
        key: String,
        /// Expected value.
        value: MetadataValue,
    },
    /// Metadata value at `key` lies within the optional bounds, inclusive.
    Range {
        /// Metadata key.
        key: String,
        /// Lower bound.
        min: Option<MetadataValue>,
        /// Upper bound.
        max: Option<MetadataValue>,
    },
    /// Metadata list at `key` contains `value`.
    Contains {
        /// Metadata key.
        key: String,
        /// Element to look for.
        value: MetadataValue,
    },
    /// Every inner predicate holds. Empty is `true`.
    And {
        /// Inner predicates.
        all: Vec<Predicate>,
    },
    /// Any inner predicate holds. Empty is `false`.
    Or {
        /// Inner predicates.
        any: Vec<Predicate>,
    },
    /// The inner predicate does not hold.
    Not {
        /// Negated predicate.
        inner: Box<Predicate>,
    },
}

impl Predicate {
    /// Matches chunks of one document.
    #[must_use]
    pub fn document(id: impl Into<String>) -> Self {
        Self::DocumentId { id: id.into() }
    }

    /// Matches chunks whose metadata `key` equals `value`.
    #[must_use]
    pub fn equals(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Matches chunks on pages `start..=end`.
    #[must_use]
    pub const fn pages(start: u32, end: u32) -> Self {
        Self::PageRange { start, end }
    }

    /// Combines two predicates with logical AND, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And { mut all } => {
                all.push(other);
                Self::And { all }
            }
            first => Self::And {
                all: vec![first, other],
            },
        }
    }

    /// Combines two predicates with logical OR, flattening nested disjunctions.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or { mut any } => {
                any.push(other);
                Self::Or { any }
            }
            first => Self::Or {
                any: vec![first, other],
            },
        }
    }

    /// Negates this predicate.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not {
            inner: Box::new(self),
        }
    }

    /// Evaluates the predicate against one chunk.
    #[must_use]
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            Self::DocumentId { id } => chunk.document_id == *id,
            Self::DocumentIn { ids } => ids.iter().any(|id| chunk.document_id == *id),
            Self::PageRange { start, end } => chunk
                .page_number
                .is_some_and(|page| (*start..=*end).contains(&page)),
            Self::CharCount { min, max } => {
                min.is_none_or(|min| chunk.char_count >= min)
                    && max.is_none_or(|max| chunk.char_count <= max)
            }
            Self::Kind { kind } => chunk.kind == *kind,
            Self::Eq { key, value } => chunk
                .metadata
                .get(key)
                .is_some_and(|stored| stored.matches(value)),
            Self::Range { key, min, max } => chunk
                .metadata
                .get(key)
                .is_some_and(|stored| within(stored, min.as_ref(), max.as_ref())),
            Self::Contains { key, value } => match chunk.metadata.get(key) {
                Some(MetadataValue::List(items)) => items.iter().any(|item| item.matches(value)),
                _ => false,
            },
            Self::And { all } => all.iter().all(|p| p.matches(chunk)),
            Self::Or { any } => any.iter().any(|p| p.matches(chunk)),
            Self::Not { inner } => !inner.matches(chunk),
        }
    }
}

fn within(value: &MetadataValue, min: Option<&MetadataValue>, max: Option<&MetadataValue>) -> bool {
    let above = min.is_none_or(|min| {
        matches!(
            value.compare(min),
            Some(Ordering::Greater | Ordering::Equal)
        )
    });
    let below = max.is_none_or(|max| {
        matches!(value.compare(max), Some(Ordering::Less | Ordering::Equal))
    });
    above && below
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;

    fn chunk() -> Chunk {
        let mut metadata = Metadata::new();
        metadata.insert("section".into(), "methods".into());
        metadata.insert("year".into(), MetadataValue::Int(2021));
        metadata.insert(
            "tags".into(),
            MetadataValue::List(vec!["climate".into(), "ocean".into()]),
        );
        Chunk::new("D1", 3, "Sea surface temperature rose.")
            .with_page(Some(4))
            .with_metadata(metadata)
    }

    #[test]
    fn structural_predicates() {
        let c = chunk();
        assert!(Predicate::document("D1").matches(&c));
        assert!(!Predicate::document("D2").matches(&c));
        assert!(
            Predicate::DocumentIn {
                ids: vec!["D0".into(), "D1".into()]
            }
            .matches(&c)
        );
        assert!(Predicate::pages(1, 4).matches(&c));
        assert!(!Predicate::pages(5, 9).matches(&c));
        assert!(
            Predicate::Kind {
                kind: ChunkKind::Text
            }
            .matches(&c)
        );
        assert!(
            Predicate::CharCount {
                min: Some(10),
                max: None
            }
            .matches(&c)
        );
    }

    #[test]
    fn pageless_chunks_never_match_page_ranges() {
        let c = Chunk::new("D1", 0, "no page");
        assert!(!Predicate::pages(0, u32::MAX).matches(&c));
    }

    #[test]
    fn metadata_predicates() {
        let c = chunk();
        assert!(Predicate::equals("section", "methods").matches(&c));
        assert!(Predicate::equals("year", 2021.0).matches(&c));
        assert!(!Predicate::equals("year", "2021").matches(&c));
        assert!(
            Predicate::Range {
                key: "year".into(),
                min: Some(MetadataValue::Int(2020)),
                max: Some(MetadataValue::Int(2021)),
            }
            .matches(&c)
        );
        assert!(
            Predicate::Contains {
                key: "tags".into(),
                value: "ocean".into()
            }
            .matches(&c)
        );
    }

    #[test]
    fn absent_keys_never_match() {
        let c = chunk();
        assert!(!Predicate::equals("author", "nobody").matches(&c));
        assert!(
            !Predicate::Range {
                key: "score".into(),
                min: None,
                max: None
            }
            .matches(&c)
        );
        assert!(Predicate::equals("author", "nobody").negate().matches(&c));
    }

    #[test]
    fn combinators() {
        let c = chunk();
        let both = Predicate::document("D1").and(Predicate::pages(4, 4));
        assert!(both.matches(&c));
        assert!(!both.clone().and(Predicate::document("D2")).matches(&c));
        assert!(Predicate::document("D2").or(Predicate::pages(4, 4)).matches(&c));
        assert!(Predicate::And { all: Vec::new() }.matches(&c));
        assert!(!Predicate::Or { any: Vec::new() }.matches(&c));
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_string(&Predicate::document("D1")).unwrap();
        assert_eq!(json, r#"{"op":"document_id","id":"D1"}"#);
    }
}
