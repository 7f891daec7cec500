//! Lexical overlap scoring used to re-rank vector hits.

use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

/// Lowercased set of Unicode words in `text`.
#[must_use]
pub fn tokens(text: &str) -> HashSet<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Jaccard overlap between two token sets, in `[0, 1]`. Two empty sets score zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn overlap(query: &HashSet<String>, text: &HashSet<String>) -> f32 {
    let union = query.union(text).count();
    if union == 0 {
        return 0.0;
    }
    query.intersection(text).count() as f32 / union as f32
}

/// Blends a vector similarity with a lexical score. `vector_weight` goes to the similarity and
/// the remainder to the lexical score.
#[must_use]
pub fn blend(similarity: f32, lexical: f32, vector_weight: f32) -> f32 {
    vector_weight.mul_add(similarity, (1.0 - vector_weight) * lexical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_ignore_case_and_punctuation() {
        let t = tokens("The sky, the SKY!");
        assert_eq!(t.len(), 2);
        assert!(t.contains("sky"));
        assert!(t.contains("the"));
    }

    #[test]
    fn overlap_is_jaccard() {
        let a = tokens("sky color");
        let b = tokens("the sky is blue");
        // {sky} / {sky, color, the, is, blue}
        assert!((overlap(&a, &b) - 0.2).abs() < 1e-6);
        assert!((overlap(&a, &a) - 1.0).abs() < 1e-6);
        assert!(overlap(&tokens(""), &tokens("")).abs() < f32::EPSILON);
    }

    #[test]
    fn blend_weights() {
        assert!((blend(1.0, 0.0, 0.7) - 0.7).abs() < 1e-6);
        assert!((blend(0.0, 1.0, 0.7) - 0.3).abs() < 1e-6);
        assert!((blend(0.5, 0.5, 1.0) - 0.5).abs() < 1e-6);
    }
}
