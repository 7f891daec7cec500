//! Content hashing and chunk identity using xxhash.

use xxhash_rust::xxh3::{Xxh3, xxh3_64};

use crate::types::ContentHash;

/// Computes the content hash of a chunk's text.
#[must_use]
pub fn content_hash(text: &str) -> ContentHash {
    ContentHash(xxh3_64(text.as_bytes()))
}

/// Derives a chunk id from its document and position.
///
/// The id never depends on the text, so an edited chunk keeps its identity and only its
/// [`content_hash`] changes.
#[must_use]
pub fn chunk_id(document_id: &str, chunk_index: u32) -> String {
    format!("{document_id}#chunk_{chunk_index}")
}

/// Computes a whole-document fingerprint from its ordered chunk hashes and structural metadata.
#[must_use]
pub fn document_fingerprint(
    chunk_hashes: impl IntoIterator<Item = ContentHash>,
    page_count: u32,
    filename: &str,
) -> ContentHash {
    let mut hasher = Xxh3::new();
    let mut count = 0u64;
    for hash in chunk_hashes {
        hasher.update(&hash.0.to_le_bytes());
        count += 1;
    }
    hasher.update(&count.to_le_bytes());
    hasher.update(&page_count.to_le_bytes());
    hasher.update(filename.as_bytes());
    ContentHash(hasher.digest())
}
