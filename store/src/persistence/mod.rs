//! On-disk persistence for the vector index.
//!
//! The catalog persists itself (see [`RedbCatalog`](crate::catalog::RedbCatalog)); this module
//! only handles the vector side, written as one rkyv artifact per namespace.

mod rkyv_backend;

pub use rkyv_backend::RkyvPersistence;

use std::path::Path;

use crate::error::Result;
use crate::index::IndexSnapshot;

/// File name of the vector index artifact inside a namespace directory.
pub const INDEX_FILE: &str = "vectors.rkyv";

/// File name of the catalog database inside a namespace directory.
pub const CATALOG_FILE: &str = "catalog.redb";

/// Writes an index snapshot to `path`.
///
/// # Errors
///
/// Fails if the snapshot cannot be encoded or the file cannot be written.
pub fn save_index(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    RkyvPersistence::new(path).save(snapshot)
}

/// Reads an index snapshot from `path`, or `None` when no file exists.
///
/// # Errors
///
/// Fails if the file cannot be read or decoded.
pub fn load_index(path: &Path) -> Result<Option<IndexSnapshot>> {
    RkyvPersistence::new(path).load()
}
