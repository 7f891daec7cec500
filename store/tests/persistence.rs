//! Saving, reopening and repairing on-disk stores.

mod common;

use common::{KeywordEmbedder, assert_consistent, document};
use std::path::Path;
use tessera_store::{
    IndexKind, Metric, OpenOptions, QueryRequest, Store, StoreConfig, StoreError,
};

fn config() -> StoreConfig {
    StoreConfig::new(4)
}

fn open(root: &Path) -> tessera_store::Result<Store> {
    Store::open(root, "library", config(), OpenOptions::new())
}

async fn seed(store: &Store, embedder: &KeywordEmbedder) {
    store
        .ingest(&document("D1", &["sky", "grass", "sea"]), embedder)
        .await
        .unwrap();
    store
        .ingest(&document("D2", &["stone", "sky stone"]), embedder)
        .await
        .unwrap();
}

fn hits(store: &Store, word: &str) -> Vec<(String, f32)> {
    store
        .query(&QueryRequest::new(KeywordEmbedder::vector(word), 5))
        .unwrap()
        .into_iter()
        .map(|r| (r.chunk.id, r.distance))
        .collect()
}

#[tokio::test]
async fn reopened_store_answers_identically() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::new();

    let store = open(dir.path()).unwrap();
    seed(&store, &embedder).await;
    store.save().unwrap();
    let before = hits(&store, "stone");
    drop(store);

    let store = open(dir.path()).unwrap();
    assert_eq!(hits(&store, "stone"), before);
    assert_eq!(store.list_documents().unwrap().len(), 2);
    assert_consistent(&store);

    // Fingerprints survive the reopen, so nothing is embedded again.
    let report = store
        .ingest(&document("D1", &["sky", "grass", "sea"]), &embedder)
        .await
        .unwrap();
    assert!(report.skipped);
    assert_eq!(embedder.embedded(), 5);
}

#[tokio::test]
async fn hnsw_store_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::builder(4)
        .index_kind(IndexKind::Hnsw)
        .metric(Metric::Cosine)
        .build();
    let embedder = KeywordEmbedder::new();

    let store = Store::open(dir.path(), "ns", config.clone(), OpenOptions::new()).unwrap();
    seed(&store, &embedder).await;
    store.save().unwrap();
    drop(store);

    let store = Store::open(dir.path(), "ns", config, OpenOptions::new()).unwrap();
    let results = store
        .query(&QueryRequest::new(KeywordEmbedder::vector("grass"), 1))
        .unwrap();
    assert_eq!(results[0].chunk.id, "D1#chunk_1");
}

#[tokio::test]
async fn unsaved_vectors_fail_fast_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::new();

    let store = open(dir.path()).unwrap();
    seed(&store, &embedder).await;
    drop(store);

    assert!(matches!(
        open(dir.path()),
        Err(StoreError::ConsistencyViolation {
            catalog_chunks: 5,
            index_slots: 0,
            ..
        })
    ));
}

#[tokio::test]
async fn repair_on_open_makes_missing_chunks_reingestable() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::new();

    let store = open(dir.path()).unwrap();
    seed(&store, &embedder).await;
    drop(store);

    let store = Store::open(dir.path(), "library", config(), OpenOptions::new().repair(true))
        .unwrap();
    assert_consistent(&store);
    assert_eq!(store.stats().unwrap().chunks, 0);

    let report = store
        .ingest(&document("D1", &["sky", "grass", "sea"]), &embedder)
        .await
        .unwrap();
    assert!(!report.skipped);
    assert_eq!(report.inserted.len(), 3);
    assert_consistent(&store);
}

#[tokio::test]
async fn stale_index_slots_are_tombstoned_by_repair() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::new();

    let store = open(dir.path()).unwrap();
    seed(&store, &embedder).await;
    store.save().unwrap();
    // The catalog forgets D2 immediately; the saved index still holds its vectors.
    store.delete_document("D2").await.unwrap();
    drop(store);

    assert!(matches!(
        open(dir.path()),
        Err(StoreError::ConsistencyViolation { .. })
    ));

    let store = Store::open(dir.path(), "library", config(), OpenOptions::new().repair(true))
        .unwrap();
    assert_consistent(&store);
    let stats = store.stats().unwrap();
    assert_eq!(stats.chunks, 3);
    assert_eq!(stats.tombstones, 2);
    assert!(
        hits(&store, "stone")
            .iter()
            .all(|(id, _)| id.starts_with("D1"))
    );
    drop(store);

    // Repair saved the index, so a plain open now succeeds.
    let store = open(dir.path()).unwrap();
    assert_consistent(&store);
}

#[tokio::test]
async fn compaction_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::new();

    let store = open(dir.path()).unwrap();
    seed(&store, &embedder).await;
    store
        .ingest(&document("D1", &["sky"]), &embedder)
        .await
        .unwrap();
    store.save().unwrap();

    let report = store.compact_if_needed().unwrap().unwrap();
    assert_eq!(report.reclaimed, 2);
    let before = hits(&store, "sky");
    drop(store);

    let store = open(dir.path()).unwrap();
    assert_eq!(store.stats().unwrap().tombstones, 0);
    assert_eq!(hits(&store, "sky"), before);
    assert_consistent(&store);
}

#[tokio::test]
async fn unsaved_compaction_forces_full_reingestion() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::new();

    let store = open(dir.path()).unwrap();
    store
        .ingest(&document("D1", &["sky"]), &embedder)
        .await
        .unwrap();
    store
        .ingest(&document("D2", &["grass", "sea"]), &embedder)
        .await
        .unwrap();
    store.save().unwrap();
    store.delete_document("D1").await.unwrap();
    store.save().unwrap();
    // The catalog is renumbered on disk, the index file still has the old numbering.
    store.binder().compact().unwrap();
    drop(store);

    let err = open(dir.path()).unwrap_err();
    assert!(
        matches!(&err, StoreError::ConsistencyViolation { detail, .. } if detail.contains("generation")),
        "{err:?}"
    );

    let store = Store::open(dir.path(), "library", config(), OpenOptions::new().repair(true))
        .unwrap();
    assert_consistent(&store);
    assert_eq!(store.stats().unwrap().chunks, 0);
    assert!(hits(&store, "grass").is_empty());

    let report = store
        .ingest(&document("D2", &["grass", "sea"]), &embedder)
        .await
        .unwrap();
    assert_eq!(report.inserted, vec!["D2#chunk_0".to_owned(), "D2#chunk_1".to_owned()]);
    assert!(report.unchanged.is_empty());

    let grass = store
        .query(&QueryRequest::new(KeywordEmbedder::vector("grass"), 1))
        .unwrap();
    assert_eq!(grass[0].chunk.text, "grass");
    assert!(grass[0].distance.abs() < f32::EPSILON);
    assert_consistent(&store);
}

#[tokio::test]
async fn mismatched_configuration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::new();

    let store = open(dir.path()).unwrap();
    seed(&store, &embedder).await;
    store.save().unwrap();
    drop(store);

    let wider = StoreConfig::new(8);
    assert!(matches!(
        Store::open(dir.path(), "library", wider, OpenOptions::new()),
        Err(StoreError::DimensionMismatch {
            expected: 8,
            actual: 4
        })
    ));

    let cosine = StoreConfig::builder(4).metric(Metric::Cosine).build();
    assert!(matches!(
        Store::open(dir.path(), "library", cosine, OpenOptions::new()),
        Err(StoreError::Config(_))
    ));
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::new();

    let left = Store::open(dir.path(), "left", config(), OpenOptions::new()).unwrap();
    let right = Store::open(dir.path(), "right", config(), OpenOptions::new()).unwrap();
    left.ingest(&document("D1", &["sky"]), &embedder)
        .await
        .unwrap();

    assert_eq!(left.stats().unwrap().chunks, 1);
    assert_eq!(right.stats().unwrap().chunks, 0);
    assert!(right.get_document("D1").unwrap().is_none());
}
