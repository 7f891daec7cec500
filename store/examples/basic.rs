//! Ingest, update and query an in-memory store with a toy embedder.

use tessera_store::{Embedder, ParsedDocument, Predicate, QueryRequest, Store, StoreConfig};

#[derive(Clone)]
struct DemoEmbedder;

impl Embedder for DemoEmbedder {
    fn dim(&self) -> usize {
        4
    }

    #[allow(clippy::cast_precision_loss)]
    async fn embed(&self, text: &str) -> tessera_core::Result<Vec<f32>> {
        let mut vector = vec![0.0; self.dim()];
        for (idx, byte) in text.bytes().enumerate() {
            vector[idx % 4] += f32::from(byte);
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt().max(1.0);
        Ok(vector.into_iter().map(|x| x / norm).collect())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Store::in_memory(StoreConfig::new(4))?;
    let embedder = DemoEmbedder;

    let notes = ParsedDocument::from_texts(
        "notes",
        [
            "Retrieval uses embeddings to fetch context.",
            "Chunking splits large files into passages.",
            "Rust focuses on performance and safety.",
        ],
    );
    let report = store.ingest(&notes, &embedder).await?;
    println!("first pass: {} inserted", report.inserted.len());

    let revised = ParsedDocument::from_texts(
        "notes",
        [
            "Retrieval uses embeddings to fetch context.",
            "Chunking splits large files into overlapping passages.",
        ],
    );
    let report = store.ingest(&revised, &embedder).await?;
    println!(
        "second pass: {} updated, {} unchanged, {} deleted",
        report.updated.len(),
        report.unchanged.len(),
        report.deleted.len()
    );

    let query = embedder.embed("how are files split").await?;
    let request = QueryRequest::new(query, 2)
        .filter(Predicate::document("notes"))
        .rerank("how are files split");
    for hit in store.query(&request)? {
        println!("{}. [{:.3}] {}", hit.rank, hit.score, hit.chunk.text);
    }

    println!("{:?}", store.stats()?);
    Ok(())
}
