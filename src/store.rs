//! Vector store: a [`VectorIndex`] plus the id→record mapping.
//!
//! The mapping is append-only and positional — `vector_id` is the row in the
//! backing index, so records are never deleted or reordered without a full
//! rebuild. One store instance serves two roles:
//!
//! - the corpus-wide **document store**, built once at startup (or loaded
//!   from disk) and read-only afterwards;
//! - a per-session **upload store**, built incrementally from uploaded
//!   material, never persisted, dropped with its session.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::models::Chunk;

/// One row of the id→record mapping. `vector_id` equals the record's row
/// position in the backing index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub vector_id: usize,
    pub chunk_id: String,
    pub text: String,
    pub document_name: String,
    pub page: Option<i64>,
}

#[derive(Debug, Default)]
pub struct VectorStore {
    index: VectorIndex,
    records: Vec<EmbeddingRecord>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.index.dim()
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    /// Append chunks with precomputed embeddings (one vector per chunk, in
    /// order). Used when the caller batches embedding itself or cannot hold
    /// an await across a lock.
    pub fn add_embedded(&mut self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize> {
        if chunks.len() != vectors.len() {
            bail!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let vector_id = self.index.add(vector)?;
            debug_assert_eq!(vector_id, self.records.len());
            self.records.push(EmbeddingRecord {
                vector_id,
                chunk_id: chunk.chunk_id.clone(),
                text: chunk.text.clone(),
                document_name: chunk.document_name.clone(),
                page: chunk.page,
            });
        }

        Ok(chunks.len())
    }

    /// Embed and append a batch of chunks.
    pub async fn add_chunks(
        &mut self,
        provider: &dyn EmbeddingProvider,
        chunks: &[Chunk],
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = provider.embed(&texts).await?;
        self.add_embedded(chunks, &vectors)
    }

    /// Top `k` records by cosine similarity to the query vector, descending.
    pub fn search(&self, query_vec: &[f32], k: usize) -> Vec<(&EmbeddingRecord, f32)> {
        self.index
            .search(query_vec, k)
            .into_iter()
            .map(|(id, score)| (&self.records[id], score))
            .collect()
    }

    /// Persist the index and record mapping. Both files are write-once:
    /// they are only replaced by the next full rebuild.
    pub fn save(&self, index_path: &Path, records_path: &Path) -> Result<()> {
        self.index.save(index_path)?;

        if let Some(parent) = records_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&self.records)?;
        std::fs::write(records_path, json)
            .with_context(|| format!("Failed to write records file: {}", records_path.display()))?;

        Ok(())
    }

    /// Load a previously saved store.
    ///
    /// `expected_dims` is the live embedding model's dimensionality; a store
    /// built with a different dimension cannot be queried and loading it is
    /// an unrecoverable startup error.
    pub fn load(index_path: &Path, records_path: &Path, expected_dims: usize) -> Result<Self> {
        let index = VectorIndex::load(index_path)?;

        let json = std::fs::read_to_string(records_path)
            .with_context(|| format!("Failed to read records file: {}", records_path.display()))?;
        let records: Vec<EmbeddingRecord> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse records file: {}", records_path.display()))?;

        if index.len() != records.len() {
            bail!(
                "index/records mismatch: {} vectors but {} records",
                index.len(),
                records.len()
            );
        }

        if let Some(dim) = index.dim() {
            if dim != expected_dims {
                bail!(
                    "persisted index has dimension {} but the configured embedding model \
                     produces {}; rebuild the index with `sfh init --rebuild`",
                    dim,
                    expected_dims
                );
            }
        }

        Ok(Self { index, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::HashEmbedder;

    fn chunk(id: &str, text: &str, doc: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            document_name: doc.to_string(),
            page: None,
        }
    }

    #[tokio::test]
    async fn test_add_chunks_assigns_dense_ids() {
        let embedder = HashEmbedder::new(16);
        let mut store = VectorStore::new();
        let chunks = vec![
            chunk("0-0", "valve inspection procedure", "a.txt"),
            chunk("1-0", "pipeline corrosion report", "a.txt"),
            chunk("0-0", "emergency shutdown steps", "b.txt"),
        ];
        store.add_chunks(&embedder, &chunks).await.unwrap();

        assert_eq!(store.len(), 3);
        for (i, record) in store.records().iter().enumerate() {
            assert_eq!(record.vector_id, i);
        }
    }

    #[tokio::test]
    async fn test_search_returns_matching_record() {
        let embedder = HashEmbedder::new(32);
        let mut store = VectorStore::new();
        let chunks = vec![
            chunk("0-0", "hydrogen sulfide exposure limits", "gas.txt"),
            chunk("1-0", "ladder fall protection harness", "height.txt"),
        ];
        store.add_chunks(&embedder, &chunks).await.unwrap();

        let query = embedder.vector("hydrogen sulfide exposure limits");
        let hits = store.search(&query, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.document_name, "gas.txt");
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn test_add_embedded_count_mismatch() {
        let mut store = VectorStore::new();
        let chunks = vec![chunk("0-0", "text", "a.txt")];
        let err = store.add_embedded(&chunks, &[]).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[tokio::test]
    async fn test_load_rejects_dimension_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let index_path = tmp.path().join("index.bin");
        let records_path = tmp.path().join("records.json");

        let embedder = HashEmbedder::new(8);
        let mut store = VectorStore::new();
        store
            .add_chunks(&embedder, &[chunk("0-0", "some text", "a.txt")])
            .await
            .unwrap();
        store.save(&index_path, &records_path).unwrap();

        let err = VectorStore::load(&index_path, &records_path, 16).unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip_search_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let index_path = tmp.path().join("index.bin");
        let records_path = tmp.path().join("records.json");

        let embedder = HashEmbedder::new(32);
        let mut store = VectorStore::new();
        let chunks = vec![
            chunk("0-0", "confined space entry permit", "permits.txt"),
            chunk("1-0", "hot work welding authorization", "permits.txt"),
            chunk("0-0", "respirator fit testing schedule", "ppe.txt"),
        ];
        store.add_chunks(&embedder, &chunks).await.unwrap();
        store.save(&index_path, &records_path).unwrap();

        let loaded = VectorStore::load(&index_path, &records_path, 32).unwrap();
        let query = embedder.vector("welding permit");

        let before = store.search(&query, 3);
        let after = loaded.search(&query, 3);
        assert_eq!(before.len(), after.len());
        for ((rec_a, score_a), (rec_b, score_b)) in before.iter().zip(after.iter()) {
            assert_eq!(rec_a.chunk_id, rec_b.chunk_id);
            assert_eq!(rec_a.document_name, rec_b.document_name);
            assert!((score_a - score_b).abs() < 1e-6);
        }
    }
}
