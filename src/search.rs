//! Search orchestration over the document store and session upload stores.
//!
//! A query is embedded once and dispatched to the corpus store (with an
//! over-fetch factor to leave headroom for document-name filtering) and, when
//! the caller's session has uploaded material, to that session's upload
//! store. Upload hits are appended after corpus hits rather than re-ranked
//! against them: a user who uploads a file expects it consulted regardless of
//! its relative embedding score.
//!
//! Scores are cosine similarity, higher is better, in every path.

use anyhow::Result;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::models::{HitOrigin, SearchHit};
use crate::session::SessionMemory;
use crate::store::VectorStore;

pub struct SearchEngine {
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl SearchEngine {
    pub fn new(
        store: Arc<VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn corpus_len(&self) -> usize {
        self.store.len()
    }

    /// Search the document store. Returns at most `k` hits, filtered to the
    /// allow-list when one is supplied, sorted by descending score.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter_document_names: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = embed_query(self.provider.as_ref(), query).await?;
        Ok(self.search_corpus(&query_vec, k, filter_document_names))
    }

    /// Corpus search with an already-embedded query.
    pub fn search_corpus(
        &self,
        query_vec: &[f32],
        k: usize,
        filter_document_names: Option<&[String]>,
    ) -> Vec<SearchHit> {
        if self.store.is_empty() {
            tracing::debug!("document store is empty");
            return Vec::new();
        }

        // Over-fetch so post-filtering by document name still fills k.
        let fetch = k.saturating_mul(self.config.overfetch_factor).max(k);
        let mut hits: Vec<SearchHit> = self
            .store
            .search(query_vec, fetch)
            .into_iter()
            .filter(|(record, _)| match filter_document_names {
                Some(allowed) => allowed.iter().any(|name| name == &record.document_name),
                None => true,
            })
            .map(|(record, score)| SearchHit {
                chunk_id: record.chunk_id.clone(),
                score,
                text: record.text.clone(),
                document_name: record.document_name.clone(),
                page: record.page,
                origin: HitOrigin::Corpus,
            })
            .collect();

        hits.truncate(k);
        hits
    }

    /// Full retrieval for a chat turn: corpus hits followed by the session's
    /// upload hits. The two result sets are concatenated, not re-ranked
    /// against each other.
    pub async fn search_with_session(
        &self,
        sessions: &SessionMemory,
        session_id: &str,
        query: &str,
        k: usize,
        filter_document_names: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = embed_query(self.provider.as_ref(), query).await?;

        let mut hits = self.search_corpus(&query_vec, k, filter_document_names);

        if sessions.has_uploads(session_id) {
            let upload_hits =
                sessions.search_uploads(session_id, &query_vec, self.config.upload_k);
            hits.extend(upload_hits);
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use crate::testutil::HashEmbedder;
    use std::time::Duration;

    fn chunk(id: &str, text: &str, doc: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            document_name: doc.to_string(),
            page: Some(1),
        }
    }

    async fn engine_with_corpus(chunks: &[Chunk]) -> (SearchEngine, Arc<HashEmbedder>) {
        let provider = Arc::new(HashEmbedder::new(32));
        let mut store = VectorStore::new();
        store.add_chunks(provider.as_ref(), chunks).await.unwrap();
        let engine = SearchEngine::new(
            Arc::new(store),
            provider.clone(),
            RetrievalConfig::default(),
        );
        (engine, provider)
    }

    #[tokio::test]
    async fn test_search_caps_results_at_k() {
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| {
                chunk(
                    &format!("1-{}", i),
                    &format!("chlorine handling rule number {}", i),
                    "chlorine.pdf",
                )
            })
            .collect();
        let (engine, _) = engine_with_corpus(&chunks).await;

        let hits = engine.search("chlorine handling", 3, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_filter_excludes_other_documents() {
        let chunks = vec![
            chunk("1-0", "ammonia release response", "ammonia.pdf"),
            chunk("1-0", "ammonia storage tank design", "tanks.pdf"),
            chunk("1-1", "ammonia transfer hose checks", "ammonia.pdf"),
        ];
        let (engine, _) = engine_with_corpus(&chunks).await;

        let allow = vec!["ammonia.pdf".to_string()];
        let hits = engine
            .search("ammonia", 5, Some(allow.as_slice()))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.document_name == "ammonia.pdf"));
    }

    #[tokio::test]
    async fn test_empty_store_returns_nothing() {
        let (engine, _) = engine_with_corpus(&[]).await;
        let hits = engine.search("anything", 5, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_upload_hits_appended_not_reranked() {
        let corpus = vec![chunk("1-0", "general permit guidance", "permits.pdf")];
        let (engine, provider) = engine_with_corpus(&corpus).await;

        let sessions = SessionMemory::new(Duration::from_secs(60), 5);
        let uploaded = vec![Chunk {
            chunk_id: "0-0".to_string(),
            text: "site specific permit guidance".to_string(),
            document_name: "site.txt".to_string(),
            page: None,
        }];
        let vectors = vec![provider.vector("site specific permit guidance")];
        sessions.add_upload("s1", &uploaded, &vectors).unwrap();

        let hits = engine
            .search_with_session(&sessions, "s1", "permit guidance", 3, None)
            .await
            .unwrap();

        // Corpus hits first, then upload hits, regardless of score.
        assert_eq!(hits[0].origin, HitOrigin::Corpus);
        let upload_count = hits
            .iter()
            .filter(|h| h.origin == HitOrigin::Upload)
            .count();
        assert_eq!(upload_count, 1);
        assert_eq!(hits.last().unwrap().document_name, "site.txt");
    }

    #[tokio::test]
    async fn test_session_without_uploads_gets_corpus_only() {
        let corpus = vec![chunk("1-0", "general permit guidance", "permits.pdf")];
        let (engine, _) = engine_with_corpus(&corpus).await;
        let sessions = SessionMemory::new(Duration::from_secs(60), 5);

        let hits = engine
            .search_with_session(&sessions, "s1", "permit guidance", 3, None)
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.origin == HitOrigin::Corpus));
    }
}
