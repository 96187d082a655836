//! Chat engine: retrieval-augmented conversation over the indexed corpus,
//! per-session uploads, and the incident set.
//!
//! Each turn embeds the message once, gathers corpus and upload hits plus
//! similar incidents, and hands history + context to the language model.
//! Answers are cached by (message, context) and conversation state lives in
//! the TTL-bounded session memory. Provider failures surface as a fixed
//! fallback answer; no failure propagates to the caller.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::chunk::chunk_document;
use crate::config::{ChunkingConfig, LlmConfig, RetrievalConfig};
use crate::embedding::embed_query;
use crate::extract::{extract_file, ExtractError, ExtractedPage};
use crate::incidents::{IncidentFilters, IncidentMatch, IncidentMatcher, IncidentRecord};
use crate::llm::{
    build_chat_messages, build_grounded_messages, parse_filters, LanguageModel, FALLBACK_ANSWER,
    NO_CONTEXT_ANSWER,
};
use crate::models::{ChatMessage, ChatReply, ContextItem, SearchAnswer, SearchHit};
use crate::search::SearchEngine;
use crate::session::SessionMemory;

pub struct ChatEngine {
    search: SearchEngine,
    sessions: SessionMemory,
    cache: ResponseCache,
    incidents: IncidentMatcher,
    llm: Arc<dyn LanguageModel>,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    llm_config: LlmConfig,
}

impl ChatEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: SearchEngine,
        sessions: SessionMemory,
        cache: ResponseCache,
        incidents: IncidentMatcher,
        llm: Arc<dyn LanguageModel>,
        chunking: ChunkingConfig,
        retrieval: RetrievalConfig,
        llm_config: LlmConfig,
    ) -> Self {
        Self {
            search,
            sessions,
            cache,
            incidents,
            llm,
            chunking,
            retrieval,
            llm_config,
        }
    }

    pub fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    /// Handle one chat turn. Never fails past this boundary: retrieval or
    /// provider errors degrade to a fixed fallback answer.
    pub async fn chat(
        &self,
        session_id: &str,
        message: &str,
        filter_document_names: Option<&[String]>,
    ) -> ChatReply {
        let provider = self.search.provider().clone();

        // Embed once; the same vector serves corpus, upload, and incident
        // retrieval.
        let query_vec = match embed_query(provider.as_ref(), message).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("query embedding failed: {e:#}");
                return ChatReply {
                    answer: FALLBACK_ANSWER.to_string(),
                    sources: Vec::new(),
                    incidents: Vec::new(),
                    referenced_chunks: Vec::new(),
                };
            }
        };

        let mut hits =
            self.search
                .search_corpus(&query_vec, self.retrieval.doc_k, filter_document_names);
        if self.sessions.has_uploads(session_id) {
            hits.extend(self.sessions.search_uploads(
                session_id,
                &query_vec,
                self.retrieval.upload_k,
            ));
        }

        let incidents = self.incidents.similar_to_vector(
            &query_vec,
            self.retrieval.incident_k,
            self.retrieval.incident_threshold,
        );

        let context: Vec<ContextItem> = hits.iter().map(ContextItem::from_hit).collect();
        let sources = distinct_sources(&hits);

        // History snapshot excludes the current message; the user turn is
        // recorded regardless of how answer generation goes.
        let history = self.sessions.history(session_id);
        self.sessions
            .append_turn(session_id, ChatMessage::user(message));

        if context.is_empty() {
            let reply = ChatReply {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources,
                incidents,
                referenced_chunks: hits,
            };
            self.sessions
                .append_turn(session_id, ChatMessage::assistant(&reply.answer));
            return reply;
        }

        let cache_key = ResponseCache::key(message, &context);
        if let Some(cached) = self.cache.get(&cache_key) {
            self.sessions
                .append_turn(session_id, ChatMessage::assistant(&cached));
            return ChatReply {
                answer: cached,
                sources,
                incidents,
                referenced_chunks: hits,
            };
        }

        let messages = build_chat_messages(&history, &context, message);
        let answer = match self
            .llm
            .complete(
                &messages,
                self.llm_config.max_tokens,
                self.llm_config.temperature,
            )
            .await
        {
            Ok(answer) => {
                self.cache.insert(&cache_key, &answer);
                self.sessions
                    .append_turn(session_id, ChatMessage::assistant(&answer));
                answer
            }
            Err(e) => {
                tracing::error!("chat completion failed: {e:#}");
                FALLBACK_ANSWER.to_string()
            }
        };

        ChatReply {
            answer,
            sources,
            incidents,
            referenced_chunks: hits,
        }
    }

    /// Remove a session's chat history and uploaded state. Returns `false`
    /// when there was no live session.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id)
    }

    /// Chunk and embed extracted pages into the session's upload store.
    /// Returns `Ok(false)` when nothing retrievable was extracted.
    pub async fn upload(
        &self,
        session_id: &str,
        document_name: &str,
        pages: &[ExtractedPage],
    ) -> Result<bool> {
        let chunks = chunk_document(
            document_name,
            pages,
            self.chunking.max_chars,
            self.chunking.overlap_chars,
        );
        if chunks.is_empty() {
            return Ok(false);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.search.provider().embed(&texts).await?;
        let added = self.sessions.add_upload(session_id, &chunks, &vectors)?;

        tracing::info!(
            "session {}: added {} uploaded chunks from {}",
            session_id,
            added,
            document_name
        );
        Ok(true)
    }

    /// Extract a file and upload it into the session. Unsupported extensions
    /// and failed extractions are rejected with `Ok(false)` — no partial
    /// processing.
    pub async fn upload_file(&self, session_id: &str, path: &Path) -> Result<bool> {
        let pages = match extract_file(path) {
            Ok(pages) => pages,
            Err(ExtractError::UnsupportedExtension(ext)) => {
                tracing::warn!("rejecting upload with unsupported extension: {}", ext);
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!("extraction failed for {}: {}", path.display(), e);
                return Ok(false);
            }
        };

        let document_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        self.upload(session_id, &document_name, &pages).await
    }

    /// Retrieve top-k chunks and generate a grounded answer over them,
    /// through the response cache.
    pub async fn answer_search(
        &self,
        query: &str,
        k: usize,
        filter_document_names: Option<&[String]>,
    ) -> Result<SearchAnswer> {
        let results = self.search.search(query, k, filter_document_names).await?;

        if results.is_empty() {
            return Ok(SearchAnswer {
                query: query.to_string(),
                results,
                answer: NO_CONTEXT_ANSWER.to_string(),
            });
        }

        let context: Vec<ContextItem> = results.iter().map(ContextItem::from_hit).collect();
        let cache_key = ResponseCache::key(query, &context);
        let messages = build_grounded_messages(query, &context);

        let answer = match self
            .cache
            .get_or_compute(&cache_key, || async {
                self.llm
                    .complete(
                        &messages,
                        self.llm_config.max_tokens,
                        self.llm_config.temperature,
                    )
                    .await
            })
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("search answer generation failed: {e:#}");
                FALLBACK_ANSWER.to_string()
            }
        };

        Ok(SearchAnswer {
            query: query.to_string(),
            results,
            answer,
        })
    }

    /// Parse structured filters out of a natural-language query and apply
    /// them to the incident set. Unparseable model output degrades to an
    /// empty filter, which matches everything.
    pub async fn filter_incidents(&self, query: &str) -> (IncidentFilters, Vec<IncidentRecord>) {
        let filters = parse_filters(self.llm.as_ref(), query).await;
        let records = crate::incidents::filter_incidents(self.incidents.records(), &filters);
        (filters, records)
    }

    /// Incidents semantically similar to the query, annotated with scores.
    pub async fn similar_incidents(
        &self,
        query: &str,
        k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<IncidentMatch>> {
        self.incidents
            .similar_incidents(
                self.search.provider().as_ref(),
                query,
                k.unwrap_or(self.retrieval.incident_k),
                threshold.unwrap_or(self.retrieval.incident_threshold),
            )
            .await
    }
}

/// Distinct document names in hit order.
fn distinct_sources(hits: &[SearchHit]) -> Vec<String> {
    let mut sources = Vec::new();
    for hit in hits {
        if !sources.iter().any(|s| s == &hit.document_name) {
            sources.push(hit.document_name.clone());
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::models::Chunk;
    use crate::store::VectorStore;
    use crate::testutil::{CountingLlm, FailingLlm, FixedLlm, HashEmbedder};
    use std::sync::Arc;
    use std::time::Duration;

    fn corpus_chunk(id: &str, text: &str, doc: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            document_name: doc.to_string(),
            page: Some(1),
        }
    }

    async fn engine_with(
        chunks: &[Chunk],
        llm: Arc<dyn LanguageModel>,
    ) -> (ChatEngine, Arc<HashEmbedder>) {
        let provider = Arc::new(HashEmbedder::new(32));
        let mut store = VectorStore::new();
        store.add_chunks(provider.as_ref(), chunks).await.unwrap();

        let search = SearchEngine::new(
            Arc::new(store),
            provider.clone(),
            RetrievalConfig::default(),
        );
        let engine = ChatEngine::new(
            search,
            SessionMemory::new(Duration::from_secs(60), 5),
            ResponseCache::new(Duration::from_secs(60)),
            IncidentMatcher::empty(),
            llm,
            ChunkingConfig::default(),
            RetrievalConfig::default(),
            LlmConfig::default(),
        );
        (engine, provider)
    }

    #[tokio::test]
    async fn test_chat_identical_turns_hit_cache() {
        let llm = Arc::new(CountingLlm::new("generated answer"));
        let chunks = vec![corpus_chunk(
            "1-0",
            "flare stack maintenance interval is monthly",
            "flare.pdf",
        )];
        let (engine, _) = engine_with(&chunks, llm.clone()).await;

        let first = engine
            .chat("s1", "flare stack maintenance interval", None)
            .await;
        let second = engine
            .chat("s1", "flare stack maintenance interval", None)
            .await;

        assert_eq!(first.answer, "generated answer");
        assert_eq!(second.answer, "generated answer");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_chat_empty_context_skips_llm() {
        let llm = Arc::new(CountingLlm::new("should not be called"));
        let (engine, _) = engine_with(&[], llm.clone()).await;

        let reply = engine.chat("s1", "anything at all", None).await;
        assert_eq!(reply.answer, NO_CONTEXT_ANSWER);
        assert!(reply.referenced_chunks.is_empty());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_chat_provider_failure_falls_back() {
        let chunks = vec![corpus_chunk("1-0", "scrubber ph range", "scrubber.pdf")];
        let (engine, _) = engine_with(&chunks, Arc::new(FailingLlm)).await;

        let reply = engine.chat("s1", "scrubber ph range", None).await;
        assert_eq!(reply.answer, FALLBACK_ANSWER);
        // The failed answer must not be cached as a success.
        let retry = engine.chat("s1", "scrubber ph range", None).await;
        assert_eq!(retry.answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_chat_reports_sources() {
        let llm = Arc::new(CountingLlm::new("ok"));
        let chunks = vec![
            corpus_chunk("1-0", "glove selection for acids", "ppe.pdf"),
            corpus_chunk("1-1", "glove selection for solvents", "ppe.pdf"),
        ];
        let (engine, _) = engine_with(&chunks, llm).await;

        let reply = engine.chat("s1", "glove selection", None).await;
        assert_eq!(reply.sources, vec!["ppe.pdf".to_string()]);
        assert!(!reply.referenced_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_clear_session_after_chat() {
        let llm = Arc::new(CountingLlm::new("ok"));
        let chunks = vec![corpus_chunk("1-0", "eye wash station locations", "ppe.pdf")];
        let (engine, _) = engine_with(&chunks, llm).await;

        engine.chat("s1", "eye wash station locations", None).await;
        assert!(engine.clear_session("s1"));
        assert!(!engine.clear_session("s1"));
    }

    #[tokio::test]
    async fn test_upload_empty_pages_rejected() {
        let llm = Arc::new(CountingLlm::new("ok"));
        let (engine, _) = engine_with(&[], llm).await;

        let pages = [ExtractedPage {
            page: None,
            text: "   \n\n ".to_string(),
        }];
        let accepted = engine.upload("s1", "empty.txt", &pages).await.unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn test_upload_file_unsupported_extension() {
        let llm = Arc::new(CountingLlm::new("ok"));
        let (engine, _) = engine_with(&[], llm).await;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sheet.xlsx");
        std::fs::write(&path, b"binary").unwrap();

        let accepted = engine.upload_file("s1", &path).await.unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn test_filter_incidents_from_natural_language() {
        let provider = Arc::new(HashEmbedder::new(32));
        let mut gas = IncidentRecord {
            number: Some(1),
            severity: String::new(),
            severity_level: String::new(),
            date: String::new(),
            location: String::new(),
            operator: String::new(),
            material: String::new(),
            guide_reference: String::new(),
            description: "gas leak at meter station".to_string(),
            response_actions: String::new(),
            casualties: String::new(),
        };
        gas.material = "Natural Gas".to_string();
        let mut oil = gas.clone();
        oil.number = Some(2);
        oil.material = "Crude Oil".to_string();

        let matcher = IncidentMatcher::from_records(vec![gas, oil], provider.as_ref())
            .await
            .unwrap();

        let llm = Arc::new(FixedLlm {
            reply: r#"{"material": "gas"}"#.to_string(),
        });
        let search = SearchEngine::new(
            Arc::new(VectorStore::new()),
            provider.clone(),
            RetrievalConfig::default(),
        );
        let engine = ChatEngine::new(
            search,
            SessionMemory::new(Duration::from_secs(60), 5),
            ResponseCache::new(Duration::from_secs(60)),
            matcher,
            llm,
            ChunkingConfig::default(),
            RetrievalConfig::default(),
            LlmConfig::default(),
        );

        let (filters, records) = engine.filter_incidents("gas incidents").await;
        assert_eq!(filters.material.as_deref(), Some("gas"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, Some(1));
    }

    #[tokio::test]
    async fn test_answer_search_empty_corpus() {
        let llm = Arc::new(CountingLlm::new("should not run"));
        let (engine, _) = engine_with(&[], llm.clone()).await;

        let answer = engine.answer_search("anything", 3, None).await.unwrap();
        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert!(answer.results.is_empty());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_answer_search_caches() {
        let llm = Arc::new(CountingLlm::new("summary"));
        let chunks = vec![corpus_chunk("1-0", "lockout tagout steps", "loto.pdf")];
        let (engine, _) = engine_with(&chunks, llm.clone()).await;

        let first = engine
            .answer_search("lockout tagout steps", 3, None)
            .await
            .unwrap();
        let second = engine
            .answer_search("lockout tagout steps", 3, None)
            .await
            .unwrap();
        assert_eq!(first.answer, "summary");
        assert_eq!(second.answer, "summary");
        assert_eq!(llm.calls(), 1);
    }
}
