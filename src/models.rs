//! Core data models used throughout Safety Harness.
//!
//! These types represent the chunks, search hits, and chat payloads that flow
//! through the retrieval and memory pipeline.

use serde::{Deserialize, Serialize};

/// A bounded span of document text with provenance, the atomic unit of
/// retrieval. Produced by the chunker; immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within a document: page number (or whole-document paragraph
    /// index for pageless sources) plus a running counter.
    pub chunk_id: String,
    pub text: String,
    pub document_name: String,
    /// `None` for sources with no page concept (plain text, DOCX).
    pub page: Option<i64>,
}

/// Where a search hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitOrigin {
    /// The persistent document store built at startup.
    Corpus,
    /// The caller's session upload store.
    Upload,
}

/// A ranked retrieval result. `score` is cosine similarity (higher is
/// better) regardless of which store produced the hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f32,
    pub text: String,
    pub document_name: String,
    pub page: Option<i64>,
    pub origin: HitOrigin,
}

/// A single piece of context handed to the language model, normalized at the
/// orchestrator boundary. Provenance fields are `None` for context that has
/// no document attribution.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub text: String,
    pub document: Option<String>,
    pub page: Option<i64>,
}

impl ContextItem {
    pub fn from_hit(hit: &SearchHit) -> Self {
        Self {
            text: hit.text.clone(),
            document: Some(hit.document_name.clone()),
            page: hit.page,
        }
    }
}

/// One turn of a conversation, in chat-completions wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Response of a chat turn: the generated answer plus everything it was
/// grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub answer: String,
    /// Distinct document names the answer drew from, in rank order.
    pub sources: Vec<String>,
    pub incidents: Vec<crate::incidents::IncidentMatch>,
    pub referenced_chunks: Vec<SearchHit>,
}

/// Response of the search-and-answer operation.
#[derive(Debug, Clone, Serialize)]
pub struct SearchAnswer {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub answer: String,
}
