//! Deterministic in-process stand-ins for the external providers, used by
//! module tests. No network, no model downloads.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedding::EmbeddingProvider;
use crate::llm::LanguageModel;
use crate::models::ChatMessage;

/// Bag-of-words hashing embedder: each lowercased whitespace token is hashed
/// into one of `dims` buckets. Identical texts embed identically (cosine
/// 1.0); texts with disjoint vocabulary are near-orthogonal.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    /// Synchronous single-text embedding, convenient for building queries.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text.to_lowercase().split_whitespace() {
            let mut h: usize = 0;
            for b in token.bytes() {
                h = h.wrapping_mul(31).wrapping_add(b as usize);
            }
            v[h % self.dims] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Language model stub that counts invocations and returns a canned answer.
pub struct CountingLlm {
    calls: AtomicUsize,
    reply: String,
}

impl CountingLlm {
    pub fn new(reply: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for CountingLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Language model stub that always fails, for fallback-path tests.
pub struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        anyhow::bail!("provider unavailable")
    }
}

/// Language model stub returning a fixed raw string, for JSON-parsing tests.
pub struct FixedLlm {
    pub reply: String,
}

#[async_trait]
impl LanguageModel for FixedLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        Ok(self.reply.clone())
    }
}
