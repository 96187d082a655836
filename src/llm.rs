//! Language model service client and prompt construction.
//!
//! Wraps an OpenAI-compatible chat completions endpoint behind the
//! [`LanguageModel`] trait. Provider failures are normal error outcomes for
//! the caller to convert into a fixed fallback answer — no automatic retry is
//! performed here, unlike the embedding providers.
//!
//! Also builds the grounded prompts used by the chat and search paths, and
//! parses natural-language queries into structured incident filters with a
//! safe fallback when the model returns unparseable JSON.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::incidents::IncidentFilters;
use crate::models::{ChatMessage, ContextItem};

/// Fixed fallback when the provider fails mid-conversation.
pub const FALLBACK_ANSWER: &str =
    "Sorry, I encountered an error while processing your request.";

/// Answer returned when retrieval produces no context at all.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant information was found in the indexed documents.";

/// Leading system instruction for the conversational path.
pub const SYSTEM_ASSISTANT: &str = "You are a knowledgeable safety assistant.";

/// Leading system instruction for the grounded search-answer path.
const SYSTEM_GROUNDED: &str = "You are a safety information assistant. Answer the query based \
solely on the provided context. Do not use any external sources. Ensure that your response \
aligns with the given context.";

const SYSTEM_FILTER_EXTRACTION: &str = "You are a filter extraction engine. Extract and return \
a JSON object from the user's query with keys such as 'material', 'location_contains', \
'from_year', 'to_year', 'has_injuries', and 'severity'. Respond with JSON only. Do not include \
explanations or extra text.\n\n\
Example:\n\
Input: gas leaks in Texas with injuries after 2022\n\
Output:\n\
{\n  \"material\": \"gas\",\n  \"location_contains\": \"Texas\",\n  \"has_injuries\": true,\n  \"from_year\": 2022\n}";

/// Trait for the external language model service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for an ordered message sequence, or fail with a
    /// provider error.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiChat {
    /// # Errors
    ///
    /// A missing API key is a configuration error surfaced immediately, not
    /// at first call.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "{} environment variable not set; the language model service is unavailable",
                config.api_key_env
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("chat completion error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("chat completion response missing message content"))
    }
}

// ============ Prompt construction ============

/// Format context items into the block handed to the model, with document
/// and page provenance headers where available.
pub fn format_context(context: &[ContextItem]) -> String {
    context
        .iter()
        .map(|item| {
            let document = item.document.as_deref().unwrap_or("Unknown");
            let page = item
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            format!("(Document: {}, Page: {})\n{}", document, page, item.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Messages for the grounded search-answer path: system instruction, context
/// block, then the user's query.
pub fn build_grounded_messages(query: &str, context: &[ContextItem]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_GROUNDED)];
    if !context.is_empty() {
        messages.push(ChatMessage::system(format_context(context)));
    }
    messages.push(ChatMessage::user(query));
    messages
}

/// Messages for a chat turn. Role ordering is fixed: one leading system
/// instruction, an optional system context message, prior turns, and the
/// final user message.
pub fn build_chat_messages(
    history: &[ChatMessage],
    context: &[ContextItem],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_ASSISTANT)];
    if !context.is_empty() {
        messages.push(ChatMessage::system(format!(
            "Relevant safety information:\n{}",
            format_context(context)
        )));
    }
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(user_message));
    messages
}

// ============ Filter parsing ============

/// Convert a natural-language query into structured incident filters.
///
/// Unparseable model output is logged and degrades to an empty filter set
/// rather than propagating a parse error.
pub async fn parse_filters(llm: &dyn LanguageModel, query: &str) -> IncidentFilters {
    let messages = vec![
        ChatMessage::system(SYSTEM_FILTER_EXTRACTION),
        ChatMessage::user(query),
    ];

    let raw = match llm.complete(&messages, 300, 0.3).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!("filter parsing failed: {e:#}");
            return IncidentFilters::default();
        }
    };

    match serde_json::from_str::<IncidentFilters>(raw.trim()) {
        Ok(filters) => filters,
        Err(e) => {
            tracing::error!("invalid JSON from filter extraction: {e}");
            IncidentFilters::default()
        }
    }
}
