//! # Safety Harness
//!
//! A retrieval-augmented assistant core for safety documents and incident
//! reports.
//!
//! Safety Harness ingests a folder of safety documents into a persistent
//! vector index, retrieves the most relevant chunks for natural-language
//! queries, and augments retrieval with short-lived per-conversation state:
//! bounded chat history, transient uploaded-document embeddings, and cached
//! generated answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │ Documents  │──▶│ Extract +    │──▶│ Document Store   │
//! │ PDF/DOCX/… │   │ Chunk + Embed│   │ index.bin + json │
//! └────────────┘   └──────────────┘   └────────┬────────┘
//!                                              │
//!                  ┌─────────────┐    ┌────────▼────────┐   ┌───────────┐
//!                  │ Session     │───▶│ Search           │──▶│ LLM +     │
//!                  │ uploads/TTL │    │ Orchestrator     │   │ Resp Cache│
//!                  └─────────────┘    └────────┬────────┘   └───────────┘
//!                                              │
//!                                     ┌────────▼────────┐
//!                                     │ CLI (sfh) / HTTP │
//!                                     └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sfh init                        # extract, chunk, embed, persist the corpus
//! sfh search "hydrogen sulfide exposure limits"
//! sfh incidents "gas leak with evacuation"
//! sfh serve                       # start the JSON HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF/DOCX/plain-text extraction |
//! | [`chunk`] | Paragraph and sliding-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat unit-norm vector index |
//! | [`store`] | Index + id→record mapping |
//! | [`search`] | Corpus/upload search orchestration |
//! | [`session`] | TTL-bounded session memory |
//! | [`cache`] | TTL-bounded response cache |
//! | [`incidents`] | Pre-embedded incident matching |
//! | [`llm`] | Chat completions client and prompts |
//! | [`chat`] | Chat engine over all of the above |
//! | [`ingest`] | Corpus build and idempotent startup |
//! | [`server`] | JSON HTTP API |

pub mod cache;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod incidents;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod search;
pub mod server;
pub mod session;
pub mod store;

#[cfg(test)]
pub mod testutil;
