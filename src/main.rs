//! # Safety Harness CLI (`sfh`)
//!
//! The `sfh` binary is the primary interface for Safety Harness. It provides
//! commands for building the document index, searching it, matching
//! incidents, and starting the HTTP API.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sfh init` | Extract, chunk, embed, and persist the document corpus |
//! | `sfh search "<query>"` | Retrieve the most relevant chunks |
//! | `sfh incidents "<query>"` | Find semantically similar incident reports |
//! | `sfh serve` | Start the JSON HTTP API |
//!
//! All commands accept a `--config` flag pointing to a TOML configuration
//! file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use safety_harness::cache::ResponseCache;
use safety_harness::chat::ChatEngine;
use safety_harness::config::{load_config, Config};
use safety_harness::embedding::create_provider;
use safety_harness::incidents::IncidentMatcher;
use safety_harness::ingest::build_or_load_store;
use safety_harness::llm::OpenAiChat;
use safety_harness::search::SearchEngine;
use safety_harness::server::run_server;
use safety_harness::session::SessionMemory;

/// Safety Harness — a retrieval-augmented assistant core for safety
/// documents and incident reports.
#[derive(Parser)]
#[command(
    name = "sfh",
    about = "Safety Harness — retrieval-augmented safety document assistant",
    version,
    long_about = "Safety Harness ingests safety documents into a persistent vector index, \
    retrieves relevant chunks for natural-language queries, matches similar incident reports, \
    and serves a conversational JSON API with per-session memory and uploads."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sfh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or load) the persistent document index.
    Init {
        /// Rebuild the index even if a persisted one exists.
        #[arg(long)]
        rebuild: bool,
    },
    /// Search the indexed documents.
    Search {
        /// The search query.
        query: String,
        /// Maximum number of results.
        #[arg(long, default_value_t = 3)]
        k: usize,
        /// Restrict results to these document names (repeatable).
        #[arg(long = "document")]
        documents: Vec<String>,
    },
    /// Find incidents similar to a query.
    Incidents {
        /// The search query.
        query: String,
        /// Maximum number of matches.
        #[arg(long)]
        k: Option<usize>,
        /// Minimum similarity score to keep a match.
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Start the JSON HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init { rebuild } => run_init(&config, rebuild).await,
        Commands::Search {
            query,
            k,
            documents,
        } => run_search(&config, &query, k, &documents).await,
        Commands::Incidents {
            query,
            k,
            threshold,
        } => run_incidents(&config, &query, k, threshold).await,
        Commands::Serve => run_serve(&config).await,
    }
}

async fn run_init(config: &Config, rebuild: bool) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let store = build_or_load_store(config, provider.as_ref(), rebuild).await?;

    println!("init");
    println!("  embedding model: {}", provider.model_name());
    println!("  indexed chunks: {}", store.len());
    println!("  index: {}", config.storage.index_path().display());
    println!("  records: {}", config.storage.records_path().display());
    println!("ok");
    Ok(())
}

async fn run_search(config: &Config, query: &str, k: usize, documents: &[String]) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let provider = create_provider(&config.embedding)?;
    let store = build_or_load_store(config, provider.as_ref(), false).await?;
    let engine = SearchEngine::new(Arc::new(store), provider, config.retrieval.clone());

    let filter: Option<&[String]> = if documents.is_empty() {
        None
    } else {
        Some(documents)
    };
    let hits = engine.search(query, k, filter).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let page = hit
            .page
            .map(|p| format!("page {}", p))
            .unwrap_or_else(|| "no page".to_string());
        println!(
            "{}. [{:.2}] {} ({}, chunk {})",
            i + 1,
            hit.score,
            hit.document_name,
            page,
            hit.chunk_id
        );
        println!("    excerpt: \"{}\"", excerpt(&hit.text));
        println!();
    }

    Ok(())
}

async fn run_incidents(
    config: &Config,
    query: &str,
    k: Option<usize>,
    threshold: Option<f32>,
) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let matcher = match &config.storage.incidents_path {
        Some(path) => IncidentMatcher::load(path, provider.as_ref()).await?,
        None => IncidentMatcher::empty(),
    };

    let matches = matcher
        .similar_incidents(
            provider.as_ref(),
            query,
            k.unwrap_or(config.retrieval.incident_k),
            threshold.unwrap_or(config.retrieval.incident_threshold),
        )
        .await?;

    if matches.is_empty() {
        println!("No similar incidents.");
        return Ok(());
    }

    for m in &matches {
        let number = m
            .record
            .number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("[{:.2}] Incident {}", m.similarity, number);
        if !m.record.severity.is_empty() {
            println!("    severity: {}", m.record.severity);
        }
        if !m.record.location.is_empty() {
            println!("    location: {}", m.record.location);
        }
        println!("    {}", excerpt(&m.record.description));
        println!();
    }

    Ok(())
}

async fn run_serve(config: &Config) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let store = build_or_load_store(config, provider.as_ref(), false).await?;

    let incidents = match &config.storage.incidents_path {
        Some(path) => IncidentMatcher::load(path, provider.as_ref()).await?,
        None => IncidentMatcher::empty(),
    };

    let llm = Arc::new(OpenAiChat::new(&config.llm)?);
    let search = SearchEngine::new(Arc::new(store), provider, config.retrieval.clone());
    let sessions = SessionMemory::new(
        Duration::from_secs(config.memory.session_ttl_secs),
        config.memory.history_cap,
    );
    let cache = ResponseCache::new(Duration::from_secs(config.memory.cache_ttl_secs));

    let engine = Arc::new(ChatEngine::new(
        search,
        sessions,
        cache,
        incidents,
        llm,
        config.chunking.clone(),
        config.retrieval.clone(),
        config.llm.clone(),
    ));

    run_server(config, engine).await
}

/// First 200 characters of a chunk, flattened to one line.
fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let trimmed: String = flat.trim().chars().take(200).collect();
    trimmed
}
