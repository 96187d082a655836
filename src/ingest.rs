//! Corpus ingestion: walk the documents folder, extract, chunk, embed, and
//! persist the document store.
//!
//! Startup is idempotent: when a persisted index and record mapping exist
//! they are loaded instead of rebuilt. A rebuild replaces both files
//! wholesale — the store is append-only in memory and write-once on disk.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::extract::extract_file;
use crate::models::Chunk;
use crate::store::VectorStore;

/// Load the persisted document store, or build and persist it from the
/// configured documents folder.
pub async fn build_or_load_store(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    rebuild: bool,
) -> Result<VectorStore> {
    let index_path = config.storage.index_path();
    let records_path = config.storage.records_path();

    if !rebuild && index_path.exists() && records_path.exists() {
        let store = VectorStore::load(&index_path, &records_path, provider.dims())?;
        tracing::info!(
            "loaded document store: {} chunks from {}",
            store.len(),
            index_path.display()
        );
        return Ok(store);
    }

    let store = build_store(config, provider).await?;
    store.save(&index_path, &records_path)?;
    tracing::info!(
        "built document store: {} chunks, saved to {}",
        store.len(),
        index_path.display()
    );
    Ok(store)
}

/// Build a fresh store from every supported document under the configured
/// folder. Files that fail extraction are skipped, not fatal.
async fn build_store(config: &Config, provider: &dyn EmbeddingProvider) -> Result<VectorStore> {
    let root = &config.storage.documents_dir;
    if !root.exists() {
        bail!("documents directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.storage.include_globs)?;
    let exclude_set = build_globset(&config.storage.exclude_globs)?;

    let mut all_chunks: Vec<Chunk> = Vec::new();
    let mut documents = 0usize;

    let mut paths: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect();
    // Deterministic ordering keeps vector ids stable across rebuilds of an
    // unchanged corpus.
    paths.sort();

    for path in paths {
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let pages = match extract_file(&path) {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!("skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let document_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(rel_str);

        let chunks = chunk_document(
            &document_name,
            &pages,
            config.chunking.max_chars,
            config.chunking.overlap_chars,
        );
        if chunks.is_empty() {
            tracing::warn!("no text extracted from {}", path.display());
            continue;
        }

        all_chunks.extend(chunks);
        documents += 1;
    }

    if documents == 0 {
        tracing::warn!("no documents found under {}", root.display());
    }

    let mut store = VectorStore::new();
    for batch in all_chunks.chunks(config.embedding.batch_size.max(1)) {
        store.add_chunks(provider, batch).await?;
    }

    Ok(store)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
