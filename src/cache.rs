//! TTL-bounded cache for generated answers.
//!
//! Keys are derived from the exact prompt text plus a serialization of the
//! context items, so the same question with different retrieved context is a
//! miss. Expired entries are purged opportunistically on the next cache
//! operation, not by a background timer. The cache sits only in front of the
//! language model call — never in front of retrieval, where staleness would
//! hide newly ingested documents.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::models::ContextItem;

struct CacheEntry {
    response: String,
    inserted: Instant,
}

pub struct ResponseCache {
    inner: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Derive the cache key for a prompt and its context.
    pub fn key(prompt: &str, context: &[ContextItem]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        for item in context {
            // Unit separator keeps distinct fields from colliding.
            hasher.update([0x1f]);
            hasher.update(item.document.as_deref().unwrap_or("").as_bytes());
            hasher.update([0x1f]);
            hasher.update(item.page.unwrap_or(-1).to_le_bytes());
            hasher.update([0x1f]);
            hasher.update(item.text.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sweep(map: &mut HashMap<String, CacheEntry>, ttl: Duration) {
        map.retain(|_, entry| entry.inserted.elapsed() <= ttl);
    }

    /// Look up a cached response. An entry older than the TTL is treated as
    /// absent.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);
        map.get(key).map(|e| e.response.clone())
    }

    pub fn insert(&self, key: &str, response: &str) {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);
        map.insert(
            key.to_string(),
            CacheEntry {
                response: response.to_string(),
                inserted: Instant::now(),
            },
        );
    }

    /// Return the cached response for `key`, or run `compute`, cache its
    /// result, and return it. Failures are not cached.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(hit) = self.get(key) {
            tracing::debug!("response cache hit");
            return Ok(hit);
        }
        let response = compute().await?;
        self.insert(key, &response);
        Ok(response)
    }

    /// Number of live entries after sweeping.
    pub fn len(&self) -> usize {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
