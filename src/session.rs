//! TTL-bounded per-session conversation state.
//!
//! A session owns its bounded chat history and its ephemeral upload store;
//! `clear` drops both in one operation, and expiry is swept lazily on every
//! access rather than by a background timer. Session ids partition all
//! mutable state, so one lock around the map is the only synchronization
//! needed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::models::{ChatMessage, Chunk, HitOrigin, SearchHit};
use crate::store::VectorStore;

/// Conversational and upload state scoped to one interaction stream.
#[derive(Debug, Default)]
struct Session {
    history: Vec<ChatMessage>,
    uploads: VectorStore,
}

struct Entry {
    session: Session,
    last_touched: Instant,
}

/// TTL-bounded map from session id to [`Session`].
pub struct SessionMemory {
    inner: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    history_cap: usize,
}

impl SessionMemory {
    pub fn new(ttl: Duration, history_cap: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            history_cap,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop sessions whose last touch exceeds the TTL. Called at the top of
    /// every public operation; an entry at exactly the TTL boundary is kept.
    fn sweep(map: &mut HashMap<String, Entry>, ttl: Duration) {
        map.retain(|_, entry| entry.last_touched.elapsed() <= ttl);
    }

    /// Append one turn, trimming history to the configured cap.
    pub fn append_turn(&self, session_id: &str, message: ChatMessage) {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);

        let entry = map.entry(session_id.to_string()).or_insert_with(|| Entry {
            session: Session::default(),
            last_touched: Instant::now(),
        });
        entry.session.history.push(message);
        let len = entry.session.history.len();
        if len > self.history_cap {
            entry.session.history.drain(..len - self.history_cap);
        }
        entry.last_touched = Instant::now();
    }

    /// Snapshot of the session's history, oldest first. Empty for unknown or
    /// expired sessions.
    pub fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);
        map.get(session_id)
            .map(|e| e.session.history.clone())
            .unwrap_or_default()
    }

    /// Remove a session's chat history and upload state in one operation.
    /// Returns `false` when there was no live session to clear.
    pub fn clear(&self, session_id: &str) -> bool {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);
        map.remove(session_id).is_some()
    }

    /// Number of live sessions after sweeping.
    pub fn session_count(&self) -> usize {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);
        map.len()
    }

    /// Add pre-embedded uploaded chunks to the session's upload store,
    /// creating the session if needed. Embedding happens outside the lock;
    /// this only appends.
    pub fn add_upload(
        &self,
        session_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<usize> {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);

        let entry = map.entry(session_id.to_string()).or_insert_with(|| Entry {
            session: Session::default(),
            last_touched: Instant::now(),
        });
        let added = entry.session.uploads.add_embedded(chunks, vectors)?;
        entry.last_touched = Instant::now();
        Ok(added)
    }

    /// Whether the session has any uploaded chunks.
    pub fn has_uploads(&self, session_id: &str) -> bool {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);
        map.get(session_id)
            .map(|e| !e.session.uploads.is_empty())
            .unwrap_or(false)
    }

    /// Query the session's upload store. Hits are tagged
    /// [`HitOrigin::Upload`]; unknown or expired sessions return nothing.
    pub fn search_uploads(&self, session_id: &str, query_vec: &[f32], k: usize) -> Vec<SearchHit> {
        let mut map = self.lock();
        Self::sweep(&mut map, self.ttl);

        let Some(entry) = map.get(session_id) else {
            return Vec::new();
        };

        entry
            .session
            .uploads
            .search(query_vec, k)
            .into_iter()
            .map(|(record, score)| SearchHit {
                chunk_id: record.chunk_id.clone(),
                score,
                text: record.text.clone(),
                document_name: record.document_name.clone(),
                page: record.page,
                origin: HitOrigin::Upload,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::HashEmbedder;

    fn memory(ttl_ms: u64, cap: usize) -> SessionMemory {
        SessionMemory::new(Duration::from_millis(ttl_ms), cap)
    }

    #[test]
    fn test_history_never_exceeds_cap() {
        let sessions = memory(60_000, 5);
        for i in 0..20 {
            sessions.append_turn("s1", ChatMessage::user(format!("message {}", i)));
        }
        let history = sessions.history("s1");
        assert_eq!(history.len(), 5);
        // The cap keeps the most recent turns.
        assert_eq!(history[0].content, "message 15");
        assert_eq!(history[4].content, "message 19");
    }

    #[test]
    fn test_entry_present_before_ttl() {
        let sessions = memory(60_000, 5);
        sessions.append_turn("s1", ChatMessage::user("hello"));
        assert_eq!(sessions.history("s1").len(), 1);
        assert_eq!(sessions.session_count(), 1);
    }

    #[test]
    fn test_entry_absent_after_ttl() {
        let sessions = memory(40, 5);
        sessions.append_turn("s1", ChatMessage::user("hello"));
        std::thread::sleep(Duration::from_millis(80));
        assert!(sessions.history("s1").is_empty());
        assert_eq!(sessions.session_count(), 0);
    }

    #[test]
    fn test_touch_extends_lifetime() {
        let sessions = memory(400, 5);
        sessions.append_turn("s1", ChatMessage::user("one"));
        std::thread::sleep(Duration::from_millis(250));
        sessions.append_turn("s1", ChatMessage::user("two"));
        std::thread::sleep(Duration::from_millis(250));
        // 500ms since creation but only 250ms since last touch.
        assert_eq!(sessions.history("s1").len(), 2);
    }

    #[test]
    fn test_clear_removes_history_and_uploads() {
        let sessions = memory(60_000, 5);
        let embedder = HashEmbedder::new(8);

        sessions.append_turn("s1", ChatMessage::user("hello"));
        let chunks = vec![Chunk {
            chunk_id: "0-0".to_string(),
            text: "uploaded spill procedure".to_string(),
            document_name: "upload.txt".to_string(),
            page: None,
        }];
        let vectors = vec![embedder.vector("uploaded spill procedure")];
        sessions.add_upload("s1", &chunks, &vectors).unwrap();
        assert!(sessions.has_uploads("s1"));

        assert!(sessions.clear("s1"));
        assert!(!sessions.has_uploads("s1"));
        assert!(sessions.history("s1").is_empty());
        // A second clear finds nothing.
        assert!(!sessions.clear("s1"));
    }

    #[test]
    fn test_upload_search_tagged_and_isolated() {
        let sessions = memory(60_000, 5);
        let embedder = HashEmbedder::new(16);

        let chunks = vec![Chunk {
            chunk_id: "0-0".to_string(),
            text: "benzene storage limits".to_string(),
            document_name: "upload.txt".to_string(),
            page: None,
        }];
        let vectors = vec![embedder.vector("benzene storage limits")];
        sessions.add_upload("s1", &chunks, &vectors).unwrap();

        let query = embedder.vector("benzene storage limits");
        let hits = sessions.search_uploads("s1", &query, 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].origin, HitOrigin::Upload);

        // Another session sees nothing.
        assert!(sessions.search_uploads("s2", &query, 3).is_empty());
    }
}
