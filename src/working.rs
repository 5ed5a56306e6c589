//! Working-memory store
//!
//! Per-session state lives in an in-process map keyed by
//! `(namespace, session_id)`. Writes are last-writer-wins guarded by an
//! optimistic version token; a stale token is rejected with a conflict and
//! the client retries.
//!
//! `put` evaluates three triggers in order: pending-memory dedup by id,
//! overflow scheduling for summarization, and promotion scheduling for
//! anything not yet persisted. Promotion stamps `persisted_at` at scheduling
//! time so repeated writes of the same payload do not double-schedule.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::config::Settings;
use crate::error::{MemoryError, Result};
use crate::llm::ModelClient;
use crate::summarize::summarize_if_needed;
use crate::tasks::{Task, TaskScheduler};
use crate::tokens::count_context_tokens;
use crate::types::{
    generate_record_id, MemoryOrigin, MemoryRecord, MemoryRecordResult, WorkingMemory,
    WorkingMemoryResponse,
};

#[derive(Debug, Clone)]
struct VersionedSession {
    memory: WorkingMemory,
    version: u64,
}

fn session_key(namespace: Option<&str>, session_id: &str) -> String {
    format!("{}\0{}", namespace.unwrap_or(""), session_id)
}

/// In-process store of per-session working memory
pub struct WorkingMemoryStore {
    sessions: DashMap<String, VersionedSession>,
    scheduler: TaskScheduler,
    model: Arc<dyn ModelClient>,
    settings: Arc<Settings>,
}

impl WorkingMemoryStore {
    pub fn new(
        scheduler: TaskScheduler,
        model: Arc<dyn ModelClient>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            scheduler,
            model,
            settings,
        }
    }

    fn is_expired(memory: &WorkingMemory) -> bool {
        match memory.ttl_seconds {
            Some(ttl) if ttl > 0 => {
                memory.last_accessed + chrono::Duration::seconds(ttl) < Utc::now()
            }
            _ => false,
        }
    }

    /// Fetch a session, touching `last_accessed`. Expired sessions are
    /// evicted and read as absent.
    pub fn get(&self, namespace: Option<&str>, session_id: &str) -> Option<(WorkingMemory, u64)> {
        let key = session_key(namespace, session_id);
        let expired = {
            let entry = self.sessions.get(&key)?;
            Self::is_expired(&entry.memory)
        };
        if expired {
            self.sessions.remove(&key);
            return None;
        }
        let mut entry = self.sessions.get_mut(&key)?;
        entry.memory.last_accessed = Utc::now();
        Some((entry.memory.clone(), entry.version))
    }

    /// Read a session without touching access time (background use)
    fn peek(&self, namespace: Option<&str>, session_id: &str) -> Option<(WorkingMemory, u64)> {
        let entry = self.sessions.get(&session_key(namespace, session_id))?;
        if Self::is_expired(&entry.memory) {
            return None;
        }
        Some((entry.memory.clone(), entry.version))
    }

    /// Write a session, running the dedup / overflow / promotion triggers.
    ///
    /// Storage conflicts are surfaced; task-scheduling failures are logged
    /// and left to be retried on the next write.
    pub fn put(
        &self,
        namespace: Option<&str>,
        session_id: &str,
        mut memory: WorkingMemory,
        expected_version: Option<u64>,
    ) -> Result<(WorkingMemory, u64)> {
        memory.session_id = session_id.to_string();
        if memory.namespace.is_none() {
            memory.namespace = namespace.map(str::to_string);
        }

        // 1. dedup pending memories by id, last write wins
        memory.memories = dedup_by_id(memory.memories);

        memory.tokens = count_context_tokens(&memory.messages, memory.context.as_deref());

        // 2. overflow check
        if memory.messages.len() > self.settings.window_size {
            let task = Task::Summarize {
                namespace: namespace.map(str::to_string),
                session_id: session_id.to_string(),
                model_name: None,
            };
            if let Err(err) = self.scheduler.schedule(task) {
                tracing::warn!(%err, session_id, "failed to schedule summarization");
            }
        }

        // 3. promotion check
        self.schedule_promotion(&mut memory, namespace, session_id);

        let now = Utc::now();
        memory.updated_at = now;
        memory.last_accessed = now;

        let key = session_key(namespace, session_id);
        let version = match self.sessions.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let current = entry.get();
                if let Some(expected) = expected_version {
                    if current.version != expected {
                        return Err(MemoryError::Conflict(format!(
                            "session {} is at version {}, write expected {}",
                            session_id, current.version, expected
                        )));
                    }
                }
                memory.created_at = current.memory.created_at;
                let version = current.version + 1;
                entry.insert(VersionedSession {
                    memory: memory.clone(),
                    version,
                });
                version
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                if expected_version.is_some() {
                    return Err(MemoryError::Conflict(format!(
                        "session {} does not exist at the expected version",
                        session_id
                    )));
                }
                memory.created_at = now;
                entry.insert(VersionedSession {
                    memory: memory.clone(),
                    version: 1,
                });
                1
            }
        };

        Ok((memory, version))
    }

    /// Schedule indexing for pending memories and messages, stamping
    /// `persisted_at` on the scheduled items
    fn schedule_promotion(
        &self,
        memory: &mut WorkingMemory,
        namespace: Option<&str>,
        session_id: &str,
    ) {
        let now = Utc::now();
        let user_id = memory.user_id.clone();
        let mut pending: Vec<MemoryRecord> = Vec::new();

        for record in memory
            .memories
            .iter_mut()
            .filter(|r| r.persisted_at.is_none())
        {
            if record.id.is_empty() {
                record.id = generate_record_id();
            }
            let mut outbound = record.clone();
            if outbound.session_id.is_none() {
                outbound.session_id = Some(session_id.to_string());
            }
            if outbound.namespace.is_none() {
                outbound.namespace = namespace.map(str::to_string);
            }
            if outbound.user_id.is_none() {
                outbound.user_id = user_id.clone();
            }
            record.persisted_at = Some(now);
            pending.push(outbound);
        }

        for message in memory
            .messages
            .iter_mut()
            .filter(|m| m.persisted_at.is_none())
        {
            pending.push(MemoryRecord::from_message(
                message,
                session_id,
                namespace,
                user_id.as_deref(),
            ));
            message.persisted_at = Some(now);
        }

        if pending.is_empty() {
            return;
        }

        let task = Task::Index {
            records: pending,
            deduplicate: true,
        };
        if let Err(err) = self.scheduler.schedule(task) {
            tracing::warn!(%err, session_id, "failed to schedule promotion");
        }
    }

    /// Delete a session; true when it existed
    pub fn delete(&self, namespace: Option<&str>, session_id: &str) -> bool {
        self.sessions
            .remove(&session_key(namespace, session_id))
            .is_some()
    }

    /// List session ids, filtered by namespace and user, stably ordered
    pub fn list(
        &self,
        namespace: Option<&str>,
        user_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> (Vec<String>, usize) {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| !Self::is_expired(&entry.memory))
            .filter(|entry| {
                namespace.is_none() || entry.memory.namespace.as_deref() == namespace
            })
            .filter(|entry| user_id.is_none() || entry.memory.user_id.as_deref() == user_id)
            .map(|entry| entry.memory.session_id.clone())
            .collect();
        ids.sort();
        let total = ids.len();
        (ids.into_iter().skip(offset).take(limit).collect(), total)
    }

    /// Remove all expired sessions, returning how many were evicted
    pub fn evict_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, v| !Self::is_expired(&v.memory));
        before - self.sessions.len()
    }

    /// Substring search over session messages for the combined search path.
    ///
    /// Score is substring coverage `len(query) / len(content)` in [0, 1],
    /// folded into a pseudo-distance so results compose with vector hits.
    pub fn search_messages(
        &self,
        query: &str,
        session_id: Option<&str>,
        namespace: Option<&str>,
    ) -> Vec<MemoryRecordResult> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return vec![];
        }

        let mut results = Vec::new();
        for entry in self.sessions.iter() {
            let memory = &entry.memory;
            if Self::is_expired(memory) {
                continue;
            }
            if let Some(wanted) = session_id {
                if memory.session_id != wanted {
                    continue;
                }
            }
            if namespace.is_some() && memory.namespace.as_deref() != namespace {
                continue;
            }
            for message in &memory.messages {
                let haystack = message.content.to_lowercase();
                if !haystack.contains(&needle) {
                    continue;
                }
                let coverage =
                    (needle.chars().count() as f32 / haystack.chars().count().max(1) as f32)
                        .clamp(0.0, 1.0);
                let mut record = MemoryRecord::from_message(
                    message,
                    &memory.session_id,
                    memory.namespace.as_deref(),
                    memory.user_id.as_deref(),
                );
                record.created_at = memory.created_at;
                record.last_accessed = memory.last_accessed;
                results.push(MemoryRecordResult {
                    record,
                    dist: 2.0 * (1.0 - coverage),
                    origin: Some(MemoryOrigin::Working),
                });
            }
        }

        results.sort_by(|a, b| {
            a.dist
                .partial_cmp(&b.dist)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        results
    }

    /// Summarize one session in the background. The write is skipped when a
    /// client write lands first; the next overflow will re-trigger.
    pub async fn run_summarization(
        &self,
        namespace: Option<&str>,
        session_id: &str,
        model_name: Option<&str>,
    ) -> Result<()> {
        let Some((memory, version)) = self.peek(namespace, session_id) else {
            return Ok(());
        };

        let outcome = summarize_if_needed(
            self.model.as_ref(),
            &self.settings,
            model_name,
            memory.messages,
            memory.context,
        )
        .await;

        if !outcome.summarized {
            return Ok(());
        }

        let key = session_key(namespace, session_id);
        if let Some(mut entry) = self.sessions.get_mut(&key) {
            if entry.version != version {
                tracing::debug!(session_id, "session changed during summarization, dropping");
                return Ok(());
            }
            entry.memory.messages = outcome.messages;
            entry.memory.context = outcome.context;
            entry.memory.tokens = outcome.tokens;
            entry.memory.updated_at = Utc::now();
            entry.version += 1;
        }
        Ok(())
    }

    /// Attach derived context-usage fields for a response
    pub fn build_response(
        &self,
        memory: WorkingMemory,
        version: u64,
        model_name: Option<&str>,
        context_window_max: Option<usize>,
    ) -> WorkingMemoryResponse {
        let window = context_window_max
            .unwrap_or_else(|| self.settings.context_window(model_name))
            .max(1);
        let threshold =
            ((window as f32) * self.settings.summarization_threshold_ratio).max(1.0);
        let tokens = memory.tokens as f32;

        WorkingMemoryResponse {
            context_percentage_total_used: 100.0 * tokens / window as f32,
            context_percentage_until_summarization: 100.0 * (tokens / threshold).min(1.0),
            memory,
            version,
        }
    }
}

fn dedup_by_id(memories: Vec<MemoryRecord>) -> Vec<MemoryRecord> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<MemoryRecord> = Vec::with_capacity(memories.len());
    for record in memories {
        if record.id.is_empty() {
            out.push(record);
            continue;
        }
        match positions.get(&record.id) {
            Some(&i) => out[i] = record,
            None => {
                positions.insert(record.id.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as MemResult;
    use crate::llm::ChatResponse;
    use crate::tasks::task_queue;
    use crate::types::MemoryMessage;
    use async_trait::async_trait;

    struct NoopClient;

    #[async_trait]
    impl ModelClient for NoopClient {
        async fn create_chat_completion(
            &self,
            _model: &str,
            _prompt: &str,
        ) -> MemResult<ChatResponse> {
            Ok(ChatResponse {
                content: "summary".to_string(),
                total_tokens: 1,
            })
        }

        async fn create_embedding(&self, texts: &[String]) -> MemResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn supports_embedding(&self) -> bool {
            true
        }
    }

    fn store() -> (WorkingMemoryStore, async_channel::Receiver<Task>) {
        let (scheduler, rx) = task_queue(64);
        let settings = Arc::new(Settings {
            window_size: 2,
            context_window_max: Some(100_000),
            ..Default::default()
        });
        (
            WorkingMemoryStore::new(scheduler, Arc::new(NoopClient), settings),
            rx,
        )
    }

    fn memory_with_messages(contents: &[&str]) -> WorkingMemory {
        let mut wm = WorkingMemory::new("s1");
        wm.messages = contents
            .iter()
            .map(|c| MemoryMessage::new("user", *c))
            .collect();
        wm
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let (store, _rx) = store();
        let wm = memory_with_messages(&["hi"]);
        let (written, version) = store.put(Some("ns"), "s1", wm, None).unwrap();
        assert_eq!(version, 1);

        let (read, read_version) = store.get(Some("ns"), "s1").unwrap();
        assert_eq!(read_version, 1);
        assert_eq!(read.messages.len(), written.messages.len());
        assert_eq!(read.messages[0].content, "hi");
        assert_eq!(read.context, written.context);
    }

    #[test]
    fn test_sessions_are_scoped_by_namespace() {
        let (store, _rx) = store();
        store
            .put(Some("ns1"), "s1", memory_with_messages(&["a"]), None)
            .unwrap();
        assert!(store.get(Some("ns2"), "s1").is_none());
        assert!(store.get(Some("ns1"), "s1").is_some());
    }

    #[test]
    fn test_optimistic_conflict() {
        let (store, _rx) = store();
        store
            .put(None, "s1", memory_with_messages(&["a"]), None)
            .unwrap();
        let (_, v1) = store.get(None, "s1").unwrap();

        // writer 1 succeeds with v1
        let (_, v2) = store
            .put(None, "s1", memory_with_messages(&["b"]), Some(v1))
            .unwrap();
        assert_eq!(v2, v1 + 1);

        // writer 2 still holds v1 and must be rejected
        let result = store.put(None, "s1", memory_with_messages(&["c"]), Some(v1));
        assert!(matches!(result, Err(MemoryError::Conflict(_))));
    }

    #[test]
    fn test_overflow_schedules_summarization() {
        let (store, rx) = store();
        store
            .put(None, "s1", memory_with_messages(&["a", "b", "c"]), None)
            .unwrap();
        let queued: Vec<Task> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(queued
            .iter()
            .any(|t| matches!(t, Task::Summarize { session_id, .. } if session_id == "s1")));
    }

    #[test]
    fn test_promotion_stamps_and_schedules_once() {
        let (store, rx) = store();
        let mut wm = memory_with_messages(&["hello"]);
        wm.memories.push(MemoryRecord::new("User likes tea"));

        let (written, version) = store.put(None, "s1", wm, None).unwrap();
        assert!(written.messages[0].persisted_at.is_some());
        assert!(written.memories[0].persisted_at.is_some());
        assert!(!written.memories[0].id.is_empty());

        let first_pass: Vec<Task> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let indexed: usize = first_pass
            .iter()
            .filter_map(|t| match t {
                Task::Index { records, .. } => Some(records.len()),
                _ => None,
            })
            .sum();
        assert_eq!(indexed, 2);

        // writing the stamped payload back schedules nothing new
        store.put(None, "s1", written, Some(version)).unwrap();
        let second_pass: Vec<Task> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(second_pass
            .iter()
            .all(|t| !matches!(t, Task::Index { .. })));
    }

    #[test]
    fn test_pending_memories_dedup_last_wins() {
        let (store, _rx) = store();
        let mut wm = WorkingMemory::new("s1");
        let mut first = MemoryRecord::new("first version");
        first.id = "m1".to_string();
        let mut second = MemoryRecord::new("second version");
        second.id = "m1".to_string();
        wm.memories = vec![first, second];

        let (written, _) = store.put(None, "s1", wm, None).unwrap();
        assert_eq!(written.memories.len(), 1);
        assert_eq!(written.memories[0].text, "second version");
    }

    #[test]
    fn test_list_paginates_stably() {
        let (store, _rx) = store();
        for id in ["s3", "s1", "s2"] {
            store
                .put(Some("ns"), id, memory_with_messages(&["x"]), None)
                .unwrap();
        }
        let (page, total) = store.list(Some("ns"), None, 2, 0);
        assert_eq!(total, 3);
        assert_eq!(page, vec!["s1".to_string(), "s2".to_string()]);
        let (rest, _) = store.list(Some("ns"), None, 2, 2);
        assert_eq!(rest, vec!["s3".to_string()]);
    }

    #[test]
    fn test_ttl_eviction() {
        let (store, _rx) = store();
        let mut wm = memory_with_messages(&["x"]);
        wm.ttl_seconds = Some(1);
        store.put(None, "s1", wm, None).unwrap();

        // rewind last_accessed past the ttl
        store
            .sessions
            .get_mut(&session_key(None, "s1"))
            .unwrap()
            .memory
            .last_accessed = Utc::now() - chrono::Duration::seconds(5);

        assert!(store.get(None, "s1").is_none());
        assert_eq!(store.evict_expired(), 0); // already evicted by get
    }

    #[test]
    fn test_substring_search_scores_by_coverage() {
        let (store, _rx) = store();
        store
            .put(
                None,
                "s1",
                memory_with_messages(&["tea", "tea with milk and sugar"]),
                None,
            )
            .unwrap();

        let hits = store.search_messages("tea", None, None);
        assert_eq!(hits.len(), 2);
        // the exact match covers more of its content, so it sorts first
        assert_eq!(hits[0].record.text, "tea");
        assert!(hits[0].dist < hits[1].dist);
        assert!(hits.iter().all(|h| h.origin == Some(MemoryOrigin::Working)));
    }

    #[test]
    fn test_delete_removes_session() {
        let (store, _rx) = store();
        store
            .put(None, "s1", memory_with_messages(&["x"]), None)
            .unwrap();
        assert!(store.delete(None, "s1"));
        assert!(store.get(None, "s1").is_none());
        assert!(!store.delete(None, "s1"));
    }
}
