//! Core types for mnemon

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::filters::SearchFilters;
use crate::rerank::RecencyConfig;

/// Generate a lexicographically-sortable record id (creation-time ordered)
pub fn generate_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a message id
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_now() -> DateTime<Utc> {
    Utc::now()
}

/// Whether discrete extraction has processed a message or record.
///
/// Stored and serialized as `"t"` / `"f"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExtractedFlag {
    #[serde(rename = "t")]
    Extracted,
    #[default]
    #[serde(rename = "f")]
    Pending,
}

impl ExtractedFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractedFlag::Extracted => "t",
            ExtractedFlag::Pending => "f",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ExtractedFlag::Pending)
    }
}

impl std::str::FromStr for ExtractedFlag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "t" => Ok(ExtractedFlag::Extracted),
            "f" => Ok(ExtractedFlag::Pending),
            _ => Err(format!("Unknown extraction flag: {}", s)),
        }
    }
}

/// Memory record classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRecordType {
    /// A verbatim conversation message promoted from working memory
    #[default]
    Message,
    /// A dated personal experience ("User visited Paris in summer 2024")
    Episodic,
    /// A timeless preference or fact ("User prefers window seats")
    Semantic,
}

impl MemoryRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryRecordType::Message => "message",
            MemoryRecordType::Episodic => "episodic",
            MemoryRecordType::Semantic => "semantic",
        }
    }
}

impl std::str::FromStr for MemoryRecordType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "message" => Ok(MemoryRecordType::Message),
            "episodic" => Ok(MemoryRecordType::Episodic),
            "semantic" => Ok(MemoryRecordType::Semantic),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

/// One turn in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMessage {
    /// Stable unique identifier, generated if absent
    #[serde(default = "generate_message_id")]
    pub id: String,
    /// Free-form role, typically "user" / "assistant" / "system"
    pub role: String,
    pub content: String,
    /// Set by the server when the message reaches long-term storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discrete_memory_extracted: ExtractedFlag,
}

impl MemoryMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            role: role.into(),
            content: content.into(),
            persisted_at: None,
            discrete_memory_extracted: ExtractedFlag::Pending,
        }
    }
}

/// A unit in long-term memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Stable identifier; server-assigned (sortable by creation time) if absent
    #[serde(default)]
    pub id: String,
    /// The fact, with contextual references grounded
    pub text: String,
    #[serde(default)]
    pub memory_type: MemoryRecordType,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_now")]
    pub last_accessed: DateTime<Utc>,
    /// Set by the vector store when the record is first indexed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_at: Option<DateTime<Utc>>,
    /// Semantic date of the described event, for episodic memories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime<Utc>>,
    /// Pinned records are never auto-deleted
    #[serde(default)]
    pub pinned: bool,
    /// Best-effort access counter, rate-limited on update
    #[serde(default)]
    pub access_count: u64,
    /// Deterministic duplicate fingerprint, computed at index time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_hash: Option<String>,
    /// Source message ids this record was extracted from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extracted_from: Vec<String>,
    #[serde(default)]
    pub discrete_memory_extracted: ExtractedFlag,
}

impl MemoryRecord {
    /// Build a record carrying only text; remaining fields take defaults.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: generate_record_id(),
            text: text.into(),
            memory_type: MemoryRecordType::default(),
            topics: vec![],
            entities: vec![],
            session_id: None,
            user_id: None,
            namespace: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_accessed: Utc::now(),
            persisted_at: None,
            event_date: None,
            pinned: false,
            access_count: 0,
            memory_hash: None,
            extracted_from: vec![],
            discrete_memory_extracted: ExtractedFlag::Pending,
        }
    }

    /// Build a `message`-type record from a working-memory message.
    pub fn from_message(
        message: &MemoryMessage,
        session_id: &str,
        namespace: Option<&str>,
        user_id: Option<&str>,
    ) -> Self {
        let mut record = Self::new(message.content.clone());
        record.id = message.id.clone();
        record.memory_type = MemoryRecordType::Message;
        record.session_id = Some(session_id.to_string());
        record.namespace = namespace.map(str::to_string);
        record.user_id = user_id.map(str::to_string);
        record.discrete_memory_extracted = message.discrete_memory_extracted;
        record
    }
}

/// Partial update of a long-term memory record.
///
/// `None` fields are left alone. `event_date` uses a double option so callers
/// can clear the value with `Some(None)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryRecordPatch {
    pub text: Option<String>,
    pub memory_type: Option<MemoryRecordType>,
    pub topics: Option<Vec<String>>,
    pub entities: Option<Vec<String>>,
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<Option<DateTime<Utc>>>,
}

/// Per-session ephemeral state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemory {
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Ordered conversation messages
    #[serde(default)]
    pub messages: Vec<MemoryMessage>,
    /// Pending structured memories not yet promoted to long-term storage
    #[serde(default)]
    pub memories: Vec<MemoryRecord>,
    /// Arbitrary client-defined state; shape is never validated
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    /// Current rolling summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Last computed token count
    #[serde(default)]
    pub tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_now")]
    pub last_accessed: DateTime<Utc>,
}

impl WorkingMemory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            namespace: None,
            user_id: None,
            messages: vec![],
            memories: vec![],
            data: HashMap::new(),
            context: None,
            tokens: 0,
            ttl_seconds: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_accessed: Utc::now(),
        }
    }

    /// Read a value from the opaque `data` map
    pub fn data_get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Write a value into the opaque `data` map
    pub fn data_set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.memories.is_empty() && self.context.is_none()
    }
}

/// Working memory plus derived context-usage fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryResponse {
    #[serde(flatten)]
    pub memory: WorkingMemory,
    /// Optimistic-concurrency token; echo back on the next put
    pub version: u64,
    /// Percentage of the model context window currently used
    pub context_percentage_total_used: f32,
    /// Percentage of the summarization threshold currently used, capped at 100
    pub context_percentage_until_summarization: f32,
}

/// Body of `PUT /sessions/{id}/memory`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutWorkingMemoryRequest {
    #[serde(flatten)]
    pub memory: WorkingMemory,
    /// Version token from a prior read; omit to write unconditionally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Where a combined search result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOrigin {
    Working,
    LongTerm,
}

/// One search hit with its vector distance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecordResult {
    #[serde(flatten)]
    pub record: MemoryRecord,
    /// Distance in [0, 2]; smaller is closer
    pub dist: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<MemoryOrigin>,
}

/// Results of a long-term memory search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryRecordResults {
    pub memories: Vec<MemoryRecordResult>,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
}

fn default_search_limit() -> usize {
    10
}

/// Payload for long-term memory search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Optional text for semantic similarity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub filters: SearchFilters,
    /// Maximum allowed distance for returned results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_threshold: Option<f32>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Enable recency-aware re-ranking, optionally overriding weights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency: Option<RecencyConfig>,
}

impl SearchRequest {
    pub fn for_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Payload for creating long-term memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLongTermMemoryRequest {
    pub memories: Vec<MemoryRecord>,
}

/// Query parameters for listing sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSessionsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "default_sessions_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_sessions_limit() -> usize {
    20
}

impl Default for GetSessionsQuery {
    fn default() -> Self {
        Self {
            namespace: None,
            user_id: None,
            limit: default_sessions_limit(),
            offset: 0,
        }
    }
}

/// Response for listing sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<String>,
    pub total: usize,
}

/// Query parameters for reading a session's working memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetSessionMemoryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Return at most this many trailing messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_max: Option<usize>,
}

/// Query parameters carrying only a namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Response for the health check endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Current server time in epoch milliseconds
    pub now: i64,
}

/// Generic acknowledgement response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub status: String,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// An LLM-ready message produced by prompt hydration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
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
}

/// Session options for prompt hydration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSessionOptions {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_max: Option<usize>,
}

/// Payload for `POST /memory-prompt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPromptRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<PromptSessionOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_term_search: Option<SearchRequest>,
}

/// Response for `POST /memory-prompt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPromptResponse {
    pub messages: Vec<PromptMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracted_flag_wire_format() {
        assert_eq!(
            serde_json::to_string(&ExtractedFlag::Extracted).unwrap(),
            "\"t\""
        );
        assert_eq!(
            serde_json::to_string(&ExtractedFlag::Pending).unwrap(),
            "\"f\""
        );
        let parsed: ExtractedFlag = serde_json::from_str("\"f\"").unwrap();
        assert!(parsed.is_pending());
    }

    #[test]
    fn test_record_id_is_sortable_by_creation() {
        let a = generate_record_id();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = generate_record_id();
        assert!(a < b);
    }

    #[test]
    fn test_memory_type_roundtrip() {
        for t in [
            MemoryRecordType::Message,
            MemoryRecordType::Episodic,
            MemoryRecordType::Semantic,
        ] {
            let parsed: MemoryRecordType = t.as_str().parse().unwrap();
            assert_eq!(t, parsed);
        }
        assert!("procedural".parse::<MemoryRecordType>().is_err());
    }

    #[test]
    fn test_record_from_message_inherits_scope() {
        let message = MemoryMessage::new("user", "I like tea");
        let record = MemoryRecord::from_message(&message, "s1", Some("ns"), Some("u1"));
        assert_eq!(record.id, message.id);
        assert_eq!(record.memory_type, MemoryRecordType::Message);
        assert_eq!(record.session_id.as_deref(), Some("s1"));
        assert_eq!(record.namespace.as_deref(), Some("ns"));
        assert_eq!(record.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_empty_working_memory_roundtrip() {
        let wm = WorkingMemory::new("s1");
        let json = serde_json::to_string(&wm).unwrap();
        let back: WorkingMemory = serde_json::from_str(&json).unwrap();
        assert!(back.is_empty());
        assert!(back.context.is_none());
        assert_eq!(back.session_id, "s1");
    }

    #[test]
    fn test_search_request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"text":"tea"}"#).unwrap();
        assert_eq!(req.limit, 10);
        assert_eq!(req.offset, 0);
        assert!(req.recency.is_none());
        assert!(req.distance_threshold.is_none());
    }
}
