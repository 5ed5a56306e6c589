//! Duplicate detection and merging for long-term memories
//!
//! Two layers: a deterministic hash catches byte-identical facts in the same
//! scope, and an LLM judge merges near-duplicates surfaced by vector search.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MemoryError, Result};
use crate::llm::{extract_json, ModelClient};
use crate::types::MemoryRecord;

/// Deterministic duplicate fingerprint.
///
/// Hashes `lowercase(trim(text))` with the scoping fields, NUL-separated so
/// field boundaries cannot collide. Two records with the same hash are
/// duplicates by definition.
pub fn memory_hash(
    text: &str,
    user_id: Option<&str>,
    session_id: Option<&str>,
    namespace: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().to_lowercase().as_bytes());
    hasher.update(b"\0");
    hasher.update(user_id.unwrap_or("").as_bytes());
    hasher.update(b"\0");
    hasher.update(session_id.unwrap_or("").as_bytes());
    hasher.update(b"\0");
    hasher.update(namespace.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the hash for a record from its own fields
pub fn record_hash(record: &MemoryRecord) -> String {
    memory_hash(
        &record.text,
        record.user_id.as_deref(),
        record.session_id.as_deref(),
        record.namespace.as_deref(),
    )
}

/// Union two tag lists, preserving first-seen order
pub fn union_tags(a: &[String], b: &[String]) -> Vec<String> {
    let mut out: Vec<String> = a.to_vec();
    for tag in b {
        if !out.contains(tag) {
            out.push(tag.clone());
        }
    }
    out
}

/// Merge an incoming exact duplicate into the surviving record.
///
/// Keeps the older `created_at`, the newer `updated_at`, the newest
/// `last_accessed`; unions tags and provenance; sums `access_count`;
/// preserves `pinned` if either side is pinned. The survivor keeps its id.
pub fn merge_exact(survivor: &MemoryRecord, duplicate: &MemoryRecord) -> MemoryRecord {
    let mut merged = survivor.clone();
    merged.created_at = survivor.created_at.min(duplicate.created_at);
    merged.updated_at = survivor.updated_at.max(duplicate.updated_at);
    merged.last_accessed = survivor.last_accessed.max(duplicate.last_accessed);
    merged.topics = union_tags(&survivor.topics, &duplicate.topics);
    merged.entities = union_tags(&survivor.entities, &duplicate.entities);
    merged.extracted_from = union_tags(&survivor.extracted_from, &duplicate.extracted_from);
    merged.access_count = survivor.access_count + duplicate.access_count;
    merged.pinned = survivor.pinned || duplicate.pinned;
    merged
}

/// LLM verdict on a near-duplicate pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateJudgment {
    pub duplicate: bool,
    #[serde(default)]
    pub merged_text: Option<String>,
}

const JUDGE_ATTEMPTS: usize = 3;

fn judge_prompt(existing: &MemoryRecord, candidate: &MemoryRecord) -> String {
    format!(
        r#"You maintain a store of discrete facts about a user. Two stored facts
look similar. Decide whether they state the same information.

Fact A (stored {a_created}): {a_text}
Fact B (stored {b_created}): {b_text}

If they are the same fact, produce a single merged sentence that keeps every
detail from both. If they differ in any meaningful way, they are not
duplicates.

Answer with JSON only:
{{"duplicate": true, "merged_text": "..."}}
or
{{"duplicate": false}}"#,
        a_created = existing.created_at.format("%Y-%m-%d"),
        a_text = existing.text,
        b_created = candidate.created_at.format("%Y-%m-%d"),
        b_text = candidate.text,
    )
}

/// Ask the LLM whether two near-duplicate records should merge.
///
/// Malformed JSON is retried a few times; a persistently bad response is
/// surfaced as a provider error so the caller can fall back to indexing
/// without a merge.
pub async fn judge_semantic_duplicate(
    client: &dyn ModelClient,
    model: &str,
    existing: &MemoryRecord,
    candidate: &MemoryRecord,
) -> Result<DuplicateJudgment> {
    let prompt = judge_prompt(existing, candidate);
    let mut last_err = None;

    for _ in 0..JUDGE_ATTEMPTS {
        let response = client.create_chat_completion(model, &prompt).await?;
        match extract_json::<DuplicateJudgment>(&response.content) {
            Ok(judgment) => {
                if judgment.duplicate && judgment.merged_text.is_none() {
                    last_err = Some(MemoryError::Provider(
                        "duplicate verdict without merged_text".to_string(),
                    ));
                    continue;
                }
                return Ok(judgment);
            }
            Err(err) => {
                tracing::warn!(%err, "dedup judge returned malformed JSON, retrying");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| MemoryError::Provider("dedup judge failed".to_string())))
}

/// Build the merged record that replaces a semantically-duplicate pair.
///
/// The merged record gets a fresh identity elsewhere; here the field rules
/// are the same unions as the exact merge, `created_at = min`,
/// `updated_at = now`, and the judge's merged text.
pub fn merge_semantic(
    existing: &MemoryRecord,
    candidate: &MemoryRecord,
    merged_text: String,
) -> MemoryRecord {
    let mut merged = merge_exact(existing, candidate);
    merged.text = merged_text;
    merged.updated_at = Utc::now();
    merged.memory_hash = None;
    merged.persisted_at = None;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(text: &str) -> MemoryRecord {
        let mut r = MemoryRecord::new(text);
        r.user_id = Some("u1".to_string());
        r
    }

    #[test]
    fn test_hash_is_pure() {
        let a = memory_hash("User likes tea", Some("u1"), None, Some("ns"));
        let b = memory_hash("User likes tea", Some("u1"), None, Some("ns"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_normalizes_text() {
        let a = memory_hash("  User likes tea ", None, None, None);
        let b = memory_hash("user LIKES tea", None, None, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_distinguishes_scope() {
        let a = memory_hash("User likes tea", Some("u1"), None, None);
        let b = memory_hash("User likes tea", Some("u2"), None, None);
        assert_ne!(a, b);

        // field boundaries must not collide
        let c = memory_hash("User likes tea", Some("ab"), Some(""), None);
        let d = memory_hash("User likes tea", Some("a"), Some("b"), None);
        assert_ne!(c, d);
    }

    #[test]
    fn test_exact_merge_rules() {
        let mut older = record("User likes tea");
        older.topics = vec!["beverages".to_string()];
        older.access_count = 2;
        older.created_at = Utc::now() - Duration::days(10);
        older.updated_at = older.created_at;
        older.last_accessed = older.created_at;

        let mut newer = record("User likes tea");
        newer.topics = vec!["beverages".to_string(), "preferences".to_string()];
        newer.entities = vec!["tea".to_string()];
        newer.access_count = 1;
        newer.pinned = true;
        newer.extracted_from = vec!["msg-1".to_string()];

        let merged = merge_exact(&older, &newer);
        assert_eq!(merged.id, older.id);
        assert_eq!(merged.created_at, older.created_at);
        assert_eq!(merged.updated_at, newer.updated_at);
        assert_eq!(merged.last_accessed, newer.last_accessed);
        assert_eq!(merged.access_count, 3);
        assert!(merged.pinned);
        assert_eq!(
            merged.topics,
            vec!["beverages".to_string(), "preferences".to_string()]
        );
        assert_eq!(merged.entities, vec!["tea".to_string()]);
        assert_eq!(merged.extracted_from, vec!["msg-1".to_string()]);
    }

    #[test]
    fn test_semantic_merge_resets_identity_fields() {
        let a = record("User prefers dark mode");
        let b = record("The user likes dark mode");
        let merged = merge_semantic(&a, &b, "User prefers dark mode".to_string());
        assert_eq!(merged.text, "User prefers dark mode");
        assert!(merged.memory_hash.is_none());
        assert!(merged.persisted_at.is_none());
        assert_eq!(merged.created_at, a.created_at.min(b.created_at));
    }

    #[test]
    fn test_union_preserves_order() {
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["y".to_string(), "z".to_string()];
        assert_eq!(
            union_tags(&a, &b),
            vec!["x".to_string(), "y".to_string(), "z".to_string()]
        );
    }
}
