//! Topic, entity, and discrete memory extraction
//!
//! Tagging is pluggable: a topic-model backend returning top-K labels or an
//! LLM prompted for JSON, plus a named-entity model whose subword
//! continuations (`##`-prefixed tokens) merge into the preceding entity.
//! Discrete extraction turns raw conversation messages into grounded
//! episodic/semantic facts.
//!
//! Model handles are process-wide, initialized once, and treated as
//! read-only afterwards.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::Deserialize;
use tracing::instrument;

use crate::config::Settings;
use crate::error::{MemoryError, Result};
use crate::llm::{extract_json, ModelClient};
use crate::types::{ExtractedFlag, MemoryRecord, MemoryRecordType};

/// Marker prefix for subword continuation tokens emitted by NER backends
pub const SUBWORD_MARKER: &str = "##";

const JSON_ATTEMPTS: usize = 3;

/// A token emitted by a named-entity backend
#[derive(Debug, Clone)]
pub struct NerToken {
    pub word: String,
}

/// Topic-model backend returning top-K topic labels
pub trait TopicModel: Send + Sync {
    fn top_topics(&self, text: &str, k: usize) -> Vec<String>;
}

/// Named-entity backend returning entity tokens in reading order
pub trait NerModel: Send + Sync {
    fn entity_tokens(&self, text: &str) -> Vec<NerToken>;
}

static TOPIC_MODEL: OnceCell<Arc<dyn TopicModel>> = OnceCell::new();
static NER_MODEL: OnceCell<Arc<dyn NerModel>> = OnceCell::new();

/// Install a topic-model backend; returns false if one is already set
pub fn set_topic_model(model: Arc<dyn TopicModel>) -> bool {
    TOPIC_MODEL.set(model).is_ok()
}

/// Install an NER backend; returns false if one is already set
pub fn set_ner_model(model: Arc<dyn NerModel>) -> bool {
    NER_MODEL.set(model).is_ok()
}

fn topic_model() -> Option<&'static Arc<dyn TopicModel>> {
    TOPIC_MODEL.get()
}

fn ner_model() -> &'static Arc<dyn NerModel> {
    NER_MODEL.get_or_init(|| Arc::new(HeuristicNer))
}

/// Capitalized multi-word names ("Trek 520", "San Francisco")
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z0-9]*(?:\s+[A-Z0-9][a-zA-Z0-9]*)*)\b").expect("valid regex")
});

static PRONOUN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(he|she|they|him|her|them|his|hers|theirs)\b").expect("valid regex")
});

/// Regex-based fallback NER used when no model backend is installed.
///
/// Emits capitalized name runs as whole tokens; good enough for tagging and
/// for exercising the merge pipeline without a model download.
pub struct HeuristicNer;

impl NerModel for HeuristicNer {
    fn entity_tokens(&self, text: &str) -> Vec<NerToken> {
        NAME_PATTERN
            .captures_iter(text)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|w| w.len() > 1)
            .map(|word| NerToken { word })
            .collect()
    }
}

/// Merge subword continuation tokens into their preceding entity.
///
/// `["New", "##found", "##land", "Paris"]` becomes `["Newfoundland", "Paris"]`.
pub fn merge_subword_tokens(tokens: &[NerToken]) -> Vec<String> {
    let mut entities = Vec::new();
    let mut current: Option<String> = None;

    for token in tokens {
        if let Some(rest) = token.word.strip_prefix(SUBWORD_MARKER) {
            if let Some(entity) = current.as_mut() {
                entity.push_str(rest);
                continue;
            }
            // continuation with no head: treat the remainder as a new entity
            current = Some(rest.to_string());
        } else {
            if let Some(entity) = current.take() {
                entities.push(entity);
            }
            current = Some(token.word.clone());
        }
    }
    if let Some(entity) = current {
        entities.push(entity);
    }
    entities
}

fn dedup_sorted(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Extract named entities from text
#[instrument(skip_all, fields(text_len = text.len()))]
pub fn extract_entities(text: &str) -> Vec<String> {
    let tokens = ner_model().entity_tokens(text);
    dedup_sorted(merge_subword_tokens(&tokens))
}

#[derive(Deserialize)]
struct TopicsPayload {
    topics: Vec<String>,
}

fn topics_prompt(text: &str, k: usize) -> String {
    format!(
        r#"Identify up to {k} topics covered by the following text:
{text}

Respond with JSON only, for example:
{{"topics": ["topic1", "topic2"]}}"#,
    )
}

/// Extract topics via the generation model
pub async fn extract_topics_llm(
    client: &dyn ModelClient,
    model: &str,
    text: &str,
    k: usize,
) -> Result<Vec<String>> {
    let prompt = topics_prompt(text, k);
    let mut last_err = None;

    for _ in 0..JSON_ATTEMPTS {
        let response = client.create_chat_completion(model, &prompt).await?;
        match extract_json::<TopicsPayload>(&response.content) {
            Ok(payload) => {
                let mut topics = payload.topics;
                topics.truncate(k);
                return Ok(topics);
            }
            Err(err) => {
                tracing::warn!(%err, "topic extraction returned malformed JSON, retrying");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| MemoryError::Internal("topic extraction failed".to_string())))
}

/// Handle topic and entity extraction for a text.
///
/// Topics come from the installed topic model when present, otherwise from
/// the LLM. Both lists come back deduplicated and order-insensitive.
pub async fn handle_extraction(
    client: &dyn ModelClient,
    settings: &Settings,
    text: &str,
) -> Result<(Vec<String>, Vec<String>)> {
    let topics = if settings.enable_topic_extraction {
        match topic_model() {
            Some(model) => model.top_topics(text, settings.top_k_topics),
            None => {
                extract_topics_llm(
                    client,
                    &settings.generation_model,
                    text,
                    settings.top_k_topics,
                )
                .await?
            }
        }
    } else {
        vec![]
    };

    let entities = if settings.enable_ner {
        extract_entities(text)
    } else {
        vec![]
    };

    Ok((dedup_sorted(topics), entities))
}

/// True when text still carries a third-person pronoun that grounding
/// should have replaced
pub fn has_ungrounded_pronouns(text: &str) -> bool {
    PRONOUN_PATTERN.is_match(text)
}

#[derive(Deserialize)]
struct DiscreteMemoriesPayload {
    memories: Vec<DiscreteMemoryPayload>,
}

#[derive(Deserialize)]
struct DiscreteMemoryPayload {
    #[serde(rename = "type", default)]
    memory_type: Option<String>,
    text: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    entities: Vec<String>,
}

fn discrete_extraction_prompt(message: &str, now: DateTime<Utc>, top_k_topics: usize) -> String {
    let current_datetime = now.format("%A, %B %d, %Y at %I:%M %p UTC");
    format!(
        r#"You curate the long-term memory of an assistant. Read the message below
and pull out information worth keeping for future conversations.

Current date and time: {current_datetime}

Two kinds of memories exist:
1. "episodic" - a dated experience tied to a person.
   Example: "User visited Lisbon in October 2024"
2. "semantic" - a preference or piece of world knowledge you did not already
   know. Example: "User prefers window seats"

Every memory must stand on its own with no conversational context:
- Replace every pronoun (he, she, they, him, her, them, his, hers, theirs)
  with the person it refers to. The application user is always written as
  "User", never by a given name.
  "He loves coffee" -> "User loves coffee" (when "he" is the user)
  "My name is Alice and I prefer tea" -> "User prefers tea"
- Resolve relative times against the current date above.
  "yesterday" -> the concrete date; "last summer" -> the concrete season and
  year; "three months ago" -> the concrete month and year.
- Resolve place words like "there", "here", "that place" to the actual
  location.
- Resolve definite references like "the meeting" to the specific thing they
  name.
- If a reference cannot be resolved, drop that memory or write "someone"
  rather than leaving a pronoun.

Skip information you already know, procedural instructions, and anything
with no value for future conversations.

Respond with JSON only:
{{
    "memories": [
        {{
            "type": "semantic",
            "text": "User prefers window seats",
            "topics": ["travel"],
            "entities": ["User", "window seat"]
        }}
    ]
}}
Give each memory at most {top_k_topics} topics. Return {{"memories": []}}
when nothing is worth keeping.

Message:
{message}"#,
    )
}

/// Extract grounded episodic/semantic facts from a `message`-type record.
///
/// Output records inherit the source's scope, reference it through
/// `extracted_from`, and are marked extracted so they never loop back
/// through this pipeline.
pub async fn extract_discrete(
    client: &dyn ModelClient,
    settings: &Settings,
    source: &MemoryRecord,
) -> Result<Vec<MemoryRecord>> {
    let prompt = discrete_extraction_prompt(&source.text, Utc::now(), settings.top_k_topics);
    let mut last_err = None;

    for _ in 0..JSON_ATTEMPTS {
        let response = client
            .create_chat_completion(&settings.generation_model, &prompt)
            .await?;
        match extract_json::<DiscreteMemoriesPayload>(&response.content) {
            Ok(payload) => {
                let records = payload
                    .memories
                    .into_iter()
                    .filter(|m| !m.text.trim().is_empty())
                    .map(|m| {
                        if has_ungrounded_pronouns(&m.text) {
                            tracing::warn!(text = %m.text, "extracted memory still carries a pronoun");
                        }
                        let mut record = MemoryRecord::new(m.text);
                        record.memory_type = m
                            .memory_type
                            .as_deref()
                            .and_then(|t| t.parse::<MemoryRecordType>().ok())
                            .unwrap_or(MemoryRecordType::Episodic);
                        record.topics = dedup_sorted(m.topics);
                        record.entities = dedup_sorted(m.entities);
                        record.session_id = source.session_id.clone();
                        record.user_id = source.user_id.clone();
                        record.namespace = source.namespace.clone();
                        record.extracted_from = vec![source.id.clone()];
                        record.discrete_memory_extracted = ExtractedFlag::Extracted;
                        record
                    })
                    .collect();
                return Ok(records);
            }
            Err(err) => {
                tracing::warn!(%err, "discrete extraction returned malformed JSON, retrying");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| MemoryError::Internal("discrete extraction failed".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<NerToken> {
        words
            .iter()
            .map(|w| NerToken {
                word: w.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_subword_merge() {
        let merged = merge_subword_tokens(&tokens(&["New", "##found", "##land", "Paris"]));
        assert_eq!(merged, vec!["Newfoundland".to_string(), "Paris".to_string()]);
    }

    #[test]
    fn test_subword_merge_without_head() {
        let merged = merge_subword_tokens(&tokens(&["##land", "Paris"]));
        assert_eq!(merged, vec!["land".to_string(), "Paris".to_string()]);
    }

    #[test]
    fn test_subword_merge_empty() {
        assert!(merge_subword_tokens(&[]).is_empty());
    }

    #[test]
    fn test_heuristic_ner_finds_names() {
        let entities = extract_entities("User rode the Trek 520 through San Francisco");
        assert!(entities.iter().any(|e| e.contains("Trek")));
        assert!(entities.iter().any(|e| e.contains("San Francisco")));
    }

    #[test]
    fn test_entities_are_deduplicated() {
        let entities = extract_entities("Paris is lovely. Paris in spring, Paris always.");
        assert_eq!(entities.iter().filter(|e| *e == "Paris").count(), 1);
    }

    #[test]
    fn test_pronoun_detection() {
        assert!(has_ungrounded_pronouns("She went there last summer"));
        assert!(has_ungrounded_pronouns("tell them about it"));
        assert!(!has_ungrounded_pronouns("User visited Paris in summer 2024"));
        // "the" and "theme" must not match "he"/"them"
        assert!(!has_ungrounded_pronouns("the theme of the party"));
    }

    #[test]
    fn test_prompt_carries_datetime_and_topic_budget() {
        let now = Utc::now();
        let prompt = discrete_extraction_prompt("I love Paris", now, 3);
        assert!(prompt.contains("I love Paris"));
        assert!(prompt.contains(&now.format("%Y").to_string()));
        assert!(prompt.contains("at most 3 topics"));
    }
}
