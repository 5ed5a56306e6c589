//! Runtime settings
//!
//! Library-level knobs with serde defaults; the binaries populate these from
//! CLI flags and environment variables.

use serde::{Deserialize, Serialize};

use crate::llm::get_model_config;
use crate::rerank::RecencyConfig;
use crate::retry::RetryPolicy;

/// Service-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Message-window size `W`; sessions above this trigger summarization
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Model used for summarization, extraction, and dedup judging
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    /// Model used for embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Override the generation model's context window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_max: Option<usize>,
    /// Fraction of the context window that triggers summarization
    #[serde(default = "default_summarization_threshold_ratio")]
    pub summarization_threshold_ratio: f32,
    /// Fraction of the context window retained as the message tail
    #[serde(default = "default_tail_budget_ratio")]
    pub tail_budget_ratio: f32,
    /// Token cap for the rolling summary
    #[serde(default = "default_summary_token_budget")]
    pub summary_token_budget: usize,
    #[serde(default = "default_top_k_topics")]
    pub top_k_topics: usize,
    #[serde(default = "default_true")]
    pub enable_topic_extraction: bool,
    #[serde(default = "default_true")]
    pub enable_ner: bool,
    #[serde(default = "default_true")]
    pub enable_discrete_extraction: bool,
    /// When false, long-term endpoints reject with InvalidInput
    #[serde(default = "default_true")]
    pub long_term_enabled: bool,
    /// Max vector distance for semantic dedup candidates
    #[serde(default = "default_semantic_dedup_threshold")]
    pub semantic_dedup_threshold: f32,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_task_queue_capacity")]
    pub task_queue_capacity: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    /// Minimum spacing between access-count bumps per record
    #[serde(default = "default_access_touch_interval_secs")]
    pub access_touch_interval_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub recency: RecencyConfig,
}

fn default_window_size() -> usize {
    12
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_summarization_threshold_ratio() -> f32 {
    0.7
}

fn default_tail_budget_ratio() -> f32 {
    0.3
}

fn default_summary_token_budget() -> usize {
    512
}

fn default_top_k_topics() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_semantic_dedup_threshold() -> f32 {
    0.12
}

fn default_max_workers() -> usize {
    4
}

fn default_task_queue_capacity() -> usize {
    1024
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_embedding_timeout_secs() -> u64 {
    10
}

fn default_store_timeout_secs() -> u64 {
    5
}

fn default_access_touch_interval_secs() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("defaults are valid")
    }
}

impl Settings {
    /// Context window for a model, honoring the configured override
    pub fn context_window(&self, model_name: Option<&str>) -> usize {
        if let Some(max) = self.context_window_max {
            return max;
        }
        let name = model_name.unwrap_or(&self.generation_model);
        get_model_config(name).max_tokens
    }

    /// Token count above which summarization is scheduled
    pub fn summarization_threshold(&self, model_name: Option<&str>) -> usize {
        (self.context_window(model_name) as f32 * self.summarization_threshold_ratio) as usize
    }

    /// Token budget for the retained message tail
    pub fn tail_budget(&self, model_name: Option<&str>) -> usize {
        (self.context_window(model_name) as f32 * self.tail_budget_ratio) as usize
    }
}
