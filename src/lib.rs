//! Mnemon - Conversational Memory Service
//!
//! Per-session working memory with rolling summarization, plus a searchable
//! long-term memory of extracted facts with dedup and recency-aware ranking.

pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extraction;
pub mod filters;
pub mod hydrate;
pub mod llm;
pub mod long_term;
pub mod mcp;
pub mod rerank;
pub mod retry;
pub mod store;
pub mod summarize;
pub mod tasks;
pub mod tokens;
pub mod types;
pub mod working;

pub use error::{MemoryError, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
