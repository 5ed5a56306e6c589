//! Service surface shared by the HTTP and tool-call transports

pub mod error;
pub mod http;

use std::sync::Arc;

use crate::config::Settings;
use crate::error::Result;
use crate::long_term::LongTermMemoryEngine;
use crate::tasks::TaskScheduler;
use crate::types::{MemoryOrigin, MemoryRecordResults, SearchRequest};
use crate::working::WorkingMemoryStore;

/// Weight of a working-memory substring hit in the combined ranking
const WORKING_WEIGHT: f32 = 0.5;
/// Weight of a long-term semantic hit in the combined ranking
const LONG_TERM_WEIGHT: f32 = 0.5;

/// Shared handles behind every transport
#[derive(Clone)]
pub struct AppState {
    pub working: Arc<WorkingMemoryStore>,
    pub engine: Arc<LongTermMemoryEngine>,
    pub scheduler: TaskScheduler,
    pub settings: Arc<Settings>,
}

/// Search working memory (substring) and long-term memory (semantic) in one
/// pass, tagging each hit's origin.
///
/// Working hits score by substring coverage, long-term hits by fused
/// semantic/recency score; the two are combined on a 0.5/0.5 weighting
/// before truncation to `limit`.
pub async fn combined_search(state: &AppState, request: SearchRequest) -> Result<MemoryRecordResults> {
    let session_filter = match &request.filters.session_id {
        Some(crate::filters::TagFilter::Eq(id)) => Some(id.clone()),
        _ => None,
    };
    let namespace_filter = match &request.filters.namespace {
        Some(crate::filters::TagFilter::Eq(ns)) => Some(ns.clone()),
        _ => None,
    };

    let working_hits = match &request.text {
        Some(text) => state.working.search_messages(
            text,
            session_filter.as_deref(),
            namespace_filter.as_deref(),
        ),
        None => vec![],
    };

    let limit = request.limit;
    let recency = request.recency.unwrap_or_default();
    let mut long_term = state.engine.search(request).await?;
    for hit in &mut long_term.memories {
        hit.origin = Some(MemoryOrigin::LongTerm);
    }

    let now = chrono::Utc::now();
    let mut merged: Vec<(crate::types::MemoryRecordResult, f32)> = Vec::new();
    for hit in working_hits {
        // dist was derived from coverage; invert it back to the match score
        let coverage = 1.0 - hit.dist / 2.0;
        merged.push((hit, WORKING_WEIGHT * coverage));
    }
    for hit in long_term.memories {
        let score = recency.score(&hit.record, hit.dist, now).final_score;
        merged.push((hit, LONG_TERM_WEIGHT * score));
    }

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let total = merged.len();
    let memories: Vec<_> = merged.into_iter().map(|(hit, _)| hit).take(limit).collect();

    Ok(MemoryRecordResults {
        memories,
        total,
        next_offset: None,
    })
}
