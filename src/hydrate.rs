//! Prompt hydration
//!
//! Combines a session's working memory with a long-term search into an
//! ordered, LLM-ready message list: summary first, then the retained
//! message tail, then relevant long-term memories, then the user's query.

use crate::error::Result;
use crate::long_term::LongTermMemoryEngine;
use crate::types::{MemoryPromptRequest, PromptMessage};
use crate::working::WorkingMemoryStore;

/// Prefix for the rolling-summary system message
const SUMMARY_PREFIX: &str = "Summary of prior conversation: ";

/// Header for the long-term memory system message
const LONG_TERM_HEADER: &str = "Long term memories related to the user's query:\n";

pub async fn hydrate(
    working: &WorkingMemoryStore,
    engine: &LongTermMemoryEngine,
    request: MemoryPromptRequest,
) -> Result<Vec<PromptMessage>> {
    let mut messages = Vec::new();

    if let Some(session) = &request.session {
        if let Some((memory, _)) = working.get(session.namespace.as_deref(), &session.session_id)
        {
            if let Some(context) = &memory.context {
                messages.push(PromptMessage::system(format!(
                    "{}{}",
                    SUMMARY_PREFIX, context
                )));
            }
            let window = session.window_size.unwrap_or(memory.messages.len());
            let skip = memory.messages.len().saturating_sub(window);
            for message in memory.messages.iter().skip(skip) {
                messages.push(PromptMessage {
                    role: message.role.clone(),
                    content: message.content.clone(),
                });
            }
        }
    }

    if let Some(mut search) = request.long_term_search {
        if search.text.is_none() {
            search.text = Some(request.query.clone());
        }
        let results = engine.search(search).await?;
        if !results.memories.is_empty() {
            let mut body = String::from(LONG_TERM_HEADER);
            for hit in &results.memories {
                body.push_str("- ");
                body.push_str(&hit.record.text);
                body.push('\n');
            }
            messages.push(PromptMessage::system(body));
        }
    }

    messages.push(PromptMessage::user(request.query));
    Ok(messages)
}
