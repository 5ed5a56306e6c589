//! Token counting for context budgeting
//!
//! Uses the cl100k tokenizer when it loads; falls back to a chars/4 estimate
//! otherwise so token math never fails a request.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

use crate::types::MemoryMessage;

static ENCODER: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(err) => {
        tracing::warn!(%err, "tokenizer unavailable, falling back to chars/4 estimate");
        None
    }
});

/// Count tokens in a text
pub fn count_tokens(text: &str) -> usize {
    match ENCODER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate_tokens(text),
    }
}

/// chars/4 fallback estimate, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Count tokens across messages, including a small per-message overhead
/// for role framing.
pub fn count_message_tokens(messages: &[MemoryMessage]) -> usize {
    messages
        .iter()
        .map(|m| count_tokens(&m.content) + count_tokens(&m.role) + 3)
        .sum()
}

/// Tokens used by messages plus an optional rolling summary
pub fn count_context_tokens(messages: &[MemoryMessage], context: Option<&str>) -> usize {
    count_message_tokens(messages) + context.map(count_tokens).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_count_tokens_nonzero_for_text() {
        assert!(count_tokens("Hello, how are you today?") > 0);
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_message_tokens_include_role_overhead() {
        let messages = vec![MemoryMessage::new("user", "hi")];
        let bare = count_tokens("hi");
        assert!(count_message_tokens(&messages) > bare);
    }

    #[test]
    fn test_context_adds_summary_tokens() {
        let messages = vec![MemoryMessage::new("user", "hi")];
        let without = count_context_tokens(&messages, None);
        let with = count_context_tokens(&messages, Some("a prior summary"));
        assert!(with > without);
    }
}
