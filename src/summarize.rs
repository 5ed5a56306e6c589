//! Token-aware rolling summarization
//!
//! When a session's messages outgrow the summarization threshold, the older
//! prefix is folded into the rolling `context` summary and only a recent tail
//! is kept verbatim. Summarization is best-effort: an LLM failure leaves the
//! working memory untouched.

use crate::config::Settings;
use crate::llm::ModelClient;
use crate::tokens::{count_context_tokens, count_message_tokens, count_tokens};
use crate::types::MemoryMessage;

/// Result of a summarization pass
#[derive(Debug, Clone)]
pub struct SummarizeOutcome {
    pub messages: Vec<MemoryMessage>,
    pub context: Option<String>,
    /// Token count of the returned messages plus context
    pub tokens: usize,
    /// Whether a new summary was produced
    pub summarized: bool,
}

/// Split messages into a prefix to summarize and a tail to retain.
///
/// The tail is the longest suffix whose token count stays within
/// `tail_budget`.
pub fn partition_messages(
    messages: &[MemoryMessage],
    tail_budget: usize,
) -> (Vec<MemoryMessage>, Vec<MemoryMessage>) {
    let mut tail_start = messages.len();
    let mut tail_tokens = 0;

    while tail_start > 0 {
        let candidate = &messages[tail_start - 1];
        let cost = count_message_tokens(std::slice::from_ref(candidate));
        if tail_tokens + cost > tail_budget {
            break;
        }
        tail_tokens += cost;
        tail_start -= 1;
    }

    (
        messages[..tail_start].to_vec(),
        messages[tail_start..].to_vec(),
    )
}

fn summary_prompt(
    previous_context: Option<&str>,
    prefix: &[MemoryMessage],
    token_budget: usize,
) -> String {
    let mut transcript = String::new();
    for message in prefix {
        transcript.push_str(&format!("{}: {}\n", message.role, message.content));
    }
    let previous = previous_context.unwrap_or("(none)");

    format!(
        r#"Condense a conversation into a running summary.

Previous summary:
{previous}

New conversation lines:
{transcript}

Write an updated summary that folds the new lines into the previous summary.
Use the third person, keep concrete facts, names, dates, and decisions, and
stay under {token_budget} tokens. Respond with the summary text only."#,
    )
}

/// Summarize when over threshold; otherwise return the input unchanged.
///
/// Failures are swallowed after retries and the caller sees the unchanged
/// working set.
pub async fn summarize_if_needed(
    client: &dyn ModelClient,
    settings: &Settings,
    model_name: Option<&str>,
    messages: Vec<MemoryMessage>,
    context: Option<String>,
) -> SummarizeOutcome {
    let total = count_context_tokens(&messages, context.as_deref());
    let threshold = settings.summarization_threshold(model_name);

    let unchanged = |messages: Vec<MemoryMessage>, context: Option<String>| SummarizeOutcome {
        tokens: total,
        messages,
        context,
        summarized: false,
    };

    if total <= threshold || messages.is_empty() {
        return unchanged(messages, context);
    }

    let (prefix, tail) = partition_messages(&messages, settings.tail_budget(model_name));
    if prefix.is_empty() {
        return unchanged(messages, context);
    }

    let prompt = summary_prompt(
        context.as_deref(),
        &prefix,
        settings.summary_token_budget,
    );
    let model = model_name.unwrap_or(&settings.generation_model).to_string();

    let result = settings
        .retry
        .run("summarization", || {
            let prompt = prompt.clone();
            let model = model.clone();
            async move { client.create_chat_completion(&model, &prompt).await }
        })
        .await;

    match result {
        Ok(response) => {
            let summary = response.content.trim().to_string();
            if summary.is_empty() {
                tracing::warn!("summarizer returned empty text, keeping messages unchanged");
                return unchanged(messages, context);
            }
            let tokens = count_context_tokens(&tail, Some(&summary));
            tracing::info!(
                summarized = prefix.len(),
                retained = tail.len(),
                summary_tokens = count_tokens(&summary),
                "rolled conversation prefix into summary"
            );
            SummarizeOutcome {
                messages: tail,
                context: Some(summary),
                tokens,
                summarized: true,
            }
        }
        Err(err) => {
            tracing::warn!(%err, "summarization failed, keeping working memory unchanged");
            unchanged(messages, context)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MemoryError, Result};
    use crate::llm::ChatResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedClient {
        reply: Option<String>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn create_chat_completion(&self, _model: &str, _prompt: &str) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(content) => Ok(ChatResponse {
                    content: content.clone(),
                    total_tokens: 10,
                }),
                None => Err(MemoryError::Provider("unavailable".to_string())),
            }
        }

        async fn create_embedding(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(MemoryError::InvalidInput("no embeddings".to_string()))
        }

        fn supports_embedding(&self) -> bool {
            false
        }
    }

    fn small_settings() -> Settings {
        Settings {
            context_window_max: Some(40),
            retry: crate::retry::RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                factor: 1.0,
                jitter: 0.0,
            },
            ..Default::default()
        }
    }

    fn chatty_messages(n: usize) -> Vec<MemoryMessage> {
        (0..n)
            .map(|i| {
                MemoryMessage::new(
                    if i % 2 == 0 { "user" } else { "assistant" },
                    format!("message number {} with a little extra length", i),
                )
            })
            .collect()
    }

    #[test]
    fn test_partition_respects_tail_budget() {
        let messages = chatty_messages(6);
        let (prefix, tail) = partition_messages(&messages, 30);
        assert_eq!(prefix.len() + tail.len(), 6);
        assert!(count_message_tokens(&tail) <= 30);
        assert!(!prefix.is_empty());
    }

    #[test]
    fn test_partition_keeps_everything_under_budget() {
        let messages = chatty_messages(2);
        let (prefix, tail) = partition_messages(&messages, 10_000);
        assert!(prefix.is_empty());
        assert_eq!(tail.len(), 2);
    }

    #[tokio::test]
    async fn test_below_threshold_is_untouched() {
        let client = ScriptedClient::replying("should not be called");
        let settings = Settings {
            context_window_max: Some(100_000),
            ..Default::default()
        };
        let messages = chatty_messages(3);
        let outcome =
            summarize_if_needed(&client, &settings, None, messages.clone(), None).await;
        assert!(!outcome.summarized);
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overflow_produces_summary_and_tail() {
        let client = ScriptedClient::replying("User and assistant discussed several messages.");
        let settings = small_settings();
        let messages = chatty_messages(8);
        let outcome = summarize_if_needed(&client, &settings, None, messages, None).await;
        assert!(outcome.summarized);
        assert!(outcome.context.is_some());
        assert!(outcome.messages.len() < 8);
        assert!(outcome.tokens > 0);
    }

    #[tokio::test]
    async fn test_llm_failure_leaves_state_unchanged() {
        let client = ScriptedClient::failing();
        let settings = small_settings();
        let messages = chatty_messages(8);
        let outcome = summarize_if_needed(
            &client,
            &settings,
            None,
            messages.clone(),
            Some("old summary".to_string()),
        )
        .await;
        assert!(!outcome.summarized);
        assert_eq!(outcome.messages.len(), 8);
        assert_eq!(outcome.context.as_deref(), Some("old summary"));
        // retried before giving up
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }
}
