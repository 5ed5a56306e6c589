//! Provider-agnostic model clients
//!
//! Chat completion and embedding are dispatched by model name through a
//! registry of named model configurations. Providers that cannot embed
//! declare so, and the registry refuses to configure them as the embedding
//! model.

mod anthropic;
mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{MemoryError, Result};

/// Type of model provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    OpenAi,
    Anthropic,
}

/// Configuration for a named model
#[derive(Debug, Clone, Serialize)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub name: &'static str,
    /// Context window in tokens
    pub max_tokens: usize,
    pub embedding_dimensions: usize,
}

macro_rules! model {
    ($provider:expr, $name:literal, $max:expr, $dims:expr) => {
        (
            $name,
            ModelConfig {
                provider: $provider,
                name: $name,
                max_tokens: $max,
                embedding_dimensions: $dims,
            },
        )
    };
}

static MODEL_CONFIGS: Lazy<HashMap<&'static str, ModelConfig>> = Lazy::new(|| {
    use ModelProvider::{Anthropic, OpenAi};
    HashMap::from([
        model!(OpenAi, "gpt-3.5-turbo", 4096, 1536),
        model!(OpenAi, "gpt-3.5-turbo-16k", 16384, 1536),
        model!(OpenAi, "gpt-4", 8192, 1536),
        model!(OpenAi, "gpt-4-32k", 32768, 1536),
        model!(OpenAi, "gpt-4o", 128_000, 1536),
        model!(OpenAi, "gpt-4o-mini", 128_000, 1536),
        model!(OpenAi, "o1", 200_000, 1536),
        model!(OpenAi, "o1-mini", 128_000, 1536),
        model!(OpenAi, "o3-mini", 200_000, 1536),
        model!(OpenAi, "text-embedding-ada-002", 8191, 1536),
        model!(OpenAi, "text-embedding-3-small", 8191, 1536),
        model!(OpenAi, "text-embedding-3-large", 8191, 3072),
        model!(Anthropic, "claude-3-opus-20240229", 200_000, 1536),
        model!(Anthropic, "claude-3-5-sonnet-20241022", 200_000, 1536),
        model!(Anthropic, "claude-3-5-haiku-20241022", 200_000, 1536),
        model!(Anthropic, "claude-3-7-sonnet-20250219", 200_000, 1536),
        model!(Anthropic, "claude-3-5-sonnet-latest", 200_000, 1536),
        model!(Anthropic, "claude-3-5-haiku-latest", 200_000, 1536),
        model!(Anthropic, "claude-3-opus-latest", 200_000, 1536),
    ])
});

/// Get configuration for a model, falling back to gpt-4o-mini for unknown names
pub fn get_model_config(model_name: &str) -> &'static ModelConfig {
    MODEL_CONFIGS.get(model_name).unwrap_or_else(|| {
        tracing::warn!(model = model_name, "model not in registry, using gpt-4o-mini");
        &MODEL_CONFIGS["gpt-4o-mini"]
    })
}

/// True when the model name is present in the registry
pub fn is_known_model(model_name: &str) -> bool {
    MODEL_CONFIGS.contains_key(model_name)
}

/// Unified chat completion response
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub total_tokens: usize,
}

/// Parse a JSON object out of a chat completion.
///
/// Models sometimes wrap the payload in code fences or prose; fall back to
/// the outermost brace span before giving up.
pub fn extract_json<T: serde::de::DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(MemoryError::InvalidInput(format!(
        "model response is not valid JSON: {}",
        truncate_for_log(trimmed, 200)
    )))
}

fn truncate_for_log(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Capability interface for chat completion and embedding providers
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run a single-turn chat completion
    async fn create_chat_completion(&self, model: &str, prompt: &str) -> Result<ChatResponse>;

    /// Embed a batch of texts, one vector per input
    async fn create_embedding(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn supports_embedding(&self) -> bool;
}

/// Routes chat and embedding calls to the provider that owns the model name
pub struct ModelRegistry {
    embedding_model: String,
    openai: Option<OpenAiClient>,
    anthropic: Option<AnthropicClient>,
}

impl ModelRegistry {
    pub fn new(
        settings: &Settings,
        openai: Option<OpenAiClient>,
        anthropic: Option<AnthropicClient>,
    ) -> Result<Self> {
        let embedding_config = get_model_config(&settings.embedding_model);
        if embedding_config.provider != ModelProvider::OpenAi {
            return Err(MemoryError::Config(format!(
                "model {} cannot be used for embeddings: provider has no embedding API",
                settings.embedding_model
            )));
        }
        Ok(Self {
            embedding_model: settings.embedding_model.clone(),
            openai,
            anthropic,
        })
    }

    fn client_for(&self, model: &str) -> Result<&dyn ModelClient> {
        match get_model_config(model).provider {
            ModelProvider::OpenAi => self
                .openai
                .as_ref()
                .map(|c| c as &dyn ModelClient)
                .ok_or_else(|| MemoryError::Config("OpenAI client not configured".to_string())),
            ModelProvider::Anthropic => self
                .anthropic
                .as_ref()
                .map(|c| c as &dyn ModelClient)
                .ok_or_else(|| {
                    MemoryError::Config("Anthropic client not configured".to_string())
                }),
        }
    }
}

#[async_trait]
impl ModelClient for ModelRegistry {
    async fn create_chat_completion(&self, model: &str, prompt: &str) -> Result<ChatResponse> {
        self.client_for(model)?
            .create_chat_completion(model, prompt)
            .await
    }

    async fn create_embedding(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.client_for(&self.embedding_model)?
            .create_embedding(texts)
            .await
    }

    fn supports_embedding(&self) -> bool {
        self.openai.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let config = get_model_config("gpt-4o");
        assert_eq!(config.provider, ModelProvider::OpenAi);
        assert_eq!(config.max_tokens, 128_000);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let config = get_model_config("not-a-real-model");
        assert_eq!(config.name, "gpt-4o-mini");
        assert!(!is_known_model("not-a-real-model"));
    }

    #[test]
    fn test_extract_json_handles_fences_and_prose() {
        #[derive(serde::Deserialize)]
        struct Payload {
            topics: Vec<String>,
        }

        let direct: Payload = extract_json(r#"{"topics": ["travel"]}"#).unwrap();
        assert_eq!(direct.topics, vec!["travel"]);

        let fenced: Payload =
            extract_json("```json\n{\"topics\": [\"travel\"]}\n```").unwrap();
        assert_eq!(fenced.topics, vec!["travel"]);

        let prose: Payload =
            extract_json("Here you go: {\"topics\": [\"travel\"]} hope that helps").unwrap();
        assert_eq!(prose.topics, vec!["travel"]);

        assert!(extract_json::<Payload>("no json here").is_err());
    }

    #[test]
    fn test_anthropic_rejected_as_embedding_model() {
        let settings = Settings {
            embedding_model: "claude-3-5-sonnet-latest".to_string(),
            ..Default::default()
        };
        let result = ModelRegistry::new(&settings, None, None);
        assert!(matches!(result, Err(MemoryError::Config(_))));
    }
}
