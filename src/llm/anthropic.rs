//! Anthropic chat wrapper
//!
//! Anthropic offers no embedding API; `create_embedding` always fails and
//! the registry refuses to route embeddings here.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::openai::classify_request_error;
use super::{ChatResponse, ModelClient};
use crate::error::{MemoryError, Result};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    chat_timeout: Duration,
    max_output_tokens: usize,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            chat_timeout: Duration::from_secs(30),
            max_output_tokens: 1024,
        }
    }

    pub fn with_timeout(mut self, chat: Duration) -> Self {
        self.chat_timeout = chat;
        self
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn create_chat_completion(&self, model: &str, prompt: &str) -> Result<ChatResponse> {
        let body = json!({
            "model": model,
            "max_tokens": self.max_output_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(self.chat_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_request_error(e, self.chat_timeout, "chat completion"))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MemoryError::RateLimited(30));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("Anthropic API error {}: {}", status, text);
            return if status.is_server_error() {
                Err(MemoryError::Provider(message))
            } else {
                Err(MemoryError::InvalidInput(message))
            };
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MemoryError::Provider(format!("invalid Anthropic response: {}", e)))?;

        let content = data["content"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                MemoryError::Provider("Anthropic response missing text content".to_string())
            })?
            .to_string();
        let input_tokens = data["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let output_tokens = data["usage"]["output_tokens"].as_u64().unwrap_or(0);

        Ok(ChatResponse {
            content,
            total_tokens: (input_tokens + output_tokens) as usize,
        })
    }

    async fn create_embedding(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(MemoryError::InvalidInput(
            "Anthropic does not provide an embedding API".to_string(),
        ))
    }

    fn supports_embedding(&self) -> bool {
        false
    }
}
