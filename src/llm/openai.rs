//! OpenAI chat + embedding wrapper

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ChatResponse, ModelClient};
use crate::error::{MemoryError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Embedding inputs per request, to stay under provider rate limits
const EMBEDDING_BATCH_SIZE: usize = 20;

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    chat_timeout: Duration,
    embedding_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_timeout: Duration::from_secs(30),
            embedding_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Point at an OpenAI-compatible endpoint (Azure, OpenRouter, ...)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeouts(mut self, chat: Duration, embedding: Duration) -> Self {
        self.chat_timeout = chat;
        self.embedding_timeout = embedding;
        self
    }

    async fn post_json(
        &self,
        path: &str,
        body: Value,
        timeout: Duration,
        label: &str,
    ) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_request_error(e, timeout, label))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);
            return Err(MemoryError::RateLimited(retry_after));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("OpenAI API error {}: {}", status, text);
            return if status.is_server_error() {
                Err(MemoryError::Provider(message))
            } else {
                Err(MemoryError::InvalidInput(message))
            };
        }

        response
            .json()
            .await
            .map_err(|e| MemoryError::Provider(format!("invalid OpenAI response: {}", e)))
    }
}

pub(super) fn classify_request_error(
    err: reqwest::Error,
    timeout: Duration,
    label: &str,
) -> MemoryError {
    if err.is_timeout() {
        MemoryError::Timeout(timeout.as_secs(), label.to_string())
    } else {
        MemoryError::Http(err)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn create_chat_completion(&self, model: &str, prompt: &str) -> Result<ChatResponse> {
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let data = self
            .post_json("/chat/completions", body, self.chat_timeout, "chat completion")
            .await?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                MemoryError::Provider("OpenAI response missing message content".to_string())
            })?
            .to_string();
        let total_tokens = data["usage"]["total_tokens"].as_u64().unwrap_or(0) as usize;

        Ok(ChatResponse {
            content,
            total_tokens,
        })
    }

    async fn create_embedding(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBEDDING_BATCH_SIZE) {
            let body = json!({
                "model": self.embedding_model,
                "input": chunk,
            });
            let data = self
                .post_json("/embeddings", body, self.embedding_timeout, "embedding")
                .await?;

            let items = data["data"].as_array().ok_or_else(|| {
                MemoryError::Embedding("OpenAI embedding response missing data".to_string())
            })?;
            for item in items {
                let vector: Vec<f32> = item["embedding"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default();
                if vector.is_empty() {
                    return Err(MemoryError::Embedding(
                        "OpenAI returned an empty embedding".to_string(),
                    ));
                }
                embeddings.push(vector);
            }
        }

        if embeddings.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "embedding count mismatch: {} inputs, {} vectors",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }

    fn supports_embedding(&self) -> bool {
        true
    }
}
