use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use ragstream_core::errors::EmbeddingError;
use ragstream_core::provider::Embedder;

use crate::config::{http_client, OllamaConfig};

/// Longer inputs are cut to this many characters before embedding.
pub const MAX_EMBED_INPUT_CHARS: usize = 2048;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Query embeddings via an Ollama-style `/api/embeddings`.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaEmbedder {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: http_client(&config),
            config,
        }
    }

    fn map_transport(&self, e: reqwest::Error) -> EmbeddingError {
        if e.is_timeout() {
            EmbeddingError::Timeout(self.config.request_timeout)
        } else {
            EmbeddingError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.config.embedding_model
    }

    #[instrument(skip_all, fields(model = %self.config.embedding_model, input_len = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let prompt = format!(
            "{}{}",
            self.config.query_instruction,
            truncate_chars(text, MAX_EMBED_INPUT_CHARS)
        );
        let body = EmbeddingRequest {
            model: &self.config.embedding_model,
            prompt: &prompt,
        };

        let response = self
            .client
            .post(&self.config.embed_url)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(self.config.request_timeout)
            } else {
                EmbeddingError::Decode(e.to_string())
            }
        })?;

        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::EmptyVector);
        }

        debug!(dimensions = parsed.embedding.len(), "query embedded");
        Ok(parsed.embedding)
    }
}

/// First `max_chars` characters of `text`, never splitting a char.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
