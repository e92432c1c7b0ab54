//! OpenAI-compatible embedding provider implementation.
//!
//! This module implements the `EmbeddingProvider` trait against any endpoint
//! that speaks the OpenAI `/embeddings` format (OpenAI, vLLM, Ollama,
//! LM Studio).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// Default model when none is configured.
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// OpenAI embedding provider configuration.
///
/// This struct holds the configuration needed to connect to the embeddings
/// API and generate vectors for chunk texts and sub-questions.
#[derive(Debug, Clone)]
pub struct OpenAIEmbedding {
    client: Client,

    /// API root, e.g. `https://api.openai.com/v1`
    base_url: String,

    /// Bearer token; local servers accept requests without one
    api_key: Option<String>,

    /// Model identifier (e.g., "text-embedding-3-small")
    model: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,

    /// Per-request deadline
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedding {
    /// Create a new OpenAI-compatible embedding provider.
    ///
    /// # Arguments
    /// * `base_url` - API root (defaults to the public OpenAI endpoint if None)
    /// * `api_key` - Optional bearer token
    /// * `model` - Model name (defaults to "text-embedding-3-small" if None)
    /// * `timeout_secs` - Per-request timeout
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
        model: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let embedding_dimension = match model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            "nomic-embed-text" => 768,
            "bge-base-en-v1.5" | "BAAI/bge-base-en-v1.5" => 768,
            _ => 1536,
        };

        Self {
            client: Client::new(),
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model,
            embedding_dimension,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Override the dimension for models not in the built-in table.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    async fn request(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        debug!(url = %url, model = %self.model, inputs = texts.len(), "Sending embedding request");

        let mut request = self.client.post(&url).timeout(self.timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(self.timeout.as_secs())
            } else {
                EmbeddingError::ApiError(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EmbeddingError::ConfigError(
                "Embedding endpoint rejected the API key".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Other(format!("Invalid embedding response: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::Other(format!(
                "Expected {} embeddings, received {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }
        self.request(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_table() {
        let small = OpenAIEmbedding::new(None, None, None, 30);
        assert_eq!(small.model_name(), "text-embedding-3-small");
        assert_eq!(small.dimension(), 1536);

        let large = OpenAIEmbedding::new(None, None, Some("text-embedding-3-large".into()), 30);
        assert_eq!(large.dimension(), 3072);

        let custom = OpenAIEmbedding::new(None, None, Some("my-model".into()), 30).with_dimension(256);
        assert_eq!(custom.dimension(), 256);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let provider = OpenAIEmbedding::new(Some("http://localhost:8000/v1/".into()), None, None, 30);
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
    }

    #[tokio::test]
    async fn test_empty_inputs_rejected_before_network() {
        let provider = OpenAIEmbedding::new(Some("http://127.0.0.1:9".into()), None, None, 1);
        assert!(matches!(provider.embed("  ").await, Err(EmbeddingError::InvalidInput(_))));
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
        assert!(matches!(
            provider.embed_batch(&["ok", ""]).await,
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
