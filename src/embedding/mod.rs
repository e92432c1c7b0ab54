//! Embedding provider abstraction and implementations.
//!
//! This module defines the port through which chunk texts and sub-questions
//! are turned into vectors, and provides two production implementations:
//!
//! - [`fastembed::FastEmbedProvider`]: local ONNX model, no network access
//! - [`openai::OpenAIEmbedding`]: any OpenAI-compatible `/embeddings` endpoint
//!
//! The indexer calls [`EmbeddingProvider::embed_batch`] in fixed-size groups;
//! the retriever calls [`EmbeddingProvider::embed`] once per sub-question.
//! Both sides must pass text through [`normalize_text`] first so that stored
//! and query vectors live in the same space.

pub mod fastembed;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Network or API communication error
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Invalid input text (e.g., empty, too long)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The provider did not answer within the configured deadline
    #[error("Embedding request timed out after {0}s")]
    Timeout(u64),

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl EmbeddingError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::ApiError(_) | EmbeddingError::Timeout(_))
    }
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors of this trait can generate vector embeddings from text inputs.
/// The trait is async to support API-based embedding services.
///
/// # Example Usage
/// ```ignore
/// let provider = FastEmbedProvider::new(None, None)?;
/// let text = normalize_text("How is the encoder pretrained?");
/// let embedding = provider.embed(&text).await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Arguments
    /// * `text` - The input text to embed (should be pre-normalized)
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts in a single request.
    ///
    /// # Arguments
    /// * `texts` - Slice of text inputs to embed
    ///
    /// # Returns
    /// A vector of embedding vectors, in the same order as the input texts
    ///
    /// # Errors
    /// Returns `EmbeddingError` if any embedding generation fails
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Get the dimension of embeddings produced by this provider.
    fn dimension(&self) -> usize;

    /// Get the model name/identifier for this provider.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        (**self).embed_batch(texts).await
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Wrapper enum over the production providers, selected from configuration.
pub enum AnyEmbeddingProvider {
    FastEmbed(fastembed::FastEmbedProvider),
    OpenAI(openai::OpenAIEmbedding),
}

#[async_trait]
impl EmbeddingProvider for AnyEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            AnyEmbeddingProvider::FastEmbed(p) => p.embed(text).await,
            AnyEmbeddingProvider::OpenAI(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            AnyEmbeddingProvider::FastEmbed(p) => p.embed_batch(texts).await,
            AnyEmbeddingProvider::OpenAI(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            AnyEmbeddingProvider::FastEmbed(p) => p.dimension(),
            AnyEmbeddingProvider::OpenAI(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            AnyEmbeddingProvider::FastEmbed(p) => p.model_name(),
            AnyEmbeddingProvider::OpenAI(p) => p.model_name(),
        }
    }
}

/// Normalizes text for consistent embedding generation.
///
/// This function applies the following transformations:
/// - Converts to lowercase
/// - Trims leading/trailing whitespace
/// - Collapses runs of whitespace (including newlines) to a single space
///
/// # Example
/// ```ignore
/// let normalized = normalize_text("  Hello   World  ");
/// assert_eq!(normalized, "hello world");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("Hello World"), "hello world");
        assert_eq!(normalize_text("  Multiple   Spaces  "), "multiple spaces");
        assert_eq!(normalize_text("Methods\n\nTable 2"), "methods table 2");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_transient_classification() {
        assert!(EmbeddingError::ApiError("503".into()).is_transient());
        assert!(EmbeddingError::Timeout(30).is_transient());
        assert!(!EmbeddingError::InvalidInput("empty".into()).is_transient());
        assert!(!EmbeddingError::ConfigError("no key".into()).is_transient());
    }
}
