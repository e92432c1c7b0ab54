//! Language-model inference port.
//!
//! All three agent roles (decomposer, analyzer, synthesizer) talk to the
//! model through [`InferenceProvider::generate`] with role-specific prompts.
//! The backend is a single shared resource that typically serializes
//! requests; callers bound their own concurrency.

pub mod openai_compat;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during text generation.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Network or API communication error
    #[error("Inference request failed: {0}")]
    ApiError(String),

    /// The backend is not reachable at all
    #[error("Inference backend unreachable: {0}")]
    Unavailable(String),

    /// Backend rejected the request configuration (auth, unknown model)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The backend did not answer within the configured deadline
    #[error("Inference request timed out after {0}s")]
    Timeout(u64),

    /// The response body did not have the expected shape
    #[error("Invalid inference response: {0}")]
    InvalidResponse(String),
}

impl InferenceError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::ApiError(_) | InferenceError::Unavailable(_) | InferenceError::Timeout(_)
        )
    }
}

/// Result type for inference operations.
pub type InferenceResult<T> = Result<T, InferenceError>;

/// One generation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    /// Role instructions
    pub system: String,

    /// User-turn content
    pub prompt: String,

    pub max_tokens: u32,
    pub temperature: f32,

    /// Ask the backend for a JSON object response when it supports it
    #[serde(default)]
    pub json_output: bool,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 512,
            temperature: 0.2,
            json_output: false,
        }
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Trait for text generation backends.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Generate a completion for the request.
    ///
    /// # Errors
    /// Returns `InferenceError` if the backend call fails
    async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String>;

    /// Cheap reachability check used by health checks.
    async fn ping(&self) -> InferenceResult<()>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: InferenceProvider + ?Sized> InferenceProvider for Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String> {
        (**self).generate(request).await
    }

    async fn ping(&self) -> InferenceResult<()> {
        (**self).ping().await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Extract the first JSON object embedded in model output.
///
/// Models often wrap JSON in prose or markdown fences; this returns the
/// slice from the first `{` to its matching `}` (string-aware), or `None`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
