//! OpenAI-compatible chat completions client.
//!
//! Works against vLLM, Ollama, LM Studio and OpenAI itself: anything that
//! serves `POST {base_url}/chat/completions` and `GET {base_url}/models`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{GenerationRequest, InferenceError, InferenceProvider, InferenceResult};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";

#[derive(Debug, Clone)]
pub struct OpenAICompatInference {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAICompatInference {
    /// Create a client.
    ///
    /// # Arguments
    /// * `base_url` - API root (defaults to a local vLLM server if None)
    /// * `api_key` - Optional bearer token; local servers accept none
    /// * `model` - Served model name
    /// * `timeout_secs` - Per-request timeout
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_output {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    fn map_send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout(self.timeout.as_secs())
        } else if e.is_connect() {
            InferenceError::Unavailable(e.to_string())
        } else {
            InferenceError::ApiError(format!("Request failed: {}", e))
        }
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> InferenceError {
        match status.as_u16() {
            401 | 403 => InferenceError::ConfigError("Inference endpoint rejected the API key".to_string()),
            404 => InferenceError::ConfigError(format!("Unknown model or endpoint: {}", body)),
            s if s >= 500 => InferenceError::ApiError(format!("Server error ({}): {}", s, body)),
            s => InferenceError::ApiError(format!("HTTP {}: {}", s, body)),
        }
    }

    fn parse_response(body: &Value) -> InferenceResult<String> {
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| InferenceError::InvalidResponse("missing choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl InferenceProvider for OpenAICompatInference {
    async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, max_tokens = request.max_tokens, "Sending completion request");

        let mut http = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::map_http_error(status, &text));
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
        Self::parse_response(&body)
    }

    async fn ping(&self) -> InferenceResult<()> {
        let url = format!("{}/models", self.base_url);
        let mut http = self.client.get(&url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.send().await.map_err(|e| self.map_send_error(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Self::map_http_error(status, &body))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
