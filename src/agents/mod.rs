//! Query-path agents.
//!
//! Each agent is a stateless request/response component: it holds only
//! configuration and shared handles to the retriever and inference ports,
//! never per-request mutable state, so concurrent requests cannot couple.
//!
//! - [`decomposer::Decomposer`]: question → per-paper plan
//! - [`analyzer::Analyzer`]: one paper + sub-question → cited analysis
//! - [`synthesizer::Synthesizer`]: analyses → one attributed answer

pub mod analyzer;
pub mod decomposer;
pub mod prompts;
pub mod synthesizer;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::inference::{GenerationRequest, InferenceProvider, InferenceResult};

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use decomposer::{DecomposeError, Decomposer, DecomposerConfig, TargetingPolicy};
pub use synthesizer::{aggregate_confidence, Synthesizer};

/// Sampling limits and retry policy shared by every agent's generation calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,

    /// Retries of a transiently failed call after the first attempt
    pub max_retries: u32,

    /// Backoff before the first retry; doubled on each further retry
    pub backoff_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.2,
            max_retries: 2,
            backoff_ms: 200,
        }
    }
}

impl GenerationSettings {
    pub(crate) fn request(&self, system: &str, prompt: String) -> GenerationRequest {
        GenerationRequest::new(system, prompt).with_limits(self.max_tokens, self.temperature)
    }

    /// Run one generation call, retrying transient failures with
    /// exponential backoff.
    ///
    /// # Errors
    /// Returns the last error once retries are exhausted, or the first
    /// non-transient error
    pub(crate) async fn generate(
        &self,
        inference: &dyn InferenceProvider,
        request: &GenerationRequest,
    ) -> InferenceResult<String> {
        let mut attempt = 0;
        loop {
            match inference.generate(request).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = Duration::from_millis(self.backoff_ms.saturating_mul(1 << attempt));
                    attempt += 1;
                    warn!(
                        model = inference.model_name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying generation"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::GenerationSettings;
    use crate::inference::{GenerationRequest, InferenceError, InferenceProvider, InferenceResult};

    #[derive(Default)]
    struct ScriptState {
        responses: VecDeque<InferenceResult<String>>,
        requests: Vec<GenerationRequest>,
    }

    /// Inference fake replaying scripted responses in order.
    #[derive(Clone, Default)]
    pub struct ScriptedInference {
        state: Arc<Mutex<ScriptState>>,
    }

    /// Default settings with a backoff short enough for tests.
    pub fn fast_settings() -> GenerationSettings {
        GenerationSettings {
            backoff_ms: 1,
            ..GenerationSettings::default()
        }
    }

    impl ScriptedInference {
        pub fn new(responses: Vec<InferenceResult<String>>) -> Self {
            Self {
                state: Arc::new(Mutex::new(ScriptState {
                    responses: responses.into(),
                    requests: Vec::new(),
                })),
            }
        }

        pub fn requests(&self) -> Vec<GenerationRequest> {
            self.state.lock().unwrap().requests.clone()
        }

        pub fn call_count(&self) -> usize {
            self.state.lock().unwrap().requests.len()
        }
    }

    #[async_trait]
    impl InferenceProvider for ScriptedInference {
        async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String> {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            state
                .responses
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError::InvalidResponse("script exhausted".to_string())))
        }

        async fn ping(&self) -> InferenceResult<()> {
            Ok(())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }
}
