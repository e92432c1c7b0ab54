//! Layered configuration.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. User config (`<config dir>/paper-qa/config.toml`)
//! 3. An explicit TOML file
//! 4. Environment variables prefixed with `PAPERQA_`, nested with `__`
//!    (e.g. `PAPERQA_INFERENCE__MODEL`, `PAPERQA_ORCHESTRATOR__MAX_CONCURRENT_ANALYZERS`)

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::agents::{AnalyzerConfig, DecomposerConfig, GenerationSettings};
use crate::chunking::ChunkerConfig;
use crate::error::{CoreError, CoreResult};
use crate::ingestion::IndexingConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::query::RetrieverConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PAPERQA_";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local ONNX model, no API required
    #[default]
    FastEmbed,

    /// OpenAI-compatible `/embeddings` endpoint
    OpenAI,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,

    /// Provider-specific model name; each backend has its own default
    pub model: Option<String>,

    pub base_url: Option<String>,

    pub api_key: Option<String>,

    /// Override for models outside the built-in dimension table
    pub dimension: Option<usize>,

    /// FastEmbed model cache
    pub cache_dir: Option<PathBuf>,

    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model: None,
            base_url: None,
            api_key: None,
            dimension: None,
            cache_dir: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceSettings {
    /// Chat-completions API root; a local vLLM server when unset
    pub base_url: Option<String>,

    pub model: String,

    pub api_key: Option<String>,

    pub max_tokens: u32,

    pub temperature: f32,

    pub timeout_secs: u64,

    /// Retries of a transiently failed generation call
    pub max_retries: u32,

    /// Backoff before the first generation retry; doubled on each further retry
    pub backoff_ms: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "Qwen/Qwen2.5-7B-Instruct".to_string(),
            api_key: None,
            max_tokens: 512,
            temperature: 0.2,
            timeout_secs: 30,
            max_retries: 2,
            backoff_ms: 200,
        }
    }
}

impl InferenceSettings {
    pub fn generation(&self) -> GenerationSettings {
        GenerationSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_retries: self.max_retries,
            backoff_ms: self.backoff_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,

    /// SQLite database file
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: PathBuf::from("paperqa.db"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub embedding: EmbeddingSettings,
    pub inference: InferenceSettings,
    pub store: StoreSettings,
    pub chunking: ChunkerConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrieverConfig,
    pub analysis: AnalyzerConfig,
    pub orchestrator: OrchestratorConfig,
    pub decomposer: DecomposerConfig,
}

impl AppConfig {
    /// Reject settings no component can run with.
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: &str| Err(CoreError::Validation(msg.to_string()));

        if self.indexing.batch_size == 0 {
            return invalid("indexing.batch_size must be at least 1");
        }
        if self.retrieval.default_k == 0 {
            return invalid("retrieval.default_k must be at least 1");
        }
        if self.retrieval.overfetch_factor == 0 {
            return invalid("retrieval.overfetch_factor must be at least 1");
        }
        if !(0.0..0.5).contains(&self.chunking.overlap_fraction) {
            return invalid("chunking.overlap_fraction must be in [0, 0.5)");
        }
        if self.chunking.overview_max_tokens == 0
            || self.chunking.section_max_tokens == 0
            || self.chunking.subsection_max_tokens == 0
        {
            return invalid("chunking budgets must be positive");
        }
        if self.analysis.context_max_tokens == 0 || self.analysis.chunk_max_tokens == 0 {
            return invalid("analysis token budgets must be positive");
        }
        if self.orchestrator.max_concurrent_analyzers == 0 {
            return invalid("orchestrator.max_concurrent_analyzers must be at least 1");
        }
        if self.orchestrator.analyzer_timeout_secs == 0 {
            return invalid("orchestrator.analyzer_timeout_secs must be at least 1");
        }
        if self.inference.model.trim().is_empty() {
            return invalid("inference.model must be set");
        }
        Ok(())
    }
}

/// Path of the per-user config file, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("paper-qa").join("config.toml"))
}

/// Load configuration from every layer.
///
/// # Arguments
/// * `path` - Optional explicit TOML file, merged over the user config
///
/// # Errors
/// Returns the figment error when a layer fails to parse or a value has the
/// wrong type
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment.extract().map_err(Box::new)
}
