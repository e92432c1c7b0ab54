//! FastEmbed embedding provider implementation.
//!
//! Runs a local ONNX sentence-embedding model through the `fastembed` crate.
//! This is the default provider: indexing a paper of a few hundred chunks
//! needs no API key and no network once the model is cached.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// FastEmbed embedding provider.
///
/// Inference is CPU-bound, so every call runs on the blocking pool. The model
/// instance is shared behind a mutex; concurrent callers queue on it rather
/// than loading a second copy of the weights.
#[derive(Clone)]
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    embedding_dimension: usize,
}

/// Map a configured model name onto a supported `EmbeddingModel`.
///
/// Accepts both the enum spelling (`BGEBaseENV15`) and the Hugging Face id
/// (`BAAI/bge-base-en-v1.5`), case-insensitively.
pub fn parse_model_name(name: &str) -> Option<EmbeddingModel> {
    let key: String = name
        .rsplit('/')
        .next()
        .unwrap_or(name)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();

    match key.as_str() {
        "allminilml6v2" => Some(EmbeddingModel::AllMiniLML6V2),
        "bgesmallenv15" => Some(EmbeddingModel::BGESmallENV15),
        "bgebaseenv15" => Some(EmbeddingModel::BGEBaseENV15),
        "bgelargeenv15" => Some(EmbeddingModel::BGELargeENV15),
        "nomicembedtextv1" => Some(EmbeddingModel::NomicEmbedTextV1),
        "nomicembedtextv15" => Some(EmbeddingModel::NomicEmbedTextV15),
        "paraphrasemultilingualminilml12v2" | "paraphrasemlminilml12v2" => {
            Some(EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        "paraphrasemultilingualmpnetbasev2" | "paraphrasemlmpnetbasev2" => {
            Some(EmbeddingModel::ParaphraseMLMpnetBaseV2)
        }
        _ => None,
    }
}

/// Run a closure against the locked model on the blocking pool.
async fn with_model<M, T, F>(model: &Arc<Mutex<M>>, f: F) -> EmbeddingResult<T>
where
    M: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut M) -> EmbeddingResult<T> + Send + 'static,
{
    let model = Arc::clone(model);
    tokio::task::spawn_blocking(move || {
        let mut guard = model
            .lock()
            .map_err(|_| EmbeddingError::Other("model mutex poisoned".to_string()))?;
        f(&mut guard)
    })
    .await
    .map_err(|e| EmbeddingError::Other(format!("blocking task failed: {}", e)))?
}

fn model_dimension(model: &EmbeddingModel) -> usize {
    match model {
        EmbeddingModel::AllMiniLML6V2 => 384,
        EmbeddingModel::BGESmallENV15 => 384,
        EmbeddingModel::BGEBaseENV15 => 768,
        EmbeddingModel::BGELargeENV15 => 1024,
        EmbeddingModel::NomicEmbedTextV1 => 768,
        EmbeddingModel::NomicEmbedTextV15 => 768,
        EmbeddingModel::ParaphraseMLMiniLML12V2 => 384,
        EmbeddingModel::ParaphraseMLMpnetBaseV2 => 768,
        _ => 384,
    }
}

impl FastEmbedProvider {
    /// Create a new FastEmbed embedding provider.
    ///
    /// # Arguments
    /// * `model` - Optional model to use (defaults to BGEBaseENV15, the
    ///   retrieval-tuned model papers are usually indexed with)
    /// * `cache_dir` - Optional cache directory for model files
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if model initialization fails
    pub fn new(model: Option<EmbeddingModel>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model_type = model.unwrap_or(EmbeddingModel::BGEBaseENV15);
        let model_name = format!("{:?}", model_type);
        let embedding_dimension = model_dimension(&model_type);

        let mut init_options = InitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let text_embedding = TextEmbedding::try_new(init_options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name,
            embedding_dimension,
        })
    }

    /// Create a provider from a configured model name.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` for unknown model names
    pub fn from_name(name: Option<&str>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model = match name {
            Some(name) => Some(parse_model_name(name).ok_or_else(|| {
                EmbeddingError::ConfigError(format!("Unsupported FastEmbed model '{}'", name))
            })?),
            None => None,
        };
        Self::new(model, cache_dir)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let text = text.to_string();
        let embeddings = with_model(&self.model, move |model| {
            model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Other(format!("Embedding generation failed: {}", e)))
        })
        .await?;

        embeddings
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

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let batch_size = text_strings.len();

        with_model(&self.model, move |model| {
            model
                .embed(text_strings, Some(batch_size))
                .map_err(|e| EmbeddingError::Other(format!("Batch embedding generation failed: {}", e)))
        })
        .await
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// TextEmbedding does not implement Debug
impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_name_accepts_both_spellings() {
        assert!(matches!(parse_model_name("BGEBaseENV15"), Some(EmbeddingModel::BGEBaseENV15)));
        assert!(matches!(
            parse_model_name("BAAI/bge-base-en-v1.5"),
            Some(EmbeddingModel::BGEBaseENV15)
        ));
        assert!(matches!(
            parse_model_name("all-MiniLM-L6-v2"),
            Some(EmbeddingModel::AllMiniLML6V2)
        ));
        assert!(parse_model_name("not-a-model").is_none());
    }

    #[test]
    fn test_model_dimensions() {
        assert_eq!(model_dimension(&EmbeddingModel::AllMiniLML6V2), 384);
        assert_eq!(model_dimension(&EmbeddingModel::BGEBaseENV15), 768);
        assert_eq!(model_dimension(&EmbeddingModel::BGELargeENV15), 1024);
    }

    #[test]
    fn test_from_name_rejects_unknown_model_without_loading() {
        let result = FastEmbedProvider::from_name(Some("gpt-embeddings-9000"), None);
        assert!(matches!(result, Err(EmbeddingError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_model_calls_leave_the_async_worker() {
        let model = Arc::new(Mutex::new(0usize));
        let caller = std::thread::current().id();

        let worker = with_model(&model, |calls| {
            *calls += 1;
            Ok(std::thread::current().id())
        })
        .await
        .unwrap();

        assert_ne!(worker, caller);
        assert_eq!(*model.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_slow_model_call_does_not_block_deadline() {
        let model = Arc::new(Mutex::new(()));
        let slow = with_model(&model, |_| {
            std::thread::sleep(std::time::Duration::from_millis(500));
            Ok(())
        });

        let result = tokio::time::timeout(std::time::Duration::from_millis(50), slow).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_poisoned_model_is_reported() {
        let model = Arc::new(Mutex::new(()));
        let poisoner = Arc::clone(&model);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        let result = with_model(&model, |_| Ok(())).await;
        assert!(matches!(result, Err(EmbeddingError::Other(_))));
    }

    #[tokio::test]
    #[ignore = "downloads model weights"]
    async fn test_embed_batch_matches_single_embed() {
        let provider = FastEmbedProvider::new(Some(EmbeddingModel::AllMiniLML6V2), None)
            .expect("model should load");
        let text = "we fine-tune the encoder on citation pairs";

        let single = provider.embed(text).await.unwrap();
        let batch = provider.embed_batch(&[text, "unrelated text"]).await.unwrap();

        assert_eq!(single.len(), provider.dimension());
        assert_eq!(batch.len(), 2);
        for (a, b) in single.iter().zip(batch[0].iter()) {
            assert!((a - b).abs() < 1e-4);
        }
        assert_ne!(batch[0], batch[1]);
    }

    #[tokio::test]
    #[ignore = "downloads model weights"]
    async fn test_empty_text_rejected() {
        let provider = FastEmbedProvider::new(Some(EmbeddingModel::AllMiniLML6V2), None)
            .expect("model should load");
        assert!(matches!(provider.embed("   \n").await, Err(EmbeddingError::InvalidInput(_))));
        assert!(matches!(
            provider.embed_batch(&["valid", ""]).await,
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
