//! Indexing pipeline module.
//!
//! This module turns one paper's document tree into a queryable collection:
//! it chunks the document, embeds the chunks in fixed-size batches and writes
//! them into the paper's collection of the vector store.
//!
//! # Usage Patterns
//!
//! ## Primary: Indexing into an Existing Store
//! The store already pins an embedding configuration; the pipeline refuses to
//! run with a provider that does not match it:
//!
//! ```ignore
//! use paper_qa::ingestion::{IndexingConfig, IndexingPipeline};
//! use paper_qa::storage::sqlite::SqliteVectorStore;
//! use paper_qa::embedding::fastembed::FastEmbedProvider;
//!
//! let store = SqliteVectorStore::open("papers.db")?;
//! let provider = FastEmbedProvider::new(None, None)?;
//! let pipeline = IndexingPipeline::connect(provider, store, chunker, IndexingConfig::default()).await?;
//!
//! let report = pipeline.index_paper("p1", &document).await?;
//! println!("{}: {} chunks", report.status, report.num_chunks);
//! ```
//!
//! ## Secondary: Creating a New Store
//! `initialize_new()` records the provider's model name and dimension in the
//! store; [`IndexingPipeline::open`] picks whichever of the two applies.
//!
//! # Failure semantics
//!
//! - A malformed document fails before the store is touched
//! - Re-indexing replaces the paper's collection wholesale
//! - A batch that exhausts its retries stops the run: the report carries
//!   `PaperStatus::Failed` and the batch's chunk ids, while batches committed
//!   earlier stay in place (re-indexing is the recovery path)
//! - The collection is marked complete only after its last batch commits, so
//!   a reopened store can tell a finished paper from an interrupted one

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunking::{Chunker, ChunkingError, DocumentStructure};
use crate::embedding::{normalize_text, EmbeddingError, EmbeddingProvider};
use crate::models::{Chunk, EmbeddingConfig, IndexReport, PaperStatus};
use crate::storage::{StorageError, VectorRecord, VectorStore};

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// The document tree is malformed
    #[error("Invalid document: {0}")]
    InvalidDocument(#[from] ChunkingError),

    /// Storage operation failed outside of a batch
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    /// Provider does not match the store's pinned configuration
    #[error("Embedding configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// Invalid pipeline configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for indexing operations.
pub type IndexingResult<T> = Result<T, IndexingError>;

/// Batching and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingConfig {
    /// Chunks per embedding request
    pub batch_size: usize,

    /// Retries per batch after the first attempt
    pub max_retries: u32,

    /// Backoff before the first retry; doubled on each further retry
    pub backoff_ms: u64,

    /// Deadline of each embedding and store call
    pub call_timeout_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_retries: 3,
            backoff_ms: 200,
            call_timeout_secs: 30,
        }
    }
}

/// Statistics from indexing several papers.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IndexingStats {
    pub total_processed: usize,
    pub indexed: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

impl IndexingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one paper.
    pub fn record(&mut self, report: &IndexReport) {
        self.total_processed += 1;
        self.chunks_written += report.num_chunks;
        match report.status {
            PaperStatus::Indexed => self.indexed += 1,
            _ => self.failed += 1,
        }
    }

    /// Record a paper that failed before producing a report.
    pub fn record_failed(&mut self) {
        self.total_processed += 1;
        self.failed += 1;
    }
}

#[derive(Debug)]
enum BatchError {
    Embedding(EmbeddingError),
    Storage(StorageError),
    Shape(String),
}

impl BatchError {
    fn is_transient(&self) -> bool {
        match self {
            BatchError::Embedding(e) => e.is_transient(),
            BatchError::Storage(e) => matches!(e, StorageError::ConnectionError(_) | StorageError::QueryError(_)),
            BatchError::Shape(_) => false,
        }
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::Embedding(e) => write!(f, "{}", e),
            BatchError::Storage(e) => write!(f, "{}", e),
            BatchError::Shape(msg) => f.write_str(msg),
        }
    }
}

/// Indexing pipeline coordinator.
///
/// Holds the embedding provider, the vector store and the chunker. Methods
/// take `&self`, so one pipeline can be shared behind an `Arc`.
pub struct IndexingPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    embedding_provider: E,
    store: S,
    chunker: Chunker,
    config: IndexingConfig,
}

impl<E, S> IndexingPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    /// Extract embedding configuration from a provider.
    fn extract_config(provider: &E) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: provider.model_name().to_string(),
            dimension: provider.dimension(),
        }
    }

    fn validate_config(config: &IndexingConfig) -> IndexingResult<()> {
        if config.batch_size == 0 {
            return Err(IndexingError::InvalidInput("batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Connect to a store that already pins an embedding configuration.
    ///
    /// # Errors
    /// Returns `IndexingError::InvalidInput` if the store has no configuration
    /// and `IndexingError::ConfigMismatch` if the provider differs from it
    pub async fn connect(
        embedding_provider: E,
        store: S,
        chunker: Chunker,
        config: IndexingConfig,
    ) -> IndexingResult<Self> {
        Self::validate_config(&config)?;

        let stored = store.get_config().await?.ok_or_else(|| {
            IndexingError::InvalidInput(
                "Store has no embedding configuration. Use initialize_new() for a new store.".to_string(),
            )
        })?;

        let provided = Self::extract_config(&embedding_provider);
        if provided.model_name != stored.model_name {
            return Err(IndexingError::ConfigMismatch(format!(
                "provider uses model '{}' but the store was built with '{}'",
                provided.model_name, stored.model_name
            )));
        }
        if provided.dimension != stored.dimension {
            return Err(IndexingError::ConfigMismatch(format!(
                "provider has dimension {} but the store has {}",
                provided.dimension, stored.dimension
            )));
        }

        Ok(Self {
            embedding_provider,
            store,
            chunker,
            config,
        })
    }

    /// Pin the provider's configuration in a new store.
    pub async fn initialize_new(
        embedding_provider: E,
        store: S,
        chunker: Chunker,
        config: IndexingConfig,
    ) -> IndexingResult<Self> {
        Self::validate_config(&config)?;
        store.store_config(&Self::extract_config(&embedding_provider)).await?;
        info!(
            model = embedding_provider.model_name(),
            dimension = embedding_provider.dimension(),
            "Pinned embedding configuration in new store"
        );

        Ok(Self {
            embedding_provider,
            store,
            chunker,
            config,
        })
    }

    /// Connect if the store is pinned, otherwise initialize it.
    pub async fn open(
        embedding_provider: E,
        store: S,
        chunker: Chunker,
        config: IndexingConfig,
    ) -> IndexingResult<Self> {
        if store.get_config().await?.is_some() {
            Self::connect(embedding_provider, store, chunker, config).await
        } else {
            Self::initialize_new(embedding_provider, store, chunker, config).await
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn embedding_provider(&self) -> &E {
        &self.embedding_provider
    }

    /// Index one paper, replacing any previous collection.
    ///
    /// # Arguments
    /// * `paper_id` - The paper id, used as the collection id
    /// * `document` - The structured paper
    ///
    /// # Returns
    /// An `IndexReport` with status `Indexed`, or `Failed` plus the chunk ids
    /// of the batch that exhausted its retries
    ///
    /// # Errors
    /// Returns `IndexingError::InvalidDocument` for a malformed tree (nothing
    /// is written) and `IndexingError::StorageError` if the collection cannot
    /// be reset or marked complete
    pub async fn index_paper(&self, paper_id: &str, document: &DocumentStructure) -> IndexingResult<IndexReport> {
        let chunks = self.chunker.chunk(paper_id, document)?;

        self.store.replace_collection(paper_id, document.title.trim()).await?;

        let mut committed = 0;
        for (batch_no, batch) in chunks.chunks(self.config.batch_size).enumerate() {
            if let Err(e) = self.commit_batch(paper_id, batch).await {
                let failed_chunk_ids: Vec<String> = batch.iter().map(|c| c.chunk_id.clone()).collect();
                warn!(
                    paper_id,
                    batch = batch_no,
                    committed,
                    failed = failed_chunk_ids.len(),
                    error = %e,
                    "Batch exhausted retries, marking paper failed"
                );
                return Ok(IndexReport {
                    paper_id: paper_id.to_string(),
                    status: PaperStatus::Failed,
                    num_chunks: committed,
                    failed_chunk_ids,
                });
            }
            committed += batch.len();
            debug!(paper_id, batch = batch_no, committed, "Committed batch");
        }

        self.store.mark_complete(paper_id).await?;
        info!(paper_id, num_chunks = committed, "Indexed paper");
        Ok(IndexReport {
            paper_id: paper_id.to_string(),
            status: PaperStatus::Indexed,
            num_chunks: committed,
            failed_chunk_ids: Vec::new(),
        })
    }

    /// Embed and upsert one batch, retrying transient failures with
    /// exponential backoff.
    async fn commit_batch(&self, paper_id: &str, batch: &[Chunk]) -> Result<(), BatchError> {
        let mut attempt = 0;
        loop {
            match self.try_commit_batch(paper_id, batch).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(self.config.backoff_ms.saturating_mul(1 << attempt));
                    attempt += 1;
                    warn!(paper_id, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying batch");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_commit_batch(&self, paper_id: &str, batch: &[Chunk]) -> Result<(), BatchError> {
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);

        let texts: Vec<String> = batch.iter().map(|c| normalize_text(&c.embedding_text())).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let vectors = tokio::time::timeout(call_timeout, self.embedding_provider.embed_batch(&refs))
            .await
            .map_err(|_| BatchError::Embedding(EmbeddingError::Timeout(self.config.call_timeout_secs)))?
            .map_err(BatchError::Embedding)?;

        if vectors.len() != batch.len() {
            return Err(BatchError::Shape(format!(
                "expected {} vectors, received {}",
                batch.len(),
                vectors.len()
            )));
        }
        let dimension = self.embedding_provider.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(BatchError::Shape(format!(
                "expected dimension {}, received {}",
                dimension,
                bad.len()
            )));
        }

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                chunk_id: chunk.chunk_id.clone(),
                vector,
                metadata: chunk.to_metadata(),
                text: chunk.text.clone(),
            })
            .collect();

        tokio::time::timeout(call_timeout, self.store.upsert(paper_id, &records))
            .await
            .map_err(|_| BatchError::Storage(StorageError::ConnectionError("upsert timed out".to_string())))?
            .map_err(BatchError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{ChunkerConfig, SectionNode, TableNode};
    use crate::storage::memory::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    // ===== Mock Implementations =====

    /// Mock embedding provider for testing with configurable behavior.
    #[derive(Clone)]
    struct MockEmbeddingProvider {
        model_name: String,
        dimension: usize,
        state: Arc<Mutex<MockEmbeddingState>>,
    }

    #[derive(Default)]
    struct MockEmbeddingState {
        embed_batch_calls: Vec<Vec<String>>,
        /// Fail this many calls with a transient error before succeeding
        transient_failures: usize,
        /// Fail every batch containing this text with a transient error
        fail_on_text: Option<String>,
    }

    impl MockEmbeddingProvider {
        fn new(model_name: &str, dimension: usize) -> Self {
            Self {
                model_name: model_name.to_string(),
                dimension,
                state: Arc::new(Mutex::new(MockEmbeddingState::default())),
            }
        }

        fn with_transient_failures(self, count: usize) -> Self {
            self.state.lock().unwrap().transient_failures = count;
            self
        }

        fn fail_on_text(self, text: &str) -> Self {
            self.state.lock().unwrap().fail_on_text = Some(text.to_string());
            self
        }

        fn batch_calls(&self) -> Vec<Vec<String>> {
            self.state.lock().unwrap().embed_batch_calls.clone()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.embed_batch(&[text]).await?.remove(0))
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut state = self.state.lock().unwrap();
            state.embed_batch_calls.push(texts.iter().map(|t| t.to_string()).collect());

            if state.transient_failures > 0 {
                state.transient_failures -= 1;
                return Err(EmbeddingError::ApiError("503 Service Unavailable".to_string()));
            }
            if let Some(needle) = &state.fail_on_text {
                if texts.iter().any(|t| t.contains(needle.as_str())) {
                    return Err(EmbeddingError::ApiError("upstream overloaded".to_string()));
                }
            }

            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.1; self.dimension];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }

    // ===== Test Helpers =====

    fn fast_config(batch_size: usize) -> IndexingConfig {
        IndexingConfig {
            batch_size,
            max_retries: 2,
            backoff_ms: 1,
            call_timeout_secs: 5,
        }
    }

    /// Overview + 4 sections + 1 table = 6 chunks
    fn sample_document() -> DocumentStructure {
        let mut methods = SectionNode::new("Methods", "We train a transformer on the corpus.");
        methods.tables.push(TableNode {
            caption: "Hyperparameters".to_string(),
            content: "lr | 0.001".to_string(),
            ..Default::default()
        });
        DocumentStructure {
            title: "A Study of Things".to_string(),
            authors: vec!["A. Author".to_string()],
            abstract_text: "We study things.".to_string(),
            sections: vec![
                SectionNode::new("Introduction", "Things are important."),
                methods,
                SectionNode::new("Results", "Things improved by ten percent."),
                SectionNode::new("Conclusion", "Things are good."),
            ],
            references: Vec::new(),
        }
    }

    async fn pipeline(
        provider: MockEmbeddingProvider,
        store: Arc<InMemoryVectorStore>,
        batch_size: usize,
    ) -> IndexingPipeline<MockEmbeddingProvider, Arc<InMemoryVectorStore>> {
        IndexingPipeline::open(provider, store, Chunker::new(ChunkerConfig::default()), fast_config(batch_size))
            .await
            .unwrap()
    }

    // ===== Configuration Pinning =====

    #[tokio::test]
    async fn test_open_pins_configuration_on_first_use() {
        let store = Arc::new(InMemoryVectorStore::new());
        pipeline(MockEmbeddingProvider::new("mock-a", 4), Arc::clone(&store), 8).await;

        let stored = store.get_config().await.unwrap().unwrap();
        assert_eq!(stored.model_name, "mock-a");
        assert_eq!(stored.dimension, 4);
    }

    #[tokio::test]
    async fn test_connect_with_model_name_mismatch() {
        let store = Arc::new(InMemoryVectorStore::new());
        pipeline(MockEmbeddingProvider::new("mock-a", 4), Arc::clone(&store), 8).await;

        let result = IndexingPipeline::connect(
            MockEmbeddingProvider::new("mock-b", 4),
            store,
            Chunker::default(),
            fast_config(8),
        )
        .await;
        assert!(matches!(result, Err(IndexingError::ConfigMismatch(msg)) if msg.contains("mock-b")));
    }

    #[tokio::test]
    async fn test_connect_with_dimension_mismatch() {
        let store = Arc::new(InMemoryVectorStore::new());
        pipeline(MockEmbeddingProvider::new("mock-a", 4), Arc::clone(&store), 8).await;

        let result = IndexingPipeline::open(
            MockEmbeddingProvider::new("mock-a", 8),
            store,
            Chunker::default(),
            fast_config(8),
        )
        .await;
        assert!(matches!(result, Err(IndexingError::ConfigMismatch(_))));
    }

    #[tokio::test]
    async fn test_connect_with_missing_config() {
        let result = IndexingPipeline::connect(
            MockEmbeddingProvider::new("mock-a", 4),
            InMemoryVectorStore::new(),
            Chunker::default(),
            fast_config(8),
        )
        .await;
        assert!(matches!(result, Err(IndexingError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let result = IndexingPipeline::initialize_new(
            MockEmbeddingProvider::new("mock-a", 4),
            InMemoryVectorStore::new(),
            Chunker::default(),
            fast_config(0),
        )
        .await;
        assert!(matches!(result, Err(IndexingError::InvalidInput(_))));
    }

    // ===== Indexing =====

    #[tokio::test]
    async fn test_index_paper_writes_every_chunk_in_batches() {
        let provider = MockEmbeddingProvider::new("mock", 4);
        let store = Arc::new(InMemoryVectorStore::new());
        let pipeline = pipeline(provider.clone(), Arc::clone(&store), 4).await;

        let report = pipeline.index_paper("p1", &sample_document()).await.unwrap();
        assert_eq!(report.status, PaperStatus::Indexed);
        assert_eq!(report.num_chunks, 6);
        assert!(report.failed_chunk_ids.is_empty());

        let sizes: Vec<usize> = provider.batch_calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 2]);

        let collections = store.list_collections().await.unwrap();
        assert_eq!(collections[0].collection_id, "p1");
        assert_eq!(collections[0].title, "A Study of Things");
        assert_eq!(collections[0].num_chunks, 6);
        assert!(collections[0].complete);
    }

    #[tokio::test]
    async fn test_embedding_input_is_normalized_with_section_path() {
        let provider = MockEmbeddingProvider::new("mock", 4);
        let pipeline = pipeline(provider.clone(), Arc::new(InMemoryVectorStore::new()), 32).await;
        pipeline.index_paper("p1", &sample_document()).await.unwrap();

        let texts = &provider.batch_calls()[0];
        assert!(texts.contains(&"introduction things are important.".to_string()));
        assert!(texts.iter().all(|t| t == &t.to_lowercase()));
    }

    #[tokio::test]
    async fn test_reindexing_replaces_collection() {
        let store = Arc::new(InMemoryVectorStore::new());
        let pipeline = pipeline(MockEmbeddingProvider::new("mock", 4), Arc::clone(&store), 4).await;

        pipeline.index_paper("p1", &sample_document()).await.unwrap();
        let mut shorter = sample_document();
        shorter.sections.truncate(1);
        let report = pipeline.index_paper("p1", &shorter).await.unwrap();

        assert_eq!(report.num_chunks, 2);
        assert_eq!(store.list_collections().await.unwrap()[0].num_chunks, 2);
    }

    #[tokio::test]
    async fn test_invalid_document_touches_nothing() {
        let store = Arc::new(InMemoryVectorStore::new());
        let provider = MockEmbeddingProvider::new("mock", 4);
        let pipeline = pipeline(provider.clone(), Arc::clone(&store), 4).await;

        let mut broken = sample_document();
        broken.sections[2].heading = "   ".to_string();
        let result = pipeline.index_paper("p1", &broken).await;

        match result {
            Err(IndexingError::InvalidDocument(ChunkingError::InvalidNode { path, .. })) => {
                assert_eq!(path, "sections[2].heading");
            }
            other => panic!("Expected InvalidDocument, got {:?}", other),
        }
        assert!(store.list_collections().await.unwrap().is_empty());
        assert!(provider.batch_calls().is_empty());
    }

    // ===== Retry Semantics =====

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let provider = MockEmbeddingProvider::new("mock", 4).with_transient_failures(2);
        let pipeline = pipeline(provider.clone(), Arc::new(InMemoryVectorStore::new()), 32).await;

        let report = pipeline.index_paper("p1", &sample_document()).await.unwrap();
        assert_eq!(report.status, PaperStatus::Indexed);
        assert_eq!(provider.batch_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed_without_rollback() {
        // Batches of 2: [overview, intro], [methods, table], [results, conclusion]
        let provider = MockEmbeddingProvider::new("mock", 4).fail_on_text("improved by ten percent");
        let store = Arc::new(InMemoryVectorStore::new());
        let pipeline = pipeline(provider.clone(), Arc::clone(&store), 2).await;

        let report = pipeline.index_paper("p1", &sample_document()).await.unwrap();
        assert_eq!(report.status, PaperStatus::Failed);
        assert_eq!(report.num_chunks, 4);
        assert_eq!(report.failed_chunk_ids, vec!["p1:00004".to_string(), "p1:00005".to_string()]);

        // 2 successful batches + 1 attempt + 2 retries
        assert_eq!(provider.batch_calls().len(), 5);
        let collections = store.list_collections().await.unwrap();
        assert_eq!(collections[0].num_chunks, 4);
        assert!(!collections[0].complete);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = IndexingStats::new();
        stats.record(&IndexReport {
            paper_id: "p1".into(),
            status: PaperStatus::Indexed,
            num_chunks: 10,
            failed_chunk_ids: vec![],
        });
        stats.record_failed();
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.chunks_written, 10);
    }
}
