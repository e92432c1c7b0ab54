//! Per-paper chunk retrieval.
//!
//! This module ranks the chunks of one paper's collection against a
//! sub-question. It coordinates between the embedding provider and the vector
//! store: the query text is normalized, embedded, matched against the paper's
//! collection and the hits are returned with their similarity scores.
//!
//! # Usage
//!
//! ```rust,no_run
//! use paper_qa::embedding::openai::OpenAIEmbedding;
//! use paper_qa::query::{ChunkRetriever, RetrievalQuery, RetrieverConfig, VectorRetriever};
//! use paper_qa::storage::sqlite::SqliteVectorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let embedding_provider = OpenAIEmbedding::new(None, None, None, 30);
//! let store = SqliteVectorStore::open("papers.db")?;
//! let retriever = VectorRetriever::new(embedding_provider, store, RetrieverConfig::default());
//!
//! let query = RetrievalQuery::new("p1", "How is the encoder trained?", 5);
//! for hit in retriever.retrieve(&query).await? {
//!     println!("{} - Score: {:.3}", hit.section_path(), hit.score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! An empty result is a normal outcome meaning "indexed, but nothing scored
//! above the relevance floor". A paper without a collection is an error
//! ([`RetrievalError::NotIndexed`]).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::embedding::{normalize_text, EmbeddingProvider};
use crate::models::{Chunk, RetrievedChunk};
use crate::storage::{QueryFilter, StorageError, VectorStore};

/// Errors that can occur during retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The paper has no collection in the vector store
    #[error("Paper not indexed: {0}")]
    NotIndexed(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// The vector store could not be reached
    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    /// Storage access failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// An external call exceeded its deadline
    #[error("Retrieval timed out after {0}s")]
    Timeout(u64),
}

/// Result type for retrieval operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Number of chunks returned when the caller does not say
    pub default_k: usize,

    /// Matches scoring at or below this floor are dropped
    pub min_score: f32,

    /// Candidates fetched per requested chunk before the floor is applied
    pub overfetch_factor: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            min_score: 0.0,
            overfetch_factor: 2,
        }
    }
}

/// Retrieval request for one paper.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub paper_id: String,
    pub query_text: String,
    pub k: usize,
    pub filter: Option<QueryFilter>,
}

impl RetrievalQuery {
    pub fn new(paper_id: impl Into<String>, query_text: impl Into<String>, k: usize) -> Self {
        Self {
            paper_id: paper_id.into(),
            query_text: query_text.into(),
            k,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Trait for ranking the chunks of one paper.
#[async_trait]
pub trait ChunkRetriever: Send + Sync {
    /// Retrieve up to `query.k` chunks sorted by descending score.
    ///
    /// # Errors
    /// Returns `RetrievalError::NotIndexed` if the paper has no collection
    async fn retrieve(&self, query: &RetrievalQuery) -> RetrievalResult<Vec<RetrievedChunk>>;
}

#[async_trait]
impl<T: ChunkRetriever + ?Sized> ChunkRetriever for std::sync::Arc<T> {
    async fn retrieve(&self, query: &RetrievalQuery) -> RetrievalResult<Vec<RetrievedChunk>> {
        (**self).retrieve(query).await
    }
}

/// Embedding-plus-vector-store retriever.
pub struct VectorRetriever<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    embedding_provider: E,
    store: S,
    config: RetrieverConfig,
    call_timeout: Duration,
}

impl<E, S> VectorRetriever<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    /// Create a retriever with the default 30 s per-call deadline.
    pub fn new(embedding_provider: E, store: S, config: RetrieverConfig) -> Self {
        Self {
            embedding_provider,
            store,
            config,
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Override the deadline applied to the embedding and store calls.
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }
}

fn map_storage_error(paper_id: &str, error: StorageError) -> RetrievalError {
    match error {
        StorageError::NotFound(_) => RetrievalError::NotIndexed(paper_id.to_string()),
        StorageError::ConnectionError(msg) => RetrievalError::Unavailable(msg),
        other => RetrievalError::StorageError(other.to_string()),
    }
}

#[async_trait]
impl<E, S> ChunkRetriever for VectorRetriever<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    async fn retrieve(&self, query: &RetrievalQuery) -> RetrievalResult<Vec<RetrievedChunk>> {
        if query.k == 0 {
            return Err(RetrievalError::InvalidQuery("k must be at least 1".to_string()));
        }
        let normalized = normalize_text(&query.query_text);
        if normalized.is_empty() {
            return Err(RetrievalError::InvalidQuery("query text is empty".to_string()));
        }
        let timeout_secs = self.call_timeout.as_secs();

        // 1. Embed the sub-question
        let query_vector = tokio::time::timeout(self.call_timeout, self.embedding_provider.embed(&normalized))
            .await
            .map_err(|_| RetrievalError::Timeout(timeout_secs))?
            .map_err(|e| RetrievalError::EmbeddingError(e.to_string()))?;

        // 2. Over-fetch from the paper's collection
        let candidates = query.k * self.config.overfetch_factor.max(1);
        let matches = tokio::time::timeout(
            self.call_timeout,
            self.store
                .query(&query.paper_id, &query_vector, candidates, query.filter.as_ref()),
        )
        .await
        .map_err(|_| RetrievalError::Timeout(timeout_secs))?
        .map_err(|e| map_storage_error(&query.paper_id, e))?;

        // 3. Apply the relevance floor, then keep the top k
        let fetched = matches.len();
        let mut results: Vec<RetrievedChunk> = matches
            .into_iter()
            .filter(|m| m.score > self.config.min_score)
            .map(|m| RetrievedChunk::new(Chunk::from_parts(m.chunk_id, m.metadata, m.text), m.score))
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(query.k);

        debug!(
            paper_id = %query.paper_id,
            fetched,
            returned = results.len(),
            top_score = results.first().map(|r| r.score),
            "Retrieved chunks"
        );
        Ok(results)
    }
}
