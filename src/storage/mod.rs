//! Vector storage abstraction and implementations.
//!
//! Every paper owns one collection (partition) of the similarity index, keyed
//! by its `paper_id`. The [`VectorStore`] trait is the port used by the
//! indexer (writes) and the retriever (reads); two implementations ship:
//!
//! - [`sqlite::SqliteVectorStore`]: persistent, embeddings stored as BLOBs
//! - [`memory::InMemoryVectorStore`]: process-local, used by tests and demos
//!
//! [`catalog::PaperCatalog`] tracks paper status alongside the store.

pub mod catalog;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ChunkMetadata, ChunkType, EmbeddingConfig, SectionKind};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store cannot be reached at all
    #[error("Vector store connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error
    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Schema or dimension mismatch
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Collection or record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Other unexpected errors
    #[error("Unexpected storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Whether the error means the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::ConnectionError(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// One vector with the chunk it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub text: String,
}

/// A ranked query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
    pub text: String,
}

/// Summary of one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionInfo {
    pub collection_id: String,
    pub title: String,
    pub num_chunks: usize,
    /// Set once every batch of the last indexing run committed
    pub complete: bool,
}

/// Metadata filter applied before ranking.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryFilter {
    /// Keep chunks whose section path starts with this prefix
    #[serde(default)]
    pub section_prefix: Option<String>,

    /// Keep chunks of this section kind
    #[serde(default)]
    pub section_kind: Option<SectionKind>,

    /// Keep chunks of these types; empty means all types
    #[serde(default)]
    pub chunk_types: Vec<ChunkType>,
}

impl QueryFilter {
    pub fn section(prefix: impl Into<String>) -> Self {
        Self {
            section_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn kind(kind: SectionKind) -> Self {
        Self {
            section_kind: Some(kind),
            ..Default::default()
        }
    }

    /// Check whether a chunk's metadata passes the filter.
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(prefix) = &self.section_prefix {
            if !metadata.section_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.section_kind {
            if metadata.section_kind != kind {
                return false;
            }
        }
        self.chunk_types.is_empty() || self.chunk_types.contains(&metadata.chunk_type)
    }
}

/// Trait for per-paper vector storage backends.
///
/// Implementations take `&self` and synchronize internally: one store is
/// shared by the indexer and every concurrent analyzer.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection, or wipe an existing one.
    ///
    /// Indexing a paper always starts here so that re-indexing replaces the
    /// collection wholesale instead of appending to it. The collection is
    /// incomplete until [`VectorStore::mark_complete`] is called.
    ///
    /// # Arguments
    /// * `collection_id` - The paper id
    /// * `title` - Paper title, kept for catalog hydration
    async fn replace_collection(&self, collection_id: &str, title: &str) -> StorageResult<()>;

    /// Insert or overwrite records in a collection.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the collection does not exist
    async fn upsert(&self, collection_id: &str, records: &[VectorRecord]) -> StorageResult<()>;

    /// Rank a collection's records against a query vector.
    ///
    /// # Arguments
    /// * `collection_id` - The paper id
    /// * `query_vector` - Embedded query
    /// * `k` - Maximum number of matches
    /// * `filter` - Optional metadata filter applied before ranking
    ///
    /// # Returns
    /// Up to `k` matches sorted by descending cosine similarity
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the collection does not exist
    async fn query(
        &self,
        collection_id: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> StorageResult<Vec<VectorMatch>>;

    /// Record that every record of the collection has been written.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the collection does not exist
    async fn mark_complete(&self, collection_id: &str) -> StorageResult<()>;

    /// Drop a collection and all of its records.
    async fn delete_collection(&self, collection_id: &str) -> StorageResult<()>;

    /// List collections with their chunk counts.
    async fn list_collections(&self) -> StorageResult<Vec<CollectionInfo>>;

    /// Persist the embedding configuration the store was built with.
    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()>;

    /// Retrieve the stored embedding configuration, if any.
    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>>;

    /// Cheap reachability check.
    async fn ping(&self) -> StorageResult<()>;
}

#[async_trait]
impl<T: VectorStore + ?Sized> VectorStore for Arc<T> {
    async fn replace_collection(&self, collection_id: &str, title: &str) -> StorageResult<()> {
        (**self).replace_collection(collection_id, title).await
    }

    async fn upsert(&self, collection_id: &str, records: &[VectorRecord]) -> StorageResult<()> {
        (**self).upsert(collection_id, records).await
    }

    async fn query(
        &self,
        collection_id: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> StorageResult<Vec<VectorMatch>> {
        (**self).query(collection_id, query_vector, k, filter).await
    }

    async fn mark_complete(&self, collection_id: &str) -> StorageResult<()> {
        (**self).mark_complete(collection_id).await
    }

    async fn delete_collection(&self, collection_id: &str) -> StorageResult<()> {
        (**self).delete_collection(collection_id).await
    }

    async fn list_collections(&self) -> StorageResult<Vec<CollectionInfo>> {
        (**self).list_collections().await
    }

    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        (**self).store_config(config).await
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        (**self).get_config().await
    }

    async fn ping(&self) -> StorageResult<()> {
        (**self).ping().await
    }
}

/// Compute cosine similarity between two vectors.
///
/// Cosine similarity is the cosine of the angle between two non-zero vectors
/// and ranges from -1 to 1, where 1 means the vectors point in the same
/// direction.
///
/// # Returns
/// The cosine similarity, or 0.0 when the lengths differ or either vector
/// has zero magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Rank candidate records against a query vector.
///
/// Shared by the brute-force backends: filters, scores, sorts by descending
/// score (ties broken by document order) and truncates to `k`.
pub(crate) fn rank_records<'a, I>(
    records: I,
    query_vector: &[f32],
    k: usize,
    filter: Option<&QueryFilter>,
) -> Vec<VectorMatch>
where
    I: IntoIterator<Item = &'a VectorRecord>,
{
    let mut matches: Vec<VectorMatch> = records
        .into_iter()
        .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
        .map(|r| VectorMatch {
            chunk_id: r.chunk_id.clone(),
            score: cosine_similarity(query_vector, &r.vector),
            metadata: r.metadata.clone(),
            text: r.text.clone(),
        })
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.metadata.order_index.cmp(&b.metadata.order_index))
    });
    matches.truncate(k);
    matches
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;

    pub fn record(paper_id: &str, order_index: usize, section: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk_id: crate::models::Chunk::make_id(paper_id, order_index),
            vector,
            metadata: ChunkMetadata {
                paper_id: paper_id.to_string(),
                section_path: section.to_string(),
                chunk_type: ChunkType::Section,
                section_kind: SectionKind::classify(section),
                order_index,
                token_count: 10,
                preview_text: String::new(),
                review_text: String::new(),
            },
            text: format!("{} text {}", section, order_index),
        }
    }

    /// Store whose every call fails as unreachable.
    pub struct DownStore;

    #[async_trait]
    impl VectorStore for DownStore {
        async fn replace_collection(&self, _: &str, _: &str) -> StorageResult<()> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
        async fn upsert(&self, _: &str, _: &[VectorRecord]) -> StorageResult<()> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
        async fn query(
            &self,
            _: &str,
            _: &[f32],
            _: usize,
            _: Option<&QueryFilter>,
        ) -> StorageResult<Vec<VectorMatch>> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
        async fn mark_complete(&self, _: &str) -> StorageResult<()> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
        async fn delete_collection(&self, _: &str) -> StorageResult<()> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
        async fn list_collections(&self) -> StorageResult<Vec<CollectionInfo>> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
        async fn store_config(&self, _: &EmbeddingConfig) -> StorageResult<()> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
        async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
        async fn ping(&self) -> StorageResult<()> {
            Err(StorageError::ConnectionError("down".to_string()))
        }
    }
}
