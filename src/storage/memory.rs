//! In-memory vector store.
//!
//! Keeps every collection in a process-local map. Used by tests, demos and
//! single-shot CLI runs where persistence is not wanted.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    rank_records, CollectionInfo, QueryFilter, StorageError, StorageResult, VectorMatch,
    VectorRecord, VectorStore,
};
use crate::models::EmbeddingConfig;

#[derive(Debug, Default)]
struct Collection {
    title: String,
    records: Vec<VectorRecord>,
    /// Position of each chunk id in `records`
    positions: HashMap<String, usize>,
    complete: bool,
}

/// Process-local implementation of [`VectorStore`].
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    config: RwLock<Option<EmbeddingConfig>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn replace_collection(&self, collection_id: &str, title: &str) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        collections.insert(
            collection_id.to_string(),
            Collection {
                title: title.to_string(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn upsert(&self, collection_id: &str, records: &[VectorRecord]) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(collection_id)
            .ok_or_else(|| StorageError::NotFound(format!("Collection '{}'", collection_id)))?;

        for record in records {
            match collection.positions.get(&record.chunk_id) {
                Some(&at) => collection.records[at] = record.clone(),
                None => {
                    collection
                        .positions
                        .insert(record.chunk_id.clone(), collection.records.len());
                    collection.records.push(record.clone());
                }
            }
        }
        Ok(())
    }

    async fn mark_complete(&self, collection_id: &str) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(collection_id)
            .ok_or_else(|| StorageError::NotFound(format!("Collection '{}'", collection_id)))?;
        collection.complete = true;
        Ok(())
    }

    async fn query(
        &self,
        collection_id: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> StorageResult<Vec<VectorMatch>> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(collection_id)
            .ok_or_else(|| StorageError::NotFound(format!("Collection '{}'", collection_id)))?;
        Ok(rank_records(&collection.records, query_vector, k, filter))
    }

    async fn delete_collection(&self, collection_id: &str) -> StorageResult<()> {
        self.collections
            .write()
            .await
            .remove(collection_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("Collection '{}'", collection_id)))
    }

    async fn list_collections(&self) -> StorageResult<Vec<CollectionInfo>> {
        let collections = self.collections.read().await;
        Ok(collections
            .iter()
            .map(|(id, c)| CollectionInfo {
                collection_id: id.clone(),
                title: c.title.clone(),
                num_chunks: c.records.len(),
                complete: c.complete,
            })
            .collect())
    }

    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        Ok(self.config.read().await.clone())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
