//! In-process registry of papers and their lifecycle status.
//!
//! The catalog is the source of truth for "which papers are indexed" on the
//! query path. On startup it can be hydrated from the vector store: a
//! collection marked complete is a paper that finished indexing in a previous
//! run, anything else was interrupted and comes back as failed.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{StorageError, StorageResult, VectorStore};
use crate::models::{Paper, PaperStatus};

#[derive(Debug, Default)]
pub struct PaperCatalog {
    papers: RwLock<BTreeMap<String, Paper>>,
}

impl PaperCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uploaded paper, or refresh the title of a known one.
    ///
    /// A known paper keeps its status: re-registering does not un-index it.
    pub async fn register(&self, paper_id: &str, title: &str) -> Paper {
        let mut papers = self.papers.write().await;
        let paper = papers
            .entry(paper_id.to_string())
            .and_modify(|p| p.title = title.to_string())
            .or_insert_with(|| Paper::uploaded(paper_id, title));
        paper.clone()
    }

    pub async fn get(&self, paper_id: &str) -> Option<Paper> {
        self.papers.read().await.get(paper_id).cloned()
    }

    /// Move a paper to a new status.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` for an unknown paper id
    pub async fn set_status(
        &self,
        paper_id: &str,
        status: PaperStatus,
        num_chunks: usize,
    ) -> StorageResult<Paper> {
        let mut papers = self.papers.write().await;
        let paper = papers
            .get_mut(paper_id)
            .ok_or_else(|| StorageError::NotFound(format!("Paper '{}'", paper_id)))?;

        debug!(paper_id, from = %paper.status, to = %status, "Paper status transition");
        paper.status = status;
        paper.num_chunks = num_chunks;
        if status == PaperStatus::Indexed {
            paper.indexed_at = Some(Utc::now());
        }
        Ok(paper.clone())
    }

    pub async fn remove(&self, paper_id: &str) -> Option<Paper> {
        self.papers.write().await.remove(paper_id)
    }

    /// All known papers ordered by id.
    pub async fn list(&self) -> Vec<Paper> {
        self.papers.read().await.values().cloned().collect()
    }

    /// Papers currently queryable, ordered by id.
    pub async fn indexed(&self) -> Vec<Paper> {
        self.papers
            .read()
            .await
            .values()
            .filter(|p| p.is_indexed())
            .cloned()
            .collect()
    }

    /// Register the store's collections as papers.
    ///
    /// Complete collections become `Indexed`. Collections left behind by an
    /// interrupted or failed run become `Failed` with their committed chunk
    /// count, so they stay out of the query path until re-indexed. Papers
    /// already present in the catalog are left untouched.
    ///
    /// # Returns
    /// The number of papers added
    pub async fn hydrate<S: VectorStore + ?Sized>(&self, store: &S) -> StorageResult<usize> {
        let collections = store.list_collections().await?;
        let mut papers = self.papers.write().await;
        let mut added = 0;

        for info in collections {
            if papers.contains_key(&info.collection_id) {
                continue;
            }
            let mut paper = Paper::uploaded(info.collection_id.clone(), info.title);
            paper.status = if info.complete {
                PaperStatus::Indexed
            } else {
                debug!(paper_id = %info.collection_id, num_chunks = info.num_chunks, "Collection never completed");
                PaperStatus::Failed
            };
            paper.num_chunks = info.num_chunks;
            papers.insert(info.collection_id, paper);
            added += 1;
        }

        info!(added, "Hydrated paper catalog from vector store");
        Ok(added)
    }
}
