//! Document source module.
//!
//! PDF structural extraction happens outside this crate. Whatever performs it
//! hands over one [`DocumentStructure`] tree per paper; the [`DocumentSource`]
//! trait abstracts where those trees come from (JSON files on disk, an
//! extraction service, a test fixture) so the indexing CLI is not coupled to
//! a specific collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunking::DocumentStructure;

pub mod json;

/// Errors that can occur when fetching structured documents.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to read from the data source
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the data format
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A structured paper together with the id it is indexed under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    pub paper_id: String,

    #[serde(flatten)]
    pub document: DocumentStructure,
}

/// Trait for sourcing structured documents.
///
/// # Design Notes
///
/// - Sources return documents in a stable order so that repeated runs index
///   papers in the same sequence
/// - Sources do not validate tree contents; the chunker does that and names
///   the offending node
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch all available documents from this source.
    ///
    /// # Errors
    /// Returns `ProviderError` if documents cannot be read or parsed
    async fn fetch_documents(&self) -> ProviderResult<Vec<SourceDocument>>;

    /// Fetch at most `limit` documents, useful for trial runs.
    async fn fetch_documents_limit(&self, limit: usize) -> ProviderResult<Vec<SourceDocument>> {
        let all = self.fetch_documents().await?;
        Ok(all.into_iter().take(limit).collect())
    }

    /// Human-readable description of this source, for logging.
    fn name(&self) -> &str;
}
