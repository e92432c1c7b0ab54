//! Cross-module error taxonomy.
//!
//! Module errors carry backend detail; [`CoreError`] is what the service
//! surface reports. Conversions classify each module error into one of five
//! kinds so callers can decide between retrying, fixing input, or giving up.

use thiserror::Error;

use crate::agents::DecomposeError;
use crate::chunking::ChunkingError;
use crate::embedding::EmbeddingError;
use crate::inference::InferenceError;
use crate::ingestion::IndexingError;
use crate::provider::ProviderError;
use crate::query::RetrievalError;
use crate::storage::StorageError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Malformed document, plan or request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown paper id, or nothing indexed to answer from
    #[error("Not found: {0}")]
    NotFound(String),

    /// An embedding, inference or vector store call failed; retryable
    #[error("Provider error: {0}")]
    TransientProvider(String),

    /// Agent output did not match the expected structure
    #[error("Schema parse error: {0}")]
    SchemaParse(String),

    /// Deadline or concurrency limit exceeded
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl CoreError {
    /// Short machine-readable kind, for logs and DTOs.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::NotFound(_) => "not_found",
            CoreError::TransientProvider(_) => "transient_provider",
            CoreError::SchemaParse(_) => "schema_parse",
            CoreError::ResourceExhausted(_) => "resource_exhausted",
        }
    }
}

/// Result type for service operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<ChunkingError> for CoreError {
    fn from(e: ChunkingError) -> Self {
        CoreError::Validation(e.to_string())
    }
}

impl From<EmbeddingError> for CoreError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::InvalidInput(_) | EmbeddingError::ConfigError(_) => {
                CoreError::Validation(e.to_string())
            }
            EmbeddingError::Timeout(_) => CoreError::ResourceExhausted(e.to_string()),
            EmbeddingError::ApiError(_) | EmbeddingError::Other(_) => {
                CoreError::TransientProvider(e.to_string())
            }
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => CoreError::NotFound(e.to_string()),
            StorageError::SchemaError(_) => CoreError::Validation(e.to_string()),
            _ => CoreError::TransientProvider(e.to_string()),
        }
    }
}

impl From<InferenceError> for CoreError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::Timeout(_) => CoreError::ResourceExhausted(e.to_string()),
            InferenceError::ConfigError(_) => CoreError::Validation(e.to_string()),
            InferenceError::InvalidResponse(_) => CoreError::SchemaParse(e.to_string()),
            InferenceError::ApiError(_) | InferenceError::Unavailable(_) => {
                CoreError::TransientProvider(e.to_string())
            }
        }
    }
}

impl From<RetrievalError> for CoreError {
    fn from(e: RetrievalError) -> Self {
        match e {
            RetrievalError::NotIndexed(_) => CoreError::NotFound(e.to_string()),
            RetrievalError::InvalidQuery(_) => CoreError::Validation(e.to_string()),
            RetrievalError::Timeout(_) => CoreError::ResourceExhausted(e.to_string()),
            RetrievalError::EmbeddingError(_)
            | RetrievalError::Unavailable(_)
            | RetrievalError::StorageError(_) => CoreError::TransientProvider(e.to_string()),
        }
    }
}

impl From<ProviderError> for CoreError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::IoError(_) => CoreError::TransientProvider(e.to_string()),
            ProviderError::ParseError(_) | ProviderError::ConfigError(_) => {
                CoreError::Validation(e.to_string())
            }
        }
    }
}

impl From<DecomposeError> for CoreError {
    fn from(e: DecomposeError) -> Self {
        match e {
            DecomposeError::NoDocumentsAvailable => CoreError::NotFound(e.to_string()),
        }
    }
}

impl From<IndexingError> for CoreError {
    fn from(e: IndexingError) -> Self {
        match e {
            IndexingError::InvalidDocument(inner) => inner.into(),
            IndexingError::StorageError(inner) => inner.into(),
            IndexingError::ConfigMismatch(_) | IndexingError::InvalidInput(_) => {
                CoreError::Validation(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let e: CoreError = ChunkingError::InvalidPaperId("".into()).into();
        assert_eq!(e.kind(), "validation");

        let e: CoreError = StorageError::NotFound("p1".into()).into();
        assert_eq!(e.kind(), "not_found");

        let e: CoreError = StorageError::ConnectionError("refused".into()).into();
        assert_eq!(e.kind(), "transient_provider");

        let e: CoreError = InferenceError::Timeout(30).into();
        assert_eq!(e.kind(), "resource_exhausted");

        let e: CoreError = InferenceError::InvalidResponse("no choices".into()).into();
        assert_eq!(e.kind(), "schema_parse");

        let e: CoreError = RetrievalError::NotIndexed("p2".into()).into();
        assert_eq!(e.kind(), "not_found");

        let e: CoreError = EmbeddingError::ApiError("502".into()).into();
        assert_eq!(e.kind(), "transient_provider");

        let e: CoreError = DecomposeError::NoDocumentsAvailable.into();
        assert_eq!(e.kind(), "not_found");

        let e: CoreError = IndexingError::ConfigMismatch("dimension".into()).into();
        assert_eq!(e.kind(), "validation");
    }

    #[test]
    fn test_message_keeps_module_detail() {
        let e: CoreError = StorageError::NotFound("Collection 'p9'".into()).into();
        assert!(e.to_string().contains("p9"));
    }
}
