//! Service facade: the two core entry points plus paper management.
//!
//! [`ResearchService`] wires the catalog, the indexing pipeline and the
//! query orchestrator over one embedding provider, one vector store and one
//! inference backend. Every operation reports failures as [`CoreError`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::agents::{Analyzer, Decomposer, Synthesizer};
use crate::chunking::{Chunker, DocumentStructure};
use crate::config::{AppConfig, EmbeddingBackend, StoreBackend};
use crate::embedding::fastembed::FastEmbedProvider;
use crate::embedding::openai::OpenAIEmbedding;
use crate::embedding::{AnyEmbeddingProvider, EmbeddingProvider};
use crate::error::{CoreError, CoreResult};
use crate::inference::openai_compat::OpenAICompatInference;
use crate::inference::InferenceProvider;
use crate::ingestion::IndexingPipeline;
use crate::models::{IndexReport, Paper, PaperStatus, Source};
use crate::orchestrator::Orchestrator;
use crate::query::VectorRetriever;
use crate::storage::catalog::PaperCatalog;
use crate::storage::memory::InMemoryVectorStore;
use crate::storage::sqlite::SqliteVectorStore;
use crate::storage::{StorageError, VectorStore};

/// Largest `n_results` accepted per query.
pub const MAX_RESULTS: usize = 50;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

fn default_n_results() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    pub question: String,

    /// Chunks retrieved per target paper
    #[serde(default = "default_n_results")]
    pub n_results: usize,

    /// Restrict the question to one paper
    #[serde(default)]
    pub paper_filter: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            n_results: default_n_results(),
            paper_filter: None,
        }
    }

    pub fn with_n_results(mut self, n_results: usize) -> Self {
        self.n_results = n_results;
        self
    }

    pub fn for_paper(mut self, paper_id: impl Into<String>) -> Self {
        self.paper_filter = Some(paper_id.into());
        self
    }
}

/// How one target paper fared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperOutcome {
    pub paper_id: String,
    pub had_evidence: bool,
    pub local_confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub confidence: f32,
    pub correlation_id: String,
    pub processing_time_ms: u64,
    /// True when several papers were targeted
    pub comparison: bool,
    pub papers: Vec<PaperOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperInfo {
    pub paper_id: String,
    pub title: String,
    pub status: PaperStatus,
    pub num_chunks: usize,
    pub indexed_at: Option<DateTime<Utc>>,
}

impl From<Paper> for PaperInfo {
    fn from(paper: Paper) -> Self {
        Self {
            paper_id: paper.paper_id,
            title: paper.title,
            status: paper.status,
            num_chunks: paper.num_chunks,
            indexed_at: paper.indexed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    Ok,
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    pub vector_store: ComponentHealth,
    pub inference: ComponentHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.vector_store == ComponentHealth::Ok && self.inference == ComponentHealth::Ok
    }
}

fn validate_paper_id(paper_id: &str) -> CoreResult<()> {
    if paper_id.trim().is_empty() || paper_id.contains(char::is_whitespace) {
        return Err(CoreError::Validation(format!(
            "paper id must be non-empty without whitespace, got '{}'",
            paper_id
        )));
    }
    Ok(())
}

pub struct ResearchService {
    catalog: PaperCatalog,
    pipeline: IndexingPipeline<Arc<dyn EmbeddingProvider>, Arc<dyn VectorStore>>,
    orchestrator: Orchestrator,
    store: Arc<dyn VectorStore>,
    inference: Arc<dyn InferenceProvider>,
}

impl ResearchService {
    /// Build the production providers named by the configuration.
    pub async fn from_config(config: &AppConfig) -> CoreResult<Self> {
        config.validate()?;

        let embedding: Arc<dyn EmbeddingProvider> = Arc::new(build_embedding(config)?);
        let store: Arc<dyn VectorStore> = match config.store.backend {
            StoreBackend::Sqlite => {
                info!(path = %config.store.path.display(), "Opening SQLite vector store");
                Arc::new(SqliteVectorStore::open(&config.store.path)?)
            }
            StoreBackend::Memory => Arc::new(InMemoryVectorStore::new()),
        };
        let inference: Arc<dyn InferenceProvider> = Arc::new(OpenAICompatInference::new(
            config.inference.base_url.clone(),
            config.inference.api_key.clone(),
            config.inference.model.clone(),
            config.inference.timeout_secs,
        ));

        Self::from_parts(embedding, store, inference, config).await
    }

    /// Wire a service over already constructed providers.
    ///
    /// Pins the embedding configuration in a fresh store (or checks it
    /// against an existing one) and hydrates the paper catalog.
    pub async fn from_parts(
        embedding: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        inference: Arc<dyn InferenceProvider>,
        config: &AppConfig,
    ) -> CoreResult<Self> {
        config.validate()?;
        let generation = config.inference.generation();

        let pipeline = IndexingPipeline::open(
            Arc::clone(&embedding),
            Arc::clone(&store),
            Chunker::new(config.chunking.clone()),
            config.indexing.clone(),
        )
        .await?;

        let retriever = VectorRetriever::new(embedding, Arc::clone(&store), config.retrieval.clone())
            .with_timeout(Duration::from_secs(config.embedding.timeout_secs));

        let orchestrator = Orchestrator::new(
            Decomposer::new(Arc::clone(&inference), generation, config.decomposer.clone()),
            Analyzer::new(
                Arc::new(retriever),
                Arc::clone(&inference),
                generation,
                config.analysis.clone(),
            ),
            Synthesizer::new(Arc::clone(&inference), generation),
            Arc::clone(&store),
            config.orchestrator.clone(),
        );

        let catalog = PaperCatalog::new();
        catalog.hydrate(store.as_ref()).await?;

        Ok(Self {
            catalog,
            pipeline,
            orchestrator,
            store,
            inference,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Index (or re-index) one paper.
    ///
    /// The paper ends `indexed` on success and `failed` otherwise; a partial
    /// write is reported as an error naming the uncommitted chunks.
    pub async fn index_paper(&self, paper_id: &str, document: &DocumentStructure) -> CoreResult<IndexReport> {
        validate_paper_id(paper_id)?;

        let title = if document.title.trim().is_empty() {
            paper_id
        } else {
            document.title.trim()
        };
        self.catalog.register(paper_id, title).await;
        self.catalog.set_status(paper_id, PaperStatus::Processing, 0).await?;

        match self.pipeline.index_paper(paper_id, document).await {
            Err(e) => {
                error!(paper_id, error = %e, "Indexing failed");
                self.catalog.set_status(paper_id, PaperStatus::Failed, 0).await?;
                Err(e.into())
            }
            Ok(report) if report.status == PaperStatus::Failed => {
                self.catalog
                    .set_status(paper_id, PaperStatus::Failed, report.num_chunks)
                    .await?;
                Err(CoreError::TransientProvider(format!(
                    "indexing of '{}' stopped after {} chunks; uncommitted: {}",
                    paper_id,
                    report.num_chunks,
                    report.failed_chunk_ids.join(", ")
                )))
            }
            Ok(report) => {
                self.catalog
                    .set_status(paper_id, PaperStatus::Indexed, report.num_chunks)
                    .await?;
                info!(paper_id, num_chunks = report.num_chunks, "Paper indexed");
                Ok(report)
            }
        }
    }

    /// Answer a question over the indexed papers.
    ///
    /// # Errors
    /// * `CoreError::Validation` - empty question or `n_results` out of range
    /// * `CoreError::NotFound` - no indexed paper, or the filtered paper is
    ///   unknown or not indexed
    /// * `CoreError::TransientProvider` - the vector store is unreachable
    pub async fn answer_query(&self, request: &QueryRequest) -> CoreResult<QueryResponse> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(CoreError::Validation("question is empty".to_string()));
        }
        if request.n_results == 0 || request.n_results > MAX_RESULTS {
            return Err(CoreError::Validation(format!(
                "n_results must be between 1 and {}",
                MAX_RESULTS
            )));
        }

        let candidates = match &request.paper_filter {
            Some(paper_id) => match self.catalog.get(paper_id).await {
                Some(paper) if paper.is_indexed() => vec![paper],
                Some(paper) => {
                    return Err(CoreError::NotFound(format!(
                        "paper '{}' is {}, not indexed",
                        paper_id, paper.status
                    )))
                }
                None => return Err(CoreError::NotFound(format!("unknown paper '{}'", paper_id))),
            },
            None => self.catalog.indexed().await,
        };

        let answer = self.orchestrator.answer(question, &candidates, request.n_results).await?;

        let papers = answer
            .analyses
            .iter()
            .map(|a| PaperOutcome {
                paper_id: a.paper_id.clone(),
                had_evidence: a.had_evidence,
                local_confidence: a.local_confidence,
                failure: a.failure.as_ref().map(|f| f.to_string()),
            })
            .collect();

        Ok(QueryResponse {
            answer: answer.synthesis.answer_text,
            sources: answer.synthesis.sources,
            confidence: answer.synthesis.confidence,
            correlation_id: answer.correlation_id.to_string(),
            processing_time_ms: answer.elapsed.as_millis() as u64,
            comparison: answer.plan.comparison_requested,
            papers,
        })
    }

    /// Record an uploaded paper ahead of indexing.
    pub async fn register_paper(&self, paper_id: &str, title: &str) -> CoreResult<PaperInfo> {
        validate_paper_id(paper_id)?;
        Ok(self.catalog.register(paper_id, title.trim()).await.into())
    }

    pub async fn list_papers(&self) -> Vec<PaperInfo> {
        self.catalog.list().await.into_iter().map(PaperInfo::from).collect()
    }

    /// Drop a paper's collection and catalog entry.
    pub async fn remove_paper(&self, paper_id: &str) -> CoreResult<()> {
        if self.catalog.get(paper_id).await.is_none() {
            return Err(CoreError::NotFound(format!("unknown paper '{}'", paper_id)));
        }

        match self.store.delete_collection(paper_id).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.catalog.remove(paper_id).await;
        info!(paper_id, "Paper removed");
        Ok(())
    }

    /// Check the vector store and the inference backend.
    pub async fn health(&self) -> HealthReport {
        let vector_store = match timeout(HEALTH_TIMEOUT, self.store.ping()).await {
            Ok(Ok(())) => ComponentHealth::Ok,
            Ok(Err(e)) => {
                warn!(error = %e, "Vector store health check failed");
                ComponentHealth::Unreachable
            }
            Err(_) => ComponentHealth::Unreachable,
        };
        let inference = match timeout(HEALTH_TIMEOUT, self.inference.ping()).await {
            Ok(Ok(())) => ComponentHealth::Ok,
            Ok(Err(e)) => {
                warn!(error = %e, model = self.inference.model_name(), "Inference health check failed");
                ComponentHealth::Unreachable
            }
            Err(_) => ComponentHealth::Unreachable,
        };
        HealthReport {
            vector_store,
            inference,
        }
    }
}

fn build_embedding(config: &AppConfig) -> CoreResult<AnyEmbeddingProvider> {
    let settings = &config.embedding;
    let provider = match settings.backend {
        EmbeddingBackend::FastEmbed => {
            let cache_dir = settings
                .cache_dir
                .clone()
                .or_else(|| dirs::cache_dir().map(|p| p.join("fastembed")));
            AnyEmbeddingProvider::FastEmbed(FastEmbedProvider::from_name(settings.model.as_deref(), cache_dir)?)
        }
        EmbeddingBackend::OpenAI => {
            let api_key = settings
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            let mut provider = OpenAIEmbedding::new(
                settings.base_url.clone(),
                api_key,
                settings.model.clone(),
                settings.timeout_secs,
            );
            if let Some(dimension) = settings.dimension {
                provider = provider.with_dimension(dimension);
            }
            AnyEmbeddingProvider::OpenAI(provider)
        }
    };
    info!(
        model = provider.model_name(),
        dimension = provider.dimension(),
        "Embedding provider ready"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::ScriptedInference;
    use crate::chunking::SectionNode;
    use crate::embedding::EmbeddingResult;
    use crate::storage::test_support::DownStore;
    use async_trait::async_trait;

    /// Embedding fake: bag of words hashed into 16 buckets.
    struct HashEmbedding;

    #[async_trait]
    impl EmbeddingProvider for HashEmbedding {
        async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
            let mut v = vec![0.0; 16];
            for word in text.split_whitespace() {
                let bucket = word.bytes().map(usize::from).sum::<usize>() % 16;
                v[bucket] += 1.0;
            }
            Ok(v)
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            16
        }

        fn model_name(&self) -> &str {
            "hash-16"
        }
    }

    fn document(title: &str) -> DocumentStructure {
        DocumentStructure {
            title: title.to_string(),
            abstract_text: "We study attention.".to_string(),
            sections: vec![
                SectionNode::new("Introduction", "Attention mechanisms are popular."),
                SectionNode::new("Methods", "We train a transformer encoder."),
            ],
            ..Default::default()
        }
    }

    async fn service(store: Arc<dyn VectorStore>, inference: ScriptedInference) -> ResearchService {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Memory;
        ResearchService::from_parts(Arc::new(HashEmbedding), store, Arc::new(inference), &config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_then_list() {
        let svc = service(Arc::new(InMemoryVectorStore::new()), ScriptedInference::new(vec![])).await;
        let report = svc.index_paper("p1", &document("Attention")).await.unwrap();
        assert_eq!(report.status, PaperStatus::Indexed);
        assert!(report.num_chunks >= 3);

        let papers = svc.list_papers().await;
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].title, "Attention");
        assert_eq!(papers[0].status, PaperStatus::Indexed);
        assert_eq!(papers[0].num_chunks, report.num_chunks);
        assert!(papers[0].indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_invalid_document_leaves_paper_failed() {
        let svc = service(Arc::new(InMemoryVectorStore::new()), ScriptedInference::new(vec![])).await;
        let mut doc = document("Broken");
        doc.sections[1].heading = "  ".to_string();

        let err = svc.index_paper("p1", &doc).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(svc.list_papers().await[0].status, PaperStatus::Failed);
    }

    #[tokio::test]
    async fn test_query_without_indexed_papers_is_not_found() {
        let inference = ScriptedInference::new(vec![]);
        let svc = service(Arc::new(InMemoryVectorStore::new()), inference.clone()).await;
        svc.register_paper("p1", "Uploaded only").await.unwrap();

        let err = svc.answer_query(&QueryRequest::new("What is it?")).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = svc
            .answer_query(&QueryRequest::new("What is it?").for_paper("p1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(inference.call_count(), 0);
    }

    #[tokio::test]
    async fn test_query_validation() {
        let svc = service(Arc::new(InMemoryVectorStore::new()), ScriptedInference::new(vec![])).await;
        let err = svc.answer_query(&QueryRequest::new("   ")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = svc.answer_query(&QueryRequest::new("q").with_n_results(0)).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_filtered_query_targets_one_paper() {
        let inference = ScriptedInference::new(vec![
            Ok(r#"{"explicit": true, "targets": [{"paper_id": "p1", "sub_question": "What model does p1 train?"}]}"#.to_string()),
            Ok(r#"{"answerable": true, "summary": "A transformer encoder.", "citations": ["C1"]}"#.to_string()),
        ]);
        let svc = service(Arc::new(InMemoryVectorStore::new()), inference.clone()).await;
        svc.index_paper("p1", &document("Attention")).await.unwrap();
        svc.index_paper("p2", &document("Other")).await.unwrap();

        let response = svc
            .answer_query(&QueryRequest::new("What model do they train?").for_paper("p1"))
            .await
            .unwrap();

        assert!(!response.comparison);
        assert_eq!(response.papers.len(), 1);
        assert_eq!(response.answer, "A transformer encoder.");
        assert!(!response.sources.is_empty());
        assert!(response.sources.iter().all(|s| s.paper_id == "p1"));
        assert!(response.confidence > 0.0 && response.confidence <= 1.0);
        // One plan call, one analyzer call, no comparative synthesis
        assert_eq!(inference.call_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_paper() {
        let svc = service(Arc::new(InMemoryVectorStore::new()), ScriptedInference::new(vec![])).await;
        svc.index_paper("p1", &document("Attention")).await.unwrap();
        svc.register_paper("p2", "Never indexed").await.unwrap();

        svc.remove_paper("p1").await.unwrap();
        svc.remove_paper("p2").await.unwrap();
        assert!(svc.list_papers().await.is_empty());
        assert_eq!(svc.remove_paper("p1").await.unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_store() {
        let svc = service(Arc::new(InMemoryVectorStore::new()), ScriptedInference::new(vec![])).await;
        assert!(svc.health().await.is_healthy());

        let config = AppConfig::default();
        let result = ResearchService::from_parts(
            Arc::new(HashEmbedding),
            Arc::new(DownStore),
            Arc::new(ScriptedInference::new(vec![])),
            &config,
        )
        .await;
        assert_eq!(result.err().map(|e| e.kind()), Some("transient_provider"));
    }

    #[tokio::test]
    async fn test_rejects_paper_id_with_whitespace() {
        let svc = service(Arc::new(InMemoryVectorStore::new()), ScriptedInference::new(vec![])).await;
        assert_eq!(
            svc.register_paper("my paper", "t").await.unwrap_err().kind(),
            "validation"
        );
    }
}
