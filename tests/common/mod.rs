//! Deterministic providers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paper_qa::agents::prompts::{ANALYZER_SYSTEM, DECOMPOSER_SYSTEM};
use paper_qa::chunking::SectionNode;
use paper_qa::config::{AppConfig, StoreBackend};
use paper_qa::embedding::{EmbeddingProvider, EmbeddingResult};
use paper_qa::inference::{GenerationRequest, InferenceError, InferenceProvider, InferenceResult};
use paper_qa::models::EmbeddingConfig;
use paper_qa::storage::memory::InMemoryVectorStore;
use paper_qa::storage::{
    CollectionInfo, QueryFilter, StorageError, StorageResult, VectorMatch, VectorRecord, VectorStore,
};
use paper_qa::{DocumentStructure, ResearchService};

pub const DIMENSION: usize = 64;

/// Bag-of-words embedding hashed into fixed buckets.
pub struct KeywordEmbedding;

impl KeywordEmbedding {
    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIMENSION];
        for word in text.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if word.is_empty() {
                continue;
            }
            let bucket = word
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(usize::from(b)))
                % DIMENSION;
            v[bucket] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "keyword-64"
    }
}

/// Inference fake answering per agent role.
///
/// The decomposer gets a fixed plan, after `plan_outages` unreachable-backend
/// errors. The analyzer answers from the excerpts it is shown, and stalls
/// when they contain `slow_marker`.
pub struct FakeInference {
    plan: String,
    slow_marker: Option<String>,
    plan_outages: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeInference {
    pub fn new(plan: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            plan: plan.into(),
            slow_marker: None,
            plan_outages: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn stalling_on(plan: impl Into<String>, marker: &str) -> Arc<Self> {
        Arc::new(Self {
            plan: plan.into(),
            slow_marker: Some(marker.to_string()),
            plan_outages: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// Fail the first `outages` plan requests as unreachable.
    pub fn unreachable_for_plans(plan: impl Into<String>, outages: usize) -> Arc<Self> {
        Arc::new(Self {
            plan: plan.into(),
            slow_marker: None,
            plan_outages: AtomicUsize::new(outages),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for FakeInference {
    async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if request.system == DECOMPOSER_SYSTEM {
            let outage = self
                .plan_outages
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if outage {
                return Err(InferenceError::Unavailable("connection refused".to_string()));
            }
            return Ok(self.plan.clone());
        }
        if request.system == ANALYZER_SYSTEM {
            if let Some(marker) = &self.slow_marker {
                if request.prompt.contains(marker.as_str()) {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
            let summary = if request.prompt.contains("[C2]") {
                "The method is described in the excerpts [C1] [C2]."
            } else {
                "The method is described in the excerpt [C1]."
            };
            return Ok(format!(
                r#"{{"answerable": true, "summary": "{}", "citations": ["C1", "C2"]}}"#,
                summary
            ));
        }
        Ok("Both papers train neural encoders; they differ in their objectives.".to_string())
    }

    async fn ping(&self) -> InferenceResult<()> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        "fake"
    }
}

/// A paper with an overview and `sections` flat sections, one chunk each.
pub fn paper(title: &str, marker: &str, sections: usize) -> DocumentStructure {
    let headings = [
        "Introduction",
        "Related Work",
        "Method",
        "Experiments",
        "Results",
        "Analysis",
        "Limitations",
        "Discussion",
        "Conclusion",
    ];
    DocumentStructure {
        title: title.to_string(),
        abstract_text: format!("We present {} a {} model for text.", title, marker),
        sections: headings
            .iter()
            .cycle()
            .take(sections)
            .enumerate()
            .map(|(i, h)| {
                SectionNode::new(
                    format!("{} {}", h, i + 1),
                    format!("The {} method trains an encoder on corpus {}. Contribution {}.", marker, i, i),
                )
            })
            .collect(),
        ..Default::default()
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.store.backend = StoreBackend::Memory;
    config.inference.backoff_ms = 1;
    config
}

/// In-memory store whose queries fail while `down` is set. Pings keep
/// answering, so the outage only shows once analyzers retrieve.
#[derive(Default)]
pub struct OutageStore {
    inner: InMemoryVectorStore,
    down: AtomicBool,
}

impl OutageStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStore for OutageStore {
    async fn replace_collection(&self, collection_id: &str, title: &str) -> StorageResult<()> {
        self.inner.replace_collection(collection_id, title).await
    }

    async fn upsert(&self, collection_id: &str, records: &[VectorRecord]) -> StorageResult<()> {
        self.inner.upsert(collection_id, records).await
    }

    async fn query(
        &self,
        collection_id: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> StorageResult<Vec<VectorMatch>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionError("connection reset by peer".to_string()));
        }
        self.inner.query(collection_id, query_vector, k, filter).await
    }

    async fn mark_complete(&self, collection_id: &str) -> StorageResult<()> {
        self.inner.mark_complete(collection_id).await
    }

    async fn delete_collection(&self, collection_id: &str) -> StorageResult<()> {
        self.inner.delete_collection(collection_id).await
    }

    async fn list_collections(&self) -> StorageResult<Vec<CollectionInfo>> {
        self.inner.list_collections().await
    }

    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        self.inner.store_config(config).await
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        self.inner.get_config().await
    }

    async fn ping(&self) -> StorageResult<()> {
        self.inner.ping().await
    }
}

pub async fn service_with(
    store: Arc<dyn VectorStore>,
    inference: Arc<FakeInference>,
    config: &AppConfig,
) -> ResearchService {
    ResearchService::from_parts(Arc::new(KeywordEmbedding), store, inference, config)
        .await
        .expect("service wiring")
}

pub async fn memory_service(inference: Arc<FakeInference>) -> ResearchService {
    service_with(Arc::new(InMemoryVectorStore::new()), inference, &test_config()).await
}
