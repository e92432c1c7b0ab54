//! Core data models for the paper question-answering system.
//!
//! This module contains the fundamental data structures shared across the
//! ingestion path (papers, chunks, vector records) and the query path
//! (decomposition plans, per-paper analyses and synthesized answers).
//!
//! Query-scoped types (`DecompositionPlan`, `AnalysisResult`,
//! `SynthesisResult`) are ephemeral: they live for one request and are never
//! persisted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a paper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    /// Registered but not yet chunked
    Uploaded,

    /// Chunking or indexing in progress
    Processing,

    /// Chunks are embedded and queryable
    Indexed,

    /// Ingestion failed; re-indexing is the recovery path
    Failed,
}

impl PaperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperStatus::Uploaded => "uploaded",
            PaperStatus::Processing => "processing",
            PaperStatus::Indexed => "indexed",
            PaperStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A research paper known to the system.
///
/// Papers are created on upload and mutated only by ingestion. The query path
/// only ever reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paper {
    /// Stable identifier, also used as the vector store collection id
    pub paper_id: String,

    /// Paper title
    pub title: String,

    /// Current lifecycle status
    pub status: PaperStatus,

    /// Number of chunks committed for this paper
    pub num_chunks: usize,

    /// When the paper last finished indexing successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

impl Paper {
    /// Create a freshly uploaded paper.
    pub fn uploaded(paper_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: title.into(),
            status: PaperStatus::Uploaded,
            num_chunks: 0,
            indexed_at: None,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.status == PaperStatus::Indexed
    }
}

/// Structural role of a chunk within its paper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Title, authors and abstract
    Overview,

    /// Body text of a top-level section
    Section,

    /// Body text of a nested section
    Subsection,

    /// A table caption plus its contents
    Table,

    /// A figure caption
    Figure,

    /// A single bibliography entry
    Reference,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Overview => "overview",
            ChunkType::Section => "section",
            ChunkType::Subsection => "subsection",
            ChunkType::Table => "table",
            ChunkType::Figure => "figure",
            ChunkType::Reference => "reference",
        }
    }

    /// Whether this chunk carries narrative text (as opposed to a dedicated
    /// table, figure or reference chunk).
    pub fn is_narrative(&self) -> bool {
        matches!(self, ChunkType::Overview | ChunkType::Section | ChunkType::Subsection)
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overview" => Ok(ChunkType::Overview),
            "section" => Ok(ChunkType::Section),
            "subsection" => Ok(ChunkType::Subsection),
            "table" => Ok(ChunkType::Table),
            "figure" => Ok(ChunkType::Figure),
            "reference" => Ok(ChunkType::Reference),
            other => Err(format!("unknown chunk type '{}'", other)),
        }
    }
}

/// Coarse classification of a section by its heading.
///
/// Used as retrieval metadata so that questions about e.g. methodology can be
/// narrowed to the matching part of each paper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Abstract,
    Introduction,
    Methodology,
    Results,
    Conclusion,
    Other,
}

impl SectionKind {
    /// Classify a section heading.
    ///
    /// # Arguments
    /// * `heading` - The raw heading text (e.g. "3. Experimental Results")
    ///
    /// # Returns
    /// The matching section kind, or `SectionKind::Other`
    pub fn classify(heading: &str) -> Self {
        let heading = heading.to_lowercase();
        if heading.contains("abstract") {
            SectionKind::Abstract
        } else if heading.contains("introduction") {
            SectionKind::Introduction
        } else if heading.contains("method") || heading.contains("approach") {
            SectionKind::Methodology
        } else if heading.contains("result")
            || heading.contains("experiment")
            || heading.contains("evaluation")
        {
            SectionKind::Results
        } else if heading.contains("conclusion") || heading.contains("discussion") {
            SectionKind::Conclusion
        } else {
            SectionKind::Other
        }
    }
}

/// A minimal retrievable unit of a paper's text.
///
/// Chunks are immutable once created. `text` is the chunk's own content;
/// `preview_text` and `review_text` are overlap slices borrowed from the
/// neighbouring chunks of a split section and are empty when the chunk was
/// not produced by splitting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique chunk identifier (`<paper_id>:<order_index>`)
    pub chunk_id: String,

    /// Owning paper
    pub paper_id: String,

    /// Heading path, e.g. "Methods > Data Collection"
    pub section_path: String,

    /// Structural role of the chunk
    pub chunk_type: ChunkType,

    /// Heading classification of the enclosing top-level section
    pub section_kind: SectionKind,

    /// Core text of the chunk
    pub text: String,

    /// Trailing slice of the previous chunk of the same split section
    #[serde(default)]
    pub preview_text: String,

    /// Leading slice of the next chunk of the same split section
    #[serde(default)]
    pub review_text: String,

    /// Position of the chunk in document order, strictly increasing per paper
    pub order_index: usize,

    /// Estimated token count of `text`
    pub token_count: usize,
}

impl Chunk {
    /// Build the canonical chunk id for a paper and position.
    pub fn make_id(paper_id: &str, order_index: usize) -> String {
        format!("{}:{:05}", paper_id, order_index)
    }

    /// Text submitted to the embedding provider.
    ///
    /// The section path is prepended so that headings contribute to the
    /// similarity of otherwise terse chunks (table rows, short paragraphs).
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.section_path, self.text)
    }

    /// Split into the metadata and text stored alongside the vector.
    pub fn to_metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            paper_id: self.paper_id.clone(),
            section_path: self.section_path.clone(),
            chunk_type: self.chunk_type,
            section_kind: self.section_kind,
            order_index: self.order_index,
            token_count: self.token_count,
            preview_text: self.preview_text.clone(),
            review_text: self.review_text.clone(),
        }
    }

    /// Rebuild a chunk from a stored record.
    pub fn from_parts(chunk_id: String, metadata: ChunkMetadata, text: String) -> Self {
        Self {
            chunk_id,
            paper_id: metadata.paper_id,
            section_path: metadata.section_path,
            chunk_type: metadata.chunk_type,
            section_kind: metadata.section_kind,
            text,
            preview_text: metadata.preview_text,
            review_text: metadata.review_text,
            order_index: metadata.order_index,
            token_count: metadata.token_count,
        }
    }
}

/// Metadata stored next to each vector in a paper's collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub paper_id: String,
    pub section_path: String,
    pub chunk_type: ChunkType,
    pub section_kind: SectionKind,
    pub order_index: usize,
    pub token_count: usize,
    #[serde(default)]
    pub preview_text: String,
    #[serde(default)]
    pub review_text: String,
}

/// Relevance classification for retrieved chunks.
///
/// Chunks are categorized by their semantic similarity to the sub-question,
/// allowing callers to understand the quality of matches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Extremely high similarity (cosine similarity > 0.95)
    Identical,

    /// Very high similarity (cosine similarity > 0.85)
    HighlySimilar,

    /// Moderate similarity (cosine similarity > 0.70)
    Similar,

    /// Lower similarity but still above the relevance floor
    Relevant,
}

impl RelevanceLevel {
    /// Determine relevance level from a cosine similarity score.
    ///
    /// # Arguments
    /// * `score` - Cosine similarity score
    ///
    /// # Returns
    /// The appropriate relevance level for the given score
    pub fn from_score(score: f32) -> Self {
        if score > 0.95 {
            RelevanceLevel::Identical
        } else if score > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if score > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }
}

/// A single retrieval hit: a chunk annotated with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// The matched chunk
    pub chunk: Chunk,

    /// Cosine similarity score (higher is better)
    pub score: f32,

    /// Categorical relevance classification
    pub relevance: RelevanceLevel,
}

impl RetrievedChunk {
    /// Create a new retrieval hit from a chunk and similarity score.
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self {
            chunk,
            score,
            relevance: RelevanceLevel::from_score(score),
        }
    }

    pub fn section_path(&self) -> &str {
        &self.chunk.section_path
    }
}

/// Structured plan produced by the decomposer for one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecompositionPlan {
    /// Ordered, non-empty subset of the indexed papers
    pub target_papers: Vec<String>,

    /// One self-contained sub-question per target paper
    pub sub_question_by_paper: HashMap<String, String>,

    /// True iff more than one paper is targeted
    pub comparison_requested: bool,

    /// True when plan generation failed and the corpus-wide fallback was used
    #[serde(default)]
    pub degraded: bool,
}

impl DecompositionPlan {
    /// Build a plan from ordered `(paper_id, sub_question)` pairs.
    ///
    /// Duplicate paper ids keep their first occurrence.
    pub fn new(entries: Vec<(String, String)>, degraded: bool) -> Self {
        let mut target_papers = Vec::with_capacity(entries.len());
        let mut sub_question_by_paper = HashMap::with_capacity(entries.len());
        for (paper_id, question) in entries {
            if sub_question_by_paper.contains_key(&paper_id) {
                continue;
            }
            target_papers.push(paper_id.clone());
            sub_question_by_paper.insert(paper_id, question);
        }
        let comparison_requested = target_papers.len() > 1;
        Self {
            target_papers,
            sub_question_by_paper,
            comparison_requested,
            degraded,
        }
    }

    /// The sub-question addressed to a target paper.
    pub fn sub_question(&self, paper_id: &str) -> Option<&str> {
        self.sub_question_by_paper.get(paper_id).map(String::as_str)
    }

    /// Iterate `(paper_id, sub_question)` in target order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.target_papers.iter().map(move |paper_id| {
            let question = self.sub_question(paper_id).unwrap_or_default();
            (paper_id.as_str(), question)
        })
    }
}

/// A chunk cited by a per-paper analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupportingChunk {
    pub chunk_id: String,
    pub section_path: String,
    pub snippet: String,
}

/// Why an analyzer produced no usable evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AnalysisFailure {
    /// The analyzer exceeded its deadline
    TimedOut,

    /// The paper has no collection in the vector store
    NotIndexed,

    /// The vector store could not be reached
    StoreUnavailable(String),

    /// Retrieval failed
    Retrieval(String),

    /// Generation failed
    Inference(String),

    /// The analyzer task was aborted before settling
    Aborted(String),
}

impl fmt::Display for AnalysisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisFailure::TimedOut => write!(f, "timed out"),
            AnalysisFailure::NotIndexed => write!(f, "paper not indexed"),
            AnalysisFailure::StoreUnavailable(msg) => write!(f, "vector store unavailable: {}", msg),
            AnalysisFailure::Retrieval(msg) => write!(f, "retrieval failed: {}", msg),
            AnalysisFailure::Inference(msg) => write!(f, "generation failed: {}", msg),
            AnalysisFailure::Aborted(msg) => write!(f, "aborted: {}", msg),
        }
    }
}

/// Outcome of analyzing one target paper.
///
/// An analysis without evidence always has empty `supporting_chunks` and a
/// `local_confidence` of exactly 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub paper_id: String,
    pub summary_text: String,
    pub supporting_chunks: Vec<SupportingChunk>,
    pub local_confidence: f32,
    pub had_evidence: bool,

    /// Set when the analyzer failed rather than simply finding nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<AnalysisFailure>,
}

impl AnalysisResult {
    /// Result for a paper whose retrieval returned nothing relevant.
    pub fn no_evidence(paper_id: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            summary_text: String::new(),
            supporting_chunks: Vec::new(),
            local_confidence: 0.0,
            had_evidence: false,
            failure: None,
        }
    }

    /// Result for a paper whose analyzer failed or timed out.
    pub fn failed(paper_id: impl Into<String>, failure: AnalysisFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::no_evidence(paper_id)
        }
    }
}

/// An attributed source of the final answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Source {
    pub paper_id: String,
    pub section_path: String,
}

/// The merged, attributed answer for one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisResult {
    pub answer_text: String,

    /// Deduplicated, ordered by plan order then citation order
    pub sources: Vec<Source>,

    /// Aggregate confidence in `[0, 1]`
    pub confidence: f32,
}

/// Result of indexing one paper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexReport {
    pub paper_id: String,
    pub status: PaperStatus,
    pub num_chunks: usize,

    /// Chunks of the batch that exhausted its retries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunk_ids: Vec<String>,
}

/// Configuration for the embedding model.
///
/// This configuration is stored alongside the vector store to ensure
/// consistency between ingestion and query-time embedding generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Name/identifier of the embedding model (e.g., "AllMiniLML6V2")
    pub model_name: String,

    /// Dimension of the embedding vectors
    pub dimension: usize,
}
