//! Analyzer agent: one paper + sub-question → [`AnalysisResult`].
//!
//! 1. Retrieve the top `k` chunks of the paper
//! 2. Assemble a bounded context, highest score first, each excerpt labelled
//!    `C1`, `C2`, ...; chunks that do not fit the budget are dropped from the
//!    low-score end
//! 3. Generate a summary that may cite only those labels
//!
//! An analyzer never returns an error. Retrieval and generation failures are
//! recorded on the result as an [`AnalysisFailure`] so sibling analyzers and
//! the synthesizer carry on.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::prompts::{analyzer_prompt, ANALYZER_SYSTEM, STRICT_JSON_SUFFIX};
use super::GenerationSettings;
use crate::chunking::{estimate_tokens, truncate_chars, CHARS_PER_TOKEN};
use crate::inference::{extract_json_object, InferenceProvider};
use crate::models::{AnalysisFailure, AnalysisResult, RetrievedChunk, SupportingChunk};
use crate::query::{ChunkRetriever, RetrievalError, RetrievalQuery};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Total token budget of the assembled context
    pub context_max_tokens: usize,

    /// Cap applied to each excerpt before the total budget
    pub chunk_max_tokens: usize,

    /// Length of the snippet stored on each supporting chunk
    pub snippet_chars: usize,

    /// Surround split chunks with their preview/review overlap
    pub include_overlap: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            context_max_tokens: 4500,
            chunk_max_tokens: 1000,
            snippet_chars: 240,
            include_overlap: true,
        }
    }
}

/// One labelled excerpt of the assembled context.
#[derive(Debug, Clone)]
pub struct ContextEntry<'a> {
    pub label: String,
    pub hit: &'a RetrievedChunk,
    pub excerpt: String,
    pub tokens: usize,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default = "answerable_default")]
    answerable: bool,
    summary: String,
    #[serde(default)]
    citations: Vec<String>,
}

fn answerable_default() -> bool {
    true
}

/// Local confidence of a per-paper analysis.
///
/// `clamp(top_score, 0, 1) * n / (n + 1)` with `n` supporting chunks: zero
/// without support, increasing in both the best score and the amount of
/// support, and strictly below 1.
pub fn local_confidence(top_score: f32, supporting: usize) -> f32 {
    if supporting == 0 || !top_score.is_finite() {
        return 0.0;
    }
    let n = supporting as f32;
    top_score.clamp(0.0, 1.0) * n / (n + 1.0)
}

/// Build the bounded context from retrieval hits.
///
/// Hits are taken in descending score order. Each excerpt is capped at
/// `chunk_max_tokens`; once the next excerpt would overflow
/// `context_max_tokens` it and every lower-scoring hit are dropped. The best
/// hit is always kept, truncated to the total budget if needed.
pub fn assemble_context<'a>(hits: &'a [RetrievedChunk], config: &AnalyzerConfig) -> Vec<ContextEntry<'a>> {
    let mut ranked: Vec<&RetrievedChunk> = hits.iter().collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut entries: Vec<ContextEntry<'a>> = Vec::new();
    let mut used = 0;

    for hit in ranked {
        let chunk = &hit.chunk;
        let body = if config.include_overlap {
            let mut body = String::new();
            if !chunk.preview_text.is_empty() {
                body.push_str("... ");
                body.push_str(&chunk.preview_text);
                body.push(' ');
            }
            body.push_str(&chunk.text);
            if !chunk.review_text.is_empty() {
                body.push(' ');
                body.push_str(&chunk.review_text);
                body.push_str(" ...");
            }
            body
        } else {
            chunk.text.clone()
        };

        let mut excerpt = truncate_chars(&body, config.chunk_max_tokens * CHARS_PER_TOKEN);
        let mut tokens = estimate_tokens(&excerpt);

        if used + tokens > config.context_max_tokens {
            if !entries.is_empty() {
                break;
            }
            excerpt = truncate_chars(&excerpt, config.context_max_tokens * CHARS_PER_TOKEN);
            tokens = estimate_tokens(&excerpt);
        }

        used += tokens;
        entries.push(ContextEntry {
            label: format!("C{}", entries.len() + 1),
            hit,
            excerpt,
            tokens,
        });
    }
    entries
}

fn render_context(entries: &[ContextEntry<'_>]) -> String {
    entries
        .iter()
        .map(|e| format!("[{}] ({})\n{}", e.label, e.hit.section_path(), e.excerpt))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Normalize a citation such as "[c2]" or "2" to "C2".
fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']').trim();
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("C{}", trimmed)
    } else {
        trimmed.to_uppercase()
    }
}

fn parse_analysis(output: &str) -> Result<RawAnalysis, String> {
    let json = extract_json_object(output).ok_or_else(|| "no JSON object in output".to_string())?;
    serde_json::from_str(json).map_err(|e| e.to_string())
}

pub struct Analyzer {
    retriever: Arc<dyn ChunkRetriever>,
    inference: Arc<dyn InferenceProvider>,
    generation: GenerationSettings,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(
        retriever: Arc<dyn ChunkRetriever>,
        inference: Arc<dyn InferenceProvider>,
        generation: GenerationSettings,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            retriever,
            inference,
            generation,
            config,
        }
    }

    /// Analyze one paper.
    ///
    /// # Arguments
    /// * `paper_id` - The target paper
    /// * `sub_question` - The self-contained question for this paper
    /// * `k` - Number of chunks to retrieve
    pub async fn analyze(&self, paper_id: &str, sub_question: &str, k: usize) -> AnalysisResult {
        let hits = match self.retriever.retrieve(&RetrievalQuery::new(paper_id, sub_question, k)).await {
            Ok(hits) => hits,
            Err(RetrievalError::NotIndexed(_)) => {
                warn!(paper_id, "Target paper has no collection");
                return AnalysisResult::failed(paper_id, AnalysisFailure::NotIndexed);
            }
            Err(RetrievalError::Unavailable(msg)) => {
                warn!(paper_id, error = %msg, "Vector store unreachable during retrieval");
                return AnalysisResult::failed(paper_id, AnalysisFailure::StoreUnavailable(msg));
            }
            Err(e) => {
                warn!(paper_id, error = %e, "Retrieval failed");
                return AnalysisResult::failed(paper_id, AnalysisFailure::Retrieval(e.to_string()));
            }
        };

        if hits.is_empty() {
            debug!(paper_id, "No relevant chunks, skipping generation");
            return AnalysisResult::no_evidence(paper_id);
        }

        let entries = assemble_context(&hits, &self.config);
        debug!(
            paper_id,
            retrieved = hits.len(),
            in_context = entries.len(),
            context_tokens = entries.iter().map(|e| e.tokens).sum::<usize>(),
            "Assembled context"
        );

        let base_prompt = analyzer_prompt(sub_question, &render_context(&entries));
        let mut last_output = String::new();

        for attempt in 0..2 {
            let prompt = if attempt == 0 {
                base_prompt.clone()
            } else {
                format!("{}{}", base_prompt, STRICT_JSON_SUFFIX)
            };
            let request = self.generation.request(ANALYZER_SYSTEM, prompt).expect_json();

            let output = match self.generation.generate(self.inference.as_ref(), &request).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(paper_id, error = %e, "Analysis generation failed");
                    return AnalysisResult::failed(paper_id, AnalysisFailure::Inference(e.to_string()));
                }
            };

            match parse_analysis(&output) {
                Ok(raw) => return self.build_result(paper_id, raw, &entries),
                Err(reason) => {
                    warn!(paper_id, attempt, reason = %reason, "Analysis output did not match schema");
                    last_output = output;
                }
            }
        }

        // Unstructured but non-empty output still answers from this context
        let summary = last_output.trim();
        if summary.is_empty() {
            return AnalysisResult::failed(
                paper_id,
                AnalysisFailure::Inference("model returned no usable output".to_string()),
            );
        }
        warn!(paper_id, "Using unstructured analysis output");
        self.evidence_result(paper_id, summary.to_string(), entries.iter().collect())
    }

    fn build_result(&self, paper_id: &str, raw: RawAnalysis, entries: &[ContextEntry<'_>]) -> AnalysisResult {
        if !raw.answerable {
            debug!(paper_id, "Model reports the excerpts do not answer the question");
            return AnalysisResult {
                summary_text: raw.summary.trim().to_string(),
                ..AnalysisResult::no_evidence(paper_id)
            };
        }

        let mut cited: Vec<&ContextEntry<'_>> = Vec::new();
        for label in raw.citations.iter().map(|c| normalize_label(c)) {
            if let Some(entry) = entries.iter().find(|e| e.label == label) {
                if !cited.iter().any(|c| c.label == entry.label) {
                    cited.push(entry);
                }
            }
        }
        if cited.is_empty() {
            // Uncited answers are attributed to the best excerpt only
            cited.extend(entries.first());
        }

        self.evidence_result(paper_id, raw.summary.trim().to_string(), cited)
    }

    fn evidence_result(&self, paper_id: &str, summary_text: String, cited: Vec<&ContextEntry<'_>>) -> AnalysisResult {
        let top_score = cited
            .iter()
            .map(|e| e.hit.score)
            .fold(f32::NEG_INFINITY, f32::max);

        let supporting_chunks: Vec<SupportingChunk> = cited
            .iter()
            .map(|e| SupportingChunk {
                chunk_id: e.hit.chunk.chunk_id.clone(),
                section_path: e.hit.chunk.section_path.clone(),
                snippet: truncate_chars(&e.hit.chunk.text, self.config.snippet_chars),
            })
            .collect();

        let local_confidence = local_confidence(top_score, supporting_chunks.len());
        AnalysisResult {
            paper_id: paper_id.to_string(),
            summary_text,
            had_evidence: !supporting_chunks.is_empty(),
            supporting_chunks,
            local_confidence,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{fast_settings, ScriptedInference};
    use crate::inference::InferenceError;
    use crate::models::{Chunk, ChunkType, SectionKind};
    use crate::query::RetrievalResult;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Retriever fake returning a fixed outcome and recording queries.
    struct FixedRetriever {
        outcome: Mutex<Option<RetrievalResult<Vec<RetrievedChunk>>>>,
        queries: Mutex<Vec<RetrievalQuery>>,
    }

    impl FixedRetriever {
        fn new(outcome: RetrievalResult<Vec<RetrievedChunk>>) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(outcome)),
                queries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChunkRetriever for FixedRetriever {
        async fn retrieve(&self, query: &RetrievalQuery) -> RetrievalResult<Vec<RetrievedChunk>> {
            self.queries.lock().unwrap().push(query.clone());
            self.outcome.lock().unwrap().take().unwrap_or(Ok(Vec::new()))
        }
    }

    fn hit(order_index: usize, section: &str, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk::new(
            Chunk {
                chunk_id: Chunk::make_id("p1", order_index),
                paper_id: "p1".to_string(),
                section_path: section.to_string(),
                chunk_type: ChunkType::Section,
                section_kind: SectionKind::classify(section),
                text: text.to_string(),
                preview_text: String::new(),
                review_text: String::new(),
                order_index,
                token_count: estimate_tokens(text),
            },
            score,
        )
    }

    fn analyzer(retriever: Arc<FixedRetriever>, inference: &ScriptedInference) -> Analyzer {
        Analyzer::new(
            retriever,
            Arc::new(inference.clone()),
            fast_settings(),
            AnalyzerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_no_hits_skips_generation() {
        let inference = ScriptedInference::new(vec![]);
        let result = analyzer(FixedRetriever::new(Ok(vec![])), &inference)
            .analyze("p1", "What is it?", 5)
            .await;

        assert!(!result.had_evidence);
        assert!(result.supporting_chunks.is_empty());
        assert_eq!(result.local_confidence, 0.0);
        assert!(result.failure.is_none());
        assert_eq!(inference.call_count(), 0);
    }

    #[tokio::test]
    async fn test_not_indexed_is_recorded_as_failure() {
        let inference = ScriptedInference::new(vec![]);
        let result = analyzer(FixedRetriever::new(Err(RetrievalError::NotIndexed("p1".into()))), &inference)
            .analyze("p1", "q", 5)
            .await;
        assert_eq!(result.failure, Some(AnalysisFailure::NotIndexed));
        assert_eq!(inference.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_recorded_as_store_failure() {
        let inference = ScriptedInference::new(vec![]);
        let retriever = FixedRetriever::new(Err(RetrievalError::Unavailable("connection refused".into())));
        let result = analyzer(retriever, &inference).analyze("p1", "q", 5).await;
        assert_eq!(
            result.failure,
            Some(AnalysisFailure::StoreUnavailable("connection refused".to_string()))
        );
        assert_eq!(inference.call_count(), 0);
    }

    #[tokio::test]
    async fn test_citations_restricted_to_context_labels() {
        let retriever = FixedRetriever::new(Ok(vec![
            hit(2, "Methods", "We pre-train with masked language modelling.", 0.9),
            hit(5, "Results", "GLUE improves by 7 points.", 0.7),
        ]));
        let inference = ScriptedInference::new(vec![Ok(
            r#"{"answerable": true, "summary": "Masked LM pre-training [C1].", "citations": ["C1", "[c1]", "C7"]}"#.to_string(),
        )]);
        let result = analyzer(Arc::clone(&retriever), &inference).analyze("p1", "How is it trained?", 5).await;

        assert!(result.had_evidence);
        assert_eq!(result.supporting_chunks.len(), 1);
        assert_eq!(result.supporting_chunks[0].chunk_id, "p1:00002");
        assert_eq!(result.supporting_chunks[0].section_path, "Methods");
        assert!((result.local_confidence - 0.45).abs() < 1e-6);
        assert_eq!(retriever.queries.lock().unwrap()[0].k, 5);

        let prompt = &inference.requests()[0].prompt;
        assert!(prompt.contains("[C1] (Methods)"));
        assert!(prompt.contains("[C2] (Results)"));
    }

    #[tokio::test]
    async fn test_unanswerable_output_has_no_evidence() {
        let retriever = FixedRetriever::new(Ok(vec![hit(0, "Overview", "A paper about vision.", 0.3)]));
        let inference = ScriptedInference::new(vec![Ok(
            r#"{"answerable": false, "summary": "The excerpts do not cover cooking.", "citations": ["C1"]}"#.to_string(),
        )]);
        let result = analyzer(retriever, &inference).analyze("p1", "How do I bake bread?", 5).await;

        assert!(!result.had_evidence);
        assert!(result.supporting_chunks.is_empty());
        assert_eq!(result.local_confidence, 0.0);
        assert_eq!(result.summary_text, "The excerpts do not cover cooking.");
    }

    #[tokio::test]
    async fn test_unparseable_output_retried_then_used_verbatim() {
        let retriever = FixedRetriever::new(Ok(vec![
            hit(1, "Introduction", "Transformers replace recurrence.", 0.8),
            hit(3, "Methods", "Self-attention everywhere.", 0.6),
        ]));
        let inference = ScriptedInference::new(vec![
            Ok("The paper replaces recurrence".to_string()),
            Ok("The paper replaces recurrence with attention.".to_string()),
        ]);
        let result = analyzer(retriever, &inference).analyze("p1", "q", 5).await;

        assert_eq!(inference.call_count(), 2);
        assert!(result.had_evidence);
        assert_eq!(result.summary_text, "The paper replaces recurrence with attention.");
        assert_eq!(result.supporting_chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_inference_error_is_retried() {
        let retriever = FixedRetriever::new(Ok(vec![hit(1, "Introduction", "Transformers replace recurrence.", 0.8)]));
        let inference = ScriptedInference::new(vec![
            Err(InferenceError::Unavailable("connection reset".into())),
            Ok(r#"{"answerable": true, "summary": "Attention replaces recurrence [C1].", "citations": ["C1"]}"#.to_string()),
        ]);
        let result = analyzer(retriever, &inference).analyze("p1", "q", 5).await;

        assert_eq!(inference.call_count(), 2);
        assert!(result.had_evidence);
        assert!(result.failure.is_none());
        assert_eq!(result.supporting_chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_inference_error_is_recorded_as_failure() {
        let retriever = FixedRetriever::new(Ok(vec![hit(1, "Introduction", "text", 0.8)]));
        let inference = ScriptedInference::new(vec![Err(InferenceError::Timeout(30))]);
        let result = analyzer(retriever, &inference).analyze("p1", "q", 5).await;

        assert!(matches!(result.failure, Some(AnalysisFailure::Inference(_))));
        assert!(!result.had_evidence);
    }

    #[test]
    fn test_context_budget_drops_lowest_scores_first() {
        let long = "word ".repeat(400); // 500 tokens
        let hits = vec![
            hit(0, "A", &long, 0.5),
            hit(1, "B", &long, 0.9),
            hit(2, "C", &long, 0.7),
        ];
        let config = AnalyzerConfig {
            context_max_tokens: 1100,
            ..Default::default()
        };
        let entries = assemble_context(&hits, &config);

        let sections: Vec<&str> = entries.iter().map(|e| e.hit.section_path()).collect();
        assert_eq!(sections, vec!["B", "C"]);
        assert_eq!(entries[0].label, "C1");
        assert!(entries.iter().map(|e| e.tokens).sum::<usize>() <= 1100);
    }

    #[test]
    fn test_per_chunk_cap_truncates_excerpt() {
        let huge = "token ".repeat(2000);
        let hits = vec![hit(0, "A", &huge, 0.9)];
        let config = AnalyzerConfig {
            chunk_max_tokens: 100,
            ..Default::default()
        };
        let entries = assemble_context(&hits, &config);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].tokens <= 100);
        assert!(entries[0].excerpt.ends_with("..."));
    }

    #[test]
    fn test_overlap_included_in_excerpt() {
        let mut h = hit(4, "Methods", "middle part", 0.9);
        h.chunk.preview_text = "end of previous".to_string();
        h.chunk.review_text = "start of next".to_string();
        let hits = vec![h];
        let entries = assemble_context(&hits, &AnalyzerConfig::default());
        assert_eq!(entries[0].excerpt, "... end of previous middle part start of next ...");
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("[c3]"), "C3");
        assert_eq!(normalize_label(" 2 "), "C2");
        assert_eq!(normalize_label("C1"), "C1");
    }

    proptest! {
        #[test]
        fn prop_local_confidence_bounded(score in -2.0f32..2.0, n in 0usize..50) {
            let c = local_confidence(score, n);
            prop_assert!((0.0..=1.0).contains(&c));
            if n == 0 {
                prop_assert_eq!(c, 0.0);
            }
        }

        #[test]
        fn prop_local_confidence_monotonic(a in 0.0f32..1.0, b in 0.0f32..1.0, n in 1usize..20) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(local_confidence(lo, n) <= local_confidence(hi, n));
            prop_assert!(local_confidence(hi, n) <= local_confidence(hi, n + 1));
        }
    }
}
