//! Synthesizer agent: per-paper analyses → one attributed answer.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::prompts::{synthesizer_prompt, SYNTHESIZER_SYSTEM};
use super::GenerationSettings;
use crate::inference::InferenceProvider;
use crate::models::{AnalysisResult, DecompositionPlan, Source, SynthesisResult};

pub const INSUFFICIENT_EVIDENCE: &str =
    "Insufficient evidence: none of the targeted papers contain passages that answer this question.";

/// Aggregate confidence of the final answer.
///
/// `coverage * (0.5 * min + 0.5 * mean)` where `coverage` is the share of
/// targeted papers that contributed evidence and `min`/`mean` range over the
/// contributors' local confidences. Zero when nothing contributes, never
/// above the weakest-weighted contributor, and always within `[0, 1]`.
pub fn aggregate_confidence(targeted: usize, contributing: &[f32]) -> f32 {
    if contributing.is_empty() {
        return 0.0;
    }
    let values: Vec<f32> = contributing
        .iter()
        .map(|c| if c.is_finite() { c.clamp(0.0, 1.0) } else { 0.0 })
        .collect();

    let min = values.iter().copied().fold(1.0f32, f32::min);
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let coverage = (values.len() as f32 / targeted.max(values.len()) as f32).min(1.0);

    (coverage * (0.5 * min + 0.5 * mean)).clamp(0.0, 1.0)
}

pub struct Synthesizer {
    inference: Arc<dyn InferenceProvider>,
    generation: GenerationSettings,
}

impl Synthesizer {
    pub fn new(inference: Arc<dyn InferenceProvider>, generation: GenerationSettings) -> Self {
        Self { inference, generation }
    }

    /// Merge the analyses of every targeted paper.
    ///
    /// Never fails: without evidence it answers "insufficient evidence"
    /// without calling the model, and a failed comparative generation falls
    /// back to the per-paper summaries.
    pub async fn synthesize(
        &self,
        question: &str,
        plan: &DecompositionPlan,
        analyses: &[AnalysisResult],
    ) -> SynthesisResult {
        let ordered = in_plan_order(plan, analyses);
        let contributing: Vec<&AnalysisResult> = ordered
            .iter()
            .copied()
            .filter(|a| a.had_evidence && a.failure.is_none())
            .collect();

        if contributing.is_empty() {
            debug!(targeted = plan.target_papers.len(), "No targeted paper returned evidence");
            return SynthesisResult {
                answer_text: INSUFFICIENT_EVIDENCE.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
            };
        }

        let targeted = plan.target_papers.len().max(ordered.len());
        let local: Vec<f32> = contributing.iter().map(|a| a.local_confidence).collect();
        let confidence = aggregate_confidence(targeted, &local);
        let sources = collect_sources(&contributing);

        let body = if contributing.len() == 1 {
            contributing[0].summary_text.clone()
        } else {
            self.compare(question, &contributing).await
        };

        let answer_text = match missing_note(&ordered) {
            Some(note) => format!("{}\n\n{}", body, note),
            None => body,
        };

        SynthesisResult {
            answer_text,
            sources,
            confidence,
        }
    }

    async fn compare(&self, question: &str, contributing: &[&AnalysisResult]) -> String {
        let pairs: Vec<(&str, &str)> = contributing
            .iter()
            .map(|a| (a.paper_id.as_str(), a.summary_text.as_str()))
            .collect();
        let request = self.generation.request(SYNTHESIZER_SYSTEM, synthesizer_prompt(question, &pairs));

        match self.generation.generate(self.inference.as_ref(), &request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Comparative synthesis returned empty output, using per-paper summaries");
                concatenate(&pairs)
            }
            Err(e) => {
                warn!(error = %e, "Comparative synthesis failed, using per-paper summaries");
                concatenate(&pairs)
            }
        }
    }
}

/// Analyses sorted by the plan's target order; unplanned ones trail.
fn in_plan_order<'a>(plan: &DecompositionPlan, analyses: &'a [AnalysisResult]) -> Vec<&'a AnalysisResult> {
    let mut ordered: Vec<&AnalysisResult> = plan
        .target_papers
        .iter()
        .filter_map(|id| analyses.iter().find(|a| &a.paper_id == id))
        .collect();
    for analysis in analyses {
        if !plan.target_papers.contains(&analysis.paper_id) {
            ordered.push(analysis);
        }
    }
    ordered
}

fn collect_sources(contributing: &[&AnalysisResult]) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for analysis in contributing {
        for chunk in &analysis.supporting_chunks {
            let source = Source {
                paper_id: analysis.paper_id.clone(),
                section_path: chunk.section_path.clone(),
            };
            if seen.insert(source.clone()) {
                sources.push(source);
            }
        }
    }
    sources
}

fn concatenate(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(paper_id, summary)| format!("[{}] {}", paper_id, summary))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn missing_note(ordered: &[&AnalysisResult]) -> Option<String> {
    let missing: Vec<String> = ordered
        .iter()
        .filter(|a| !a.had_evidence || a.failure.is_some())
        .map(|a| match &a.failure {
            Some(failure) => format!("{} ({})", a.paper_id, failure),
            None => a.paper_id.clone(),
        })
        .collect();

    if missing.is_empty() {
        None
    } else {
        Some(format!("No evidence was found in: {}.", missing.join(", ")))
    }
}
