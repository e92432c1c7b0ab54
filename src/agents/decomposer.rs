//! Decomposer agent: question → [`DecompositionPlan`].
//!
//! Target selection combines two signals. Papers whose id or title appears
//! literally in the question are always targeted; the model may add papers
//! it recognizes by alias (`"explicit": true`). When nothing is named and
//! more than one paper is a candidate, the [`TargetingPolicy`] decides.
//!
//! The model also rewrites the question into one self-contained
//! sub-question per target. Output that fails to parse is retried once with
//! a stricter instruction; a second failure (or an inference error) degrades
//! to a plan covering every candidate with the raw question.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::prompts::{decomposer_prompt, DECOMPOSER_SYSTEM, STRICT_JSON_SUFFIX};
use super::GenerationSettings;
use crate::embedding::normalize_text;
use crate::inference::{extract_json_object, InferenceProvider};
use crate::models::{DecompositionPlan, Paper};

#[derive(Debug, Error, PartialEq)]
pub enum DecomposeError {
    /// No indexed paper to plan over
    #[error("No documents available: no indexed papers to answer from")]
    NoDocumentsAvailable,
}

/// What to target when the question names no paper and several are indexed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetingPolicy {
    /// Target every candidate paper in comparison mode
    #[default]
    AllPapers,

    /// Target whatever subset the model proposes
    ModelChoice,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecomposerConfig {
    pub targeting: TargetingPolicy,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    explicit: bool,
    targets: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    paper_id: String,
    #[serde(default)]
    sub_question: String,
}

/// A model plan restricted to known papers.
#[derive(Debug, PartialEq)]
struct ParsedPlan {
    explicit: bool,
    targets: Vec<(String, String)>,
}

pub struct Decomposer {
    inference: Arc<dyn InferenceProvider>,
    generation: GenerationSettings,
    config: DecomposerConfig,
}

impl Decomposer {
    pub fn new(inference: Arc<dyn InferenceProvider>, generation: GenerationSettings, config: DecomposerConfig) -> Self {
        Self {
            inference,
            generation,
            config,
        }
    }

    /// Plan a question over the candidate papers.
    ///
    /// # Arguments
    /// * `question` - The raw user question
    /// * `papers` - Currently indexed papers that may be targeted
    ///
    /// # Errors
    /// Returns `DecomposeError::NoDocumentsAvailable` if `papers` is empty;
    /// the model is not called in that case
    pub async fn decompose(&self, question: &str, papers: &[Paper]) -> Result<DecompositionPlan, DecomposeError> {
        if papers.is_empty() {
            return Err(DecomposeError::NoDocumentsAvailable);
        }

        let mentioned = mentioned_papers(question, papers);
        debug!(candidates = papers.len(), mentioned = ?mentioned, "Decomposing question");

        let Some(parsed) = self.generate_plan(question, papers, &mentioned).await else {
            return Ok(degraded_plan(question, papers));
        };

        let target_ids = self.select_targets(papers, &mentioned, &parsed);
        let entries = target_ids
            .into_iter()
            .map(|id| {
                let sub_question = parsed
                    .targets
                    .iter()
                    .find(|(target, _)| *target == id)
                    .map(|(_, q)| q.trim())
                    .filter(|q| !q.is_empty())
                    .unwrap_or(question)
                    .to_string();
                (id, sub_question)
            })
            .collect();

        let plan = DecompositionPlan::new(entries, false);
        info!(
            targets = ?plan.target_papers,
            comparison = plan.comparison_requested,
            "Decomposed question"
        );
        Ok(plan)
    }

    /// Ask the model for a plan, retrying once with a stricter instruction.
    async fn generate_plan(&self, question: &str, papers: &[Paper], mentioned: &[String]) -> Option<ParsedPlan> {
        let base_prompt = decomposer_prompt(question, papers, mentioned);

        for attempt in 0..2 {
            let prompt = if attempt == 0 {
                base_prompt.clone()
            } else {
                format!("{}{}", base_prompt, STRICT_JSON_SUFFIX)
            };
            let request = self.generation.request(DECOMPOSER_SYSTEM, prompt).expect_json();

            let output = match self.generation.generate(self.inference.as_ref(), &request).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(error = %e, "Plan generation failed, using degraded plan");
                    return None;
                }
            };

            match parse_plan(&output, papers) {
                Ok(parsed) => return Some(parsed),
                Err(reason) => warn!(attempt, reason = %reason, "Plan output did not match schema"),
            }
        }

        warn!("Plan output unparseable after retry, using degraded plan");
        None
    }

    fn select_targets(&self, papers: &[Paper], mentioned: &[String], parsed: &ParsedPlan) -> Vec<String> {
        let proposed: Vec<&str> = parsed.targets.iter().map(|(id, _)| id.as_str()).collect();

        let named = in_candidate_order(papers, |id| {
            mentioned.iter().any(|m| m == id) || (parsed.explicit && proposed.contains(&id))
        });
        if !named.is_empty() {
            return named;
        }
        if papers.len() == 1 {
            return vec![papers[0].paper_id.clone()];
        }
        match self.config.targeting {
            TargetingPolicy::AllPapers => in_candidate_order(papers, |_| true),
            TargetingPolicy::ModelChoice => in_candidate_order(papers, |id| proposed.contains(&id)),
        }
    }
}

fn in_candidate_order(papers: &[Paper], keep: impl Fn(&str) -> bool) -> Vec<String> {
    papers
        .iter()
        .map(|p| p.paper_id.as_str())
        .filter(|id| keep(id))
        .map(str::to_string)
        .collect()
}

/// Plan used when the model cannot produce one: every candidate, raw question.
fn degraded_plan(question: &str, papers: &[Paper]) -> DecompositionPlan {
    let entries = papers
        .iter()
        .map(|p| (p.paper_id.clone(), question.to_string()))
        .collect();
    DecompositionPlan::new(entries, true)
}

/// Parse model output into a plan over known papers.
fn parse_plan(output: &str, papers: &[Paper]) -> Result<ParsedPlan, String> {
    let json = extract_json_object(output).ok_or_else(|| "no JSON object in output".to_string())?;
    let raw: RawPlan = serde_json::from_str(json).map_err(|e| e.to_string())?;

    let targets: Vec<(String, String)> = raw
        .targets
        .into_iter()
        .filter_map(|t| {
            let wanted = t.paper_id.trim();
            papers
                .iter()
                .find(|p| p.paper_id.eq_ignore_ascii_case(wanted))
                .map(|p| (p.paper_id.clone(), t.sub_question))
        })
        .collect();

    if targets.is_empty() {
        return Err("plan names no indexed paper".to_string());
    }
    Ok(ParsedPlan {
        explicit: raw.explicit,
        targets,
    })
}

/// Ids of candidate papers named literally in the question, by id token or
/// by full title.
pub fn mentioned_papers(question: &str, papers: &[Paper]) -> Vec<String> {
    let tokens: Vec<String> = question
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    let normalized_question = normalize_text(question);

    papers
        .iter()
        .filter(|p| {
            let id = p.paper_id.to_lowercase();
            let title = normalize_text(&p.title);
            tokens.iter().any(|t| *t == id) || (title.len() >= 8 && normalized_question.contains(&title))
        })
        .map(|p| p.paper_id.clone())
        .collect()
}
