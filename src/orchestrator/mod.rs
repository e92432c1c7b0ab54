//! Query orchestration.
//!
//! One request moves through
//! `Received → Decomposing → Analyzing → Synthesizing → Complete`, or to
//! `Failed` when core infrastructure is unusable. Analyzers for the target
//! papers run concurrently, bounded by a semaphore, and are joined with a
//! barrier: synthesis starts only after every dispatched analyzer settled.
//!
//! Agent-level problems (a timed out analyzer, unparseable model output) are
//! absorbed into the per-paper results. The only errors returned are an empty
//! candidate set and an unreachable vector store, whether it fails the
//! pre-flight ping or drops out under every analyzer.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agents::{Analyzer, Decomposer, Synthesizer};
use crate::error::{CoreError, CoreResult};
use crate::models::{AnalysisFailure, AnalysisResult, DecompositionPlan, Paper, SynthesisResult};
use crate::storage::VectorStore;

/// Lifecycle of one query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Received,
    Decomposing,
    Analyzing,
    Synthesizing,
    Complete,
    Failed,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryState::Received => "RECEIVED",
            QueryState::Decomposing => "DECOMPOSING",
            QueryState::Analyzing => "ANALYZING",
            QueryState::Synthesizing => "SYNTHESIZING",
            QueryState::Complete => "COMPLETE",
            QueryState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on analyzers in flight at once
    pub max_concurrent_analyzers: usize,

    /// Deadline of one analyzer, measured from when it gets a slot
    pub analyzer_timeout_secs: u64,

    /// Deadline of the vector store health check
    pub ping_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_analyzers: 4,
            analyzer_timeout_secs: 60,
            ping_timeout_secs: 30,
        }
    }
}

/// Everything produced for one answered query.
#[derive(Debug, Clone)]
pub struct QueryAnswer {
    pub correlation_id: Uuid,
    pub plan: DecompositionPlan,
    /// One result per target paper, in plan order
    pub analyses: Vec<AnalysisResult>,
    pub synthesis: SynthesisResult,
    pub elapsed: Duration,
}

pub struct Orchestrator {
    decomposer: Decomposer,
    analyzer: Arc<Analyzer>,
    synthesizer: Synthesizer,
    store: Arc<dyn VectorStore>,
    config: OrchestratorConfig,
    analyzer_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        decomposer: Decomposer,
        analyzer: Analyzer,
        synthesizer: Synthesizer,
        store: Arc<dyn VectorStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let analyzer_timeout = Duration::from_secs(config.analyzer_timeout_secs);
        Self {
            decomposer,
            analyzer: Arc::new(analyzer),
            synthesizer,
            store,
            config,
            analyzer_timeout,
        }
    }

    /// Override the per-analyzer deadline with sub-second precision.
    pub fn with_analyzer_timeout(mut self, analyzer_timeout: Duration) -> Self {
        self.analyzer_timeout = analyzer_timeout;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer a question over the given candidate papers.
    ///
    /// # Arguments
    /// * `question` - The user question
    /// * `candidates` - Papers the question may target; only indexed ones count
    /// * `k` - Chunks retrieved per target paper
    ///
    /// # Errors
    /// * `CoreError::Validation` - empty question or `k == 0`
    /// * `CoreError::NotFound` - no indexed candidate; no agent is invoked
    /// * `CoreError::TransientProvider` - the vector store is unreachable,
    ///   before decomposition or for every target paper
    pub async fn answer(&self, question: &str, candidates: &[Paper], k: usize) -> CoreResult<QueryAnswer> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!("answer_query", %correlation_id);
        self.run(correlation_id, question, candidates, k).instrument(span).await
    }

    async fn run(
        &self,
        correlation_id: Uuid,
        question: &str,
        candidates: &[Paper],
        k: usize,
    ) -> CoreResult<QueryAnswer> {
        let started = Instant::now();
        let mut state = QueryState::Received;
        debug!(%state, "Query received");

        if question.trim().is_empty() {
            return Err(fail(&mut state, CoreError::Validation("question is empty".to_string())));
        }
        if k == 0 {
            return Err(fail(&mut state, CoreError::Validation("n_results must be at least 1".to_string())));
        }

        let indexed: Vec<Paper> = candidates.iter().filter(|p| p.is_indexed()).cloned().collect();
        if indexed.is_empty() {
            return Err(fail(
                &mut state,
                CoreError::NotFound("no indexed papers to answer from".to_string()),
            ));
        }

        let ping_deadline = Duration::from_secs(self.config.ping_timeout_secs);
        match timeout(ping_deadline, self.store.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(fail(
                    &mut state,
                    CoreError::TransientProvider(format!("vector store unreachable: {}", e)),
                ))
            }
            Err(_) => {
                return Err(fail(
                    &mut state,
                    CoreError::TransientProvider(format!(
                        "vector store did not answer within {}s",
                        self.config.ping_timeout_secs
                    )),
                ))
            }
        }

        advance(&mut state, QueryState::Decomposing);
        let plan = match self.decomposer.decompose(question, &indexed).await {
            Ok(plan) => plan,
            Err(e) => return Err(fail(&mut state, e.into())),
        };
        info!(
            targets = ?plan.target_papers,
            comparison = plan.comparison_requested,
            degraded = plan.degraded,
            "Plan ready"
        );

        advance(&mut state, QueryState::Analyzing);
        let analyses = self.fan_out(&plan, k).await;
        if let Some(reason) = store_outage(&analyses) {
            return Err(fail(
                &mut state,
                CoreError::TransientProvider(format!("vector store unreachable during analysis: {}", reason)),
            ));
        }

        advance(&mut state, QueryState::Synthesizing);
        let synthesis = self.synthesizer.synthesize(question, &plan, &analyses).await;

        advance(&mut state, QueryState::Complete);
        let elapsed = started.elapsed();
        info!(
            confidence = synthesis.confidence,
            sources = synthesis.sources.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Query answered"
        );

        Ok(QueryAnswer {
            correlation_id,
            plan,
            analyses,
            synthesis,
            elapsed,
        })
    }

    /// Run one analyzer per target paper and wait for all of them.
    ///
    /// Results come back in plan order whatever the completion order. The
    /// deadline starts once a task holds a permit, so queueing behind the
    /// concurrency cap does not eat into it.
    async fn fan_out(&self, plan: &DecompositionPlan, k: usize) -> Vec<AnalysisResult> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_analyzers.max(1)));
        let deadline = self.analyzer_timeout;
        let mut tasks = JoinSet::new();

        for (slot, (paper_id, sub_question)) in plan.entries().enumerate() {
            let analyzer = Arc::clone(&self.analyzer);
            let permits = Arc::clone(&permits);
            let paper_id = paper_id.to_string();
            let sub_question = sub_question.to_string();
            let span = info_span!("analyze_paper", paper_id = %paper_id);

            tasks.spawn(
                async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            let failure = AnalysisFailure::Aborted("analyzer pool closed".to_string());
                            return (slot, AnalysisResult::failed(paper_id, failure));
                        }
                    };

                    let result = match timeout(deadline, analyzer.analyze(&paper_id, &sub_question, k)).await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(timeout_ms = deadline.as_millis() as u64, "Analyzer timed out");
                            AnalysisResult::failed(paper_id, AnalysisFailure::TimedOut)
                        }
                    };
                    debug!(
                        had_evidence = result.had_evidence,
                        local_confidence = result.local_confidence,
                        "Analyzer settled"
                    );
                    (slot, result)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<AnalysisResult>> = vec![None; plan.target_papers.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => {
                    if let Some(entry) = slots.get_mut(slot) {
                        *entry = Some(result);
                    }
                }
                Err(e) => warn!(error = %e, "Analyzer task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(&plan.target_papers)
            .map(|(result, paper_id)| {
                result.unwrap_or_else(|| {
                    AnalysisResult::failed(
                        paper_id.clone(),
                        AnalysisFailure::Aborted("analyzer task did not complete".to_string()),
                    )
                })
            })
            .collect()
    }
}

/// The store error shared by every analysis, when none of them got past
/// retrieval because the store was down.
fn store_outage(analyses: &[AnalysisResult]) -> Option<&str> {
    let mut reason = None;
    for analysis in analyses {
        match &analysis.failure {
            Some(AnalysisFailure::StoreUnavailable(msg)) => reason = Some(msg.as_str()),
            _ => return None,
        }
    }
    reason
}

fn advance(state: &mut QueryState, next: QueryState) {
    debug!(from = %state, to = %next, "Query state");
    *state = next;
}

fn fail(state: &mut QueryState, error: CoreError) -> CoreError {
    warn!(from = %state, kind = error.kind(), error = %error, "Query failed");
    *state = QueryState::Failed;
    error
}
