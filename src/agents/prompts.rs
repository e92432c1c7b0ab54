//! Role-specific prompts.
//!
//! Every prompt that expects structured output names its JSON schema
//! explicitly; the `STRICT_*` suffixes are appended on the single retry after
//! a parse failure.

use crate::models::Paper;

pub const DECOMPOSER_SYSTEM: &str = "You plan how to answer questions about a collection of research papers. \
You decide which papers a question is about and rewrite the question into one \
self-contained sub-question per paper. Resolve references such as \"it\", \
\"the first one\" or \"the BERT paper\" using the question itself. \
Respond with JSON only.";

pub const ANALYZER_SYSTEM: &str = "You are a helpful research assistant answering a question about ONE research paper \
using only the numbered excerpts provided.\n\
IMPORTANT INSTRUCTIONS:\n\
- Only use information from the excerpts. Never use outside knowledge.\n\
- Cite the excerpts you used by their labels, e.g. \"C1\".\n\
- If the question is a greeting or is not about the paper, or the excerpts do not \
cover it, set \"answerable\" to false and say so briefly in the summary.\n\
- Be concise.\n\
Respond with JSON only.";

pub const SYNTHESIZER_SYSTEM: &str = "You are a research assistant writing the final answer to a question that spans \
several research papers. You are given one analysis per paper. Write a single \
comparative answer that explicitly addresses the similarities and differences \
between the papers. Refer to papers by their ids in square brackets, e.g. [p1]. \
Only use information from the analyses.";

pub const STRICT_JSON_SUFFIX: &str = "\n\nYour previous reply could not be parsed. Reply with ONE JSON object that \
matches the schema exactly. No markdown fences, no commentary, no trailing text.";

/// Plan request listing the candidate papers.
///
/// `mentioned` lists ids the question names literally; the model may add
/// papers it identifies by alias.
pub fn decomposer_prompt(question: &str, papers: &[Paper], mentioned: &[String]) -> String {
    let catalog = papers
        .iter()
        .map(|p| format!("- {}: {}", p.paper_id, p.title))
        .collect::<Vec<_>>()
        .join("\n");

    let hint = if mentioned.is_empty() {
        "none".to_string()
    } else {
        mentioned.join(", ")
    };

    format!(
        "Indexed papers:\n{catalog}\n\n\
         Papers named literally in the question: {hint}\n\n\
         Question: {question}\n\n\
         Return JSON with this schema:\n\
         {{\"explicit\": <true if the question names or unambiguously refers to specific papers>,\n \
         \"targets\": [{{\"paper_id\": \"<id from the list>\", \"sub_question\": \"<self-contained question for that paper>\"}}]}}"
    )
}

/// Per-paper analysis request over labelled excerpts.
pub fn analyzer_prompt(sub_question: &str, context: &str) -> String {
    format!(
        "Excerpts:\n{context}\n\n\
         Question: {sub_question}\n\n\
         Return JSON with this schema:\n\
         {{\"answerable\": <bool>, \"summary\": \"<answer>\", \"citations\": [\"C1\", ...]}}"
    )
}

/// Comparative synthesis request over per-paper summaries.
pub fn synthesizer_prompt(question: &str, analyses: &[(&str, &str)]) -> String {
    let sections = analyses
        .iter()
        .map(|(paper_id, summary)| format!("[{}]\n{}", paper_id, summary))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("Per-paper analyses:\n\n{sections}\n\nQuestion: {question}\n\nAnswer:")
}
