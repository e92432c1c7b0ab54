//! Paper QA - question answering over a collection of research papers.
//!
//! Papers arrive as structured documents, are split into structure-aware
//! chunks and embedded into one vector collection per paper. A question is
//! answered by three cooperating agents:
//!
//! - **Decomposer**: picks the target papers and writes one self-contained
//!   sub-question per paper
//! - **Analyzer**: one per target paper, run concurrently; retrieves that
//!   paper's chunks and produces a cited summary with a local confidence
//! - **Synthesizer**: merges the analyses into one attributed answer
//!
//! # Architecture
//!
//! - **models**: Core data structures (Paper, Chunk, DecompositionPlan, ...)
//! - **chunking**: Document tree input and the structure-aware chunker
//! - **provider**: Sources of structured documents
//! - **embedding**: Embedding providers (local FastEmbed, OpenAI-compatible)
//! - **storage**: Per-paper vector collections and the paper catalog
//! - **ingestion**: Batched, retried indexing of one paper
//! - **query**: Per-paper top-k retrieval
//! - **inference**: Text generation port and its HTTP client
//! - **agents**: Decomposer, analyzer and synthesizer
//! - **orchestrator**: Query state machine with bounded analyzer fan-out
//! - **service**: Entry points (`index_paper`, `answer_query`, ...)
//! - **config**: Layered configuration
//!
//! # Example
//!
//! ```ignore
//! use paper_qa::{config::load_config, service::{QueryRequest, ResearchService}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(None)?;
//!     let service = ResearchService::from_config(&config).await?;
//!
//!     let response = service
//!         .answer_query(&QueryRequest::new("Compare the methodologies of p1 and p2"))
//!         .await?;
//!
//!     println!("{} (confidence {:.2})", response.answer, response.confidence);
//!     for source in response.sources {
//!         println!("  [{}] {}", source.paper_id, source.section_path);
//!     }
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod inference;
pub mod ingestion;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod query;
pub mod service;
pub mod storage;

// Re-export commonly used types at the crate root
pub use chunking::{Chunker, DocumentStructure};
pub use embedding::EmbeddingProvider;
pub use error::{CoreError, CoreResult};
pub use inference::InferenceProvider;
pub use models::{AnalysisResult, Chunk, DecompositionPlan, Paper, PaperStatus, Source, SynthesisResult};
pub use query::ChunkRetriever;
pub use service::{QueryRequest, QueryResponse, ResearchService};
pub use storage::VectorStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
