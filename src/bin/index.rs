//! Indexing binary entry point.
//!
//! Reads structured papers (the JSON output of the PDF-structuring step),
//! chunks and embeds them, and writes one vector collection per paper.
//!
//! # Examples
//!
//! Index every document in a directory:
//! ```bash
//! index --input structured/ --db-path papers.db
//! ```
//!
//! Use an OpenAI-compatible embedding server:
//! ```bash
//! index --input paper.json --embedding-backend openai --embedding-model nomic-embed-text
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use paper_qa::{
    config::{load_config, AppConfig, EmbeddingBackend, StoreBackend},
    ingestion::IndexingStats,
    provider::{json::JsonFileDocumentSource, DocumentSource},
    service::ResearchService,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Embedding backend selectable on the command line
#[derive(Debug, Clone, ValueEnum)]
enum BackendArg {
    /// FastEmbed local model (default, no API required)
    #[value(name = "fastembed")]
    FastEmbed,
    /// OpenAI-compatible embeddings endpoint
    #[value(name = "openai")]
    OpenAI,
}

/// Indexing CLI for building and updating the paper collections
#[derive(Parser, Debug)]
#[command(
    name = "index",
    version,
    about = "Chunk, embed and index structured papers",
    long_about = "Index structured research papers into per-paper vector collections.

EXAMPLES:
  Index a directory of structured papers:
    index --input structured/ --db-path papers.db

  Re-index a single paper:
    index --input structured/p1.json

  Use an OpenAI-compatible embedding server:
    PAPERQA_EMBEDDING__BASE_URL=http://localhost:11434/v1 index --input structured/ --embedding-backend openai

  Trial run on the first 3 papers with debug logging:
    index --input structured/ --limit 3 --log-level debug"
)]
struct IndexArgs {
    /// JSON file or directory of JSON files with structured papers
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file path (overrides store.path)
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Embedding backend (overrides embedding.backend)
    #[arg(long, value_enum)]
    embedding_backend: Option<BackendArg>,

    /// Embedding model name (provider-dependent)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// Chunks per embedding batch
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Index at most N papers
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Layer command-line overrides over the loaded configuration
fn apply_overrides(config: &mut AppConfig, args: &IndexArgs) {
    config.store.backend = StoreBackend::Sqlite;
    if let Some(path) = &args.db_path {
        config.store.path = path.clone();
    }
    if let Some(backend) = &args.embedding_backend {
        config.embedding.backend = match backend {
            BackendArg::FastEmbed => EmbeddingBackend::FastEmbed,
            BackendArg::OpenAI => EmbeddingBackend::OpenAI,
        };
    }
    if let Some(model) = &args.embedding_model {
        config.embedding.model = Some(model.clone());
    }
    if let Some(batch_size) = args.batch_size {
        config.indexing.batch_size = batch_size;
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.embedding.cache_dir = Some(cache_dir.clone());
    }
}

/// Create a progress bar for tracking indexing
fn create_progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} papers | {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = IndexArgs::parse();
    init_logging(&args.log_level);

    info!("Starting paper indexing");
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();

    if !args.input.exists() {
        error!("Input path does not exist: {:?}", args.input);
        anyhow::bail!("Input not found: {:?}", args.input);
    }

    let mut config = load_config(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    apply_overrides(&mut config, &args);

    if let Some(parent) = config.store.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
            info!("Created database directory: {:?}", parent);
        }
    }
    info!("Database path: {}", config.store.path.display());

    let service = ResearchService::from_config(&config)
        .await
        .context("Failed to initialize indexing. Was the database built with a different embedding model?")?;

    let source = JsonFileDocumentSource::new(&args.input);
    let documents = match args.limit {
        Some(limit) => source.fetch_documents_limit(limit).await,
        None => source.fetch_documents().await,
    }
    .with_context(|| format!("Failed to load documents from {}", source.name()))?;

    info!("Found {} documents from {}", documents.len(), source.name());
    if documents.is_empty() {
        warn!("No documents found in input");
        return Ok(());
    }

    let progress = create_progress_bar(documents.len())?;
    let mut stats = IndexingStats::new();

    for doc in &documents {
        progress.set_message(doc.paper_id.clone());
        match service.index_paper(&doc.paper_id, &doc.document).await {
            Ok(report) => stats.record(&report),
            Err(e) => {
                progress.suspend(|| error!(paper_id = %doc.paper_id, kind = e.kind(), "Failed: {}", e));
                stats.record_failed();
            }
        }
        progress.inc(1);
    }
    progress.finish_with_message(format!("{} indexed", stats.indexed));

    let elapsed = start_time.elapsed();
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Indexing Completed                ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Papers processed:     {:>16} ║", stats.total_processed);
    println!("║ Indexed:              {:>16} ║", stats.indexed);
    println!("║ Failed:               {:>16} ║", stats.failed);
    println!("║ Chunks written:       {:>16} ║", stats.chunks_written);
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");

    if stats.failed > 0 {
        warn!("{} papers failed to index - check logs for details", stats.failed);
    }

    Ok(())
}
