//! Question answering binary entry point.
//!
//! Answers questions over the indexed papers, either once or in an
//! interactive REPL, printing the answer with its sources and per-paper
//! outcomes (table or JSON).
//!
//! # Examples
//!
//! Single question:
//! ```bash
//! ask --db-path papers.db --question "What is the main contribution of p1?"
//! ```
//!
//! Restrict to one paper, JSON output:
//! ```bash
//! ask --question "Which datasets are used?" --paper p2 --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! ask --interactive
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paper_qa::{
    config::{load_config, StoreBackend},
    models::PaperStatus,
    service::{ComponentHealth, HealthReport, PaperInfo, QueryRequest, QueryResponse, ResearchService, MAX_RESULTS},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for answers
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Answer text followed by source and outcome tables
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Question CLI over the indexed papers
#[derive(Parser, Debug)]
#[command(
    name = "ask",
    version,
    about = "Ask questions about indexed research papers",
    long_about = "Answer questions over one or more indexed papers. Questions naming several \
                  papers (or none) are answered comparatively with per-paper attribution.

EXAMPLES:
  Single question:
    ask --db-path papers.db --question \"What is the main contribution of p1?\"

  Comparison across papers:
    ask --question \"Compare the methodologies of p1 and p2\"

  Restrict to one paper, JSON output:
    ask --question \"Which datasets are used?\" --paper p2 --format json

  Interactive mode:
    ask --interactive"
)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file path (overrides store.path)
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Question (required unless --interactive, --list or --health)
    #[arg(short, long, value_name = "TEXT", conflicts_with = "interactive")]
    question: Option<String>,

    /// Chunks retrieved per paper
    #[arg(short = 'n', long, value_name = "N", default_value = "5")]
    n_results: usize,

    /// Restrict the question to one paper id
    #[arg(long, value_name = "PAPER_ID")]
    paper: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// List indexed papers and exit
    #[arg(long)]
    list: bool,

    /// Check the vector store and inference backend and exit
    #[arg(long)]
    health: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

fn bold(text: &str) -> Cell {
    Cell::new(text).add_attribute(Attribute::Bold)
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Format an answer with its sources and per-paper outcomes
fn format_answer_table(response: &QueryResponse) -> String {
    let mut out = String::new();
    out.push_str(&response.answer);
    out.push_str(&format!(
        "\n\nConfidence: {:.2}{}\n",
        response.confidence,
        if response.comparison { "  (comparison)" } else { "" }
    ));

    if !response.sources.is_empty() {
        let mut sources = new_table();
        sources.set_header(vec![bold("#"), bold("Paper"), bold("Section")]);
        for (idx, source) in response.sources.iter().enumerate() {
            sources.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(&source.paper_id),
                Cell::new(&source.section_path),
            ]);
        }
        out.push_str(&format!("\nSources:\n{}\n", sources));
    }

    let mut papers = new_table();
    papers.set_header(vec![bold("Paper"), bold("Evidence"), bold("Local confidence"), bold("Note")]);
    for outcome in &response.papers {
        let (label, color) = match (&outcome.failure, outcome.had_evidence) {
            (Some(_), _) => ("FAILED", Color::Red),
            (None, true) => ("YES", Color::Green),
            (None, false) => ("NONE", Color::Yellow),
        };
        papers.add_row(vec![
            Cell::new(&outcome.paper_id),
            Cell::new(label).fg(color),
            Cell::new(format!("{:.3}", outcome.local_confidence)),
            Cell::new(outcome.failure.as_deref().unwrap_or("")),
        ]);
    }
    out.push_str(&format!("\nPapers:\n{}", papers));
    out
}

/// Format answer as JSON
fn format_answer_json(response: &QueryResponse) -> Result<String> {
    serde_json::to_string_pretty(response).with_context(|| "Failed to serialize answer to JSON")
}

fn format_papers_table(papers: &[PaperInfo]) -> String {
    if papers.is_empty() {
        return "No papers registered.".to_string();
    }

    let mut table = new_table();
    table.set_header(vec![bold("Paper"), bold("Title"), bold("Status"), bold("Chunks"), bold("Indexed at")]);
    for paper in papers {
        let color = match paper.status {
            PaperStatus::Indexed => Color::Green,
            PaperStatus::Failed => Color::Red,
            PaperStatus::Processing => Color::Cyan,
            PaperStatus::Uploaded => Color::White,
        };
        let title = if paper.title.chars().count() > 60 {
            format!("{}...", paper.title.chars().take(57).collect::<String>())
        } else {
            paper.title.clone()
        };
        table.add_row(vec![
            Cell::new(&paper.paper_id),
            Cell::new(title),
            Cell::new(paper.status.as_str()).fg(color),
            Cell::new(paper.num_chunks),
            Cell::new(
                paper
                    .indexed_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default(),
            ),
        ]);
    }
    table.to_string()
}

fn print_health(report: &HealthReport) {
    let show = |health: ComponentHealth| match health {
        ComponentHealth::Ok => "ok",
        ComponentHealth::Unreachable => "unreachable",
    };
    println!("vector store: {}", show(report.vector_store));
    println!("inference:    {}", show(report.inference));
}

fn print_answer(response: &QueryResponse, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            println!("{}", format_answer_table(response));
            println!("\nAnswered in {:.2}s", response.processing_time_ms as f64 / 1000.0);
        }
        OutputFormat::Json => match format_answer_json(response) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error formatting JSON: {}", e),
        },
    }
}

fn print_help() {
    println!("Commands:");
    println!("  <question>       - Ask a question");
    println!("  /n N             - Retrieve N chunks per paper");
    println!("  /paper ID        - Restrict questions to one paper");
    println!("  /paper clear     - Ask across all papers");
    println!("  /papers          - List papers");
    println!("  /format table    - Use table output format");
    println!("  /format json     - Use JSON output format");
    println!("  /health          - Check backends");
    println!("  /help            - Show this help");
    println!("  Ctrl+D or Ctrl+C - Exit");
}

/// Run interactive REPL mode
async fn run_interactive(
    service: &ResearchService,
    mut n_results: usize,
    mut paper: Option<String>,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Paper QA");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().with_context(|| "Failed to create readline editor")?;

    loop {
        let prompt = match &paper {
            Some(id) => format!("Ask [{}]> ", id),
            None => "Ask> ".to_string(),
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line).ok();

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    match parts.as_slice() {
                        ["/help"] => print_help(),
                        ["/n", n] => match n.parse::<usize>() {
                            Ok(n) if (1..=MAX_RESULTS).contains(&n) => {
                                n_results = n;
                                println!("Retrieving {} chunks per paper", n_results);
                            }
                            _ => eprintln!("Invalid number: must be between 1 and {}", MAX_RESULTS),
                        },
                        ["/paper", "clear"] => {
                            paper = None;
                            println!("Asking across all papers");
                        }
                        ["/paper", id] => {
                            paper = Some(id.to_string());
                            println!("Restricted to paper {}", id);
                        }
                        ["/papers"] => println!("{}", format_papers_table(&service.list_papers().await)),
                        ["/format", "table"] => {
                            format = OutputFormat::Table;
                            println!("Set output format to table");
                        }
                        ["/format", "json"] => {
                            format = OutputFormat::Json;
                            println!("Set output format to JSON");
                        }
                        ["/health"] => print_health(&service.health().await),
                        [command, ..] => {
                            eprintln!("Unknown command: {}. Type /help for available commands.", command)
                        }
                        [] => {}
                    }
                    continue;
                }

                let mut request = QueryRequest::new(line).with_n_results(n_results);
                if let Some(id) = &paper {
                    request = request.for_paper(id.clone());
                }
                match service.answer_query(&request).await {
                    Ok(response) => print_answer(&response, format),
                    Err(e) => eprintln!("Query failed ({}): {}", e.kind(), e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_logging(&args.log_level);

    if !args.interactive && !args.list && !args.health && args.question.is_none() {
        anyhow::bail!(
            "Either --question, --interactive, --list or --health must be specified.\n\
             Use --help for usage information."
        );
    }

    let mut config = load_config(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.store.backend = StoreBackend::Sqlite;
    if let Some(path) = &args.db_path {
        config.store.path = path.clone();
    }

    if !config.store.path.exists() {
        anyhow::bail!(
            "Database file not found: {}\n\
             Please run the index binary first to create the database.",
            config.store.path.display()
        );
    }
    info!("Loading database from: {}", config.store.path.display());

    let service = ResearchService::from_config(&config)
        .await
        .context("Failed to open the paper database")?;

    if args.health {
        let report = service.health().await;
        print_health(&report);
        if !report.is_healthy() {
            anyhow::bail!("One or more backends are unreachable");
        }
        return Ok(());
    }

    if args.list {
        println!("{}", format_papers_table(&service.list_papers().await));
        return Ok(());
    }

    if args.interactive {
        return run_interactive(&service, args.n_results, args.paper, args.format).await;
    }

    let Some(question) = args.question else {
        return Ok(());
    };
    let mut request = QueryRequest::new(question).with_n_results(args.n_results);
    if let Some(id) = args.paper {
        request = request.for_paper(id);
    }

    let response = service
        .answer_query(&request)
        .await
        .context("Failed to answer question")?;
    print_answer(&response, args.format);

    Ok(())
}
