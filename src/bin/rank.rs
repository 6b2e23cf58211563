//! Rank binary entry point.
//!
//! Ranks the papers in a database by semantic similarity to a query. Supports
//! single-query and interactive REPL modes, table or JSON output, and writing
//! the ranked records to a file for downstream tools.
//!
//! # Examples
//!
//! Single query with default settings:
//! ```bash
//! rank --query "graph neural networks"
//! ```
//!
//! JSON output with year filter:
//! ```bash
//! rank --query "transformers" --format json --year-start 2020
//! ```
//!
//! Interactive mode:
//! ```bash
//! rank --interactive
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paperpilot::{
    config::{AppConfig, EmbeddingBackend},
    embedding::DynamicEmbeddingProvider,
    ingestion::check_compatibility,
    logging::init_logging,
    models::{EmbeddingConfig, PaperRecord, RelevanceLevel, SearchResult},
    query::{BruteForceSearchEngine, SearchEngine, SearchQuery},
    storage::{sqlite::SqliteStorage, PaperStorage, YearRange},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

type Engine<'a> = BruteForceSearchEngine<'a, DynamicEmbeddingProvider, SqliteStorage>;

/// Output format for ranked results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table with colored relevance levels
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Rank stored papers against a query
#[derive(Parser, Debug)]
#[command(
    name = "rank",
    version,
    about = "Rank stored papers by semantic similarity to a query",
    long_about = "Ranks every paper in the database by cosine similarity between its abstract \
                  embedding and the query embedding. The embedding model is detected from the \
                  database.

EXAMPLES:
  Single query:
    rank --query \"graph neural networks\"

  Top 3 as JSON, saved for later steps:
    rank --query \"graph neural networks\" --top-n 3 --output top3.json

  Interactive mode:
    rank --interactive"
)]
struct Args {
    /// Query text (required unless --interactive)
    #[arg(short, long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Number of results to return
    #[arg(short = 'n', long, value_name = "N", default_value = "5")]
    top_n: usize,

    /// Only rank papers from this year onwards (inclusive)
    #[arg(long, value_name = "YEAR")]
    year_start: Option<i32>,

    /// Only rank papers up to this year (inclusive)
    #[arg(long, value_name = "YEAR")]
    year_end: Option<i32>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Also write the ranked records as JSON to this file
    #[arg(short, long, value_name = "FILE", conflicts_with = "interactive")]
    output: Option<PathBuf>,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// TOML configuration file
    #[arg(long, value_name = "FILE", env = "PAPERPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Database file path
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// FastEmbed model cache directory (only used with FastEmbed models)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Logging verbosity level (defaults to the configured level)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

/// Layer command-line flags over the file and environment configuration.
fn apply_args(mut config: AppConfig, args: &Args) -> AppConfig {
    if let Some(db_path) = &args.db_path {
        config.storage.db_path = db_path.clone();
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.embedding.cache_dir = Some(cache_dir.clone());
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config
}

/// Build the embedding provider that produced the stored vectors
fn create_embedding_provider(config: &AppConfig, stored: &EmbeddingConfig) -> Result<DynamicEmbeddingProvider> {
    let mut settings = config.embedding.clone();
    settings.backend = EmbeddingBackend::detect(&stored.model_name);
    settings.model = Some(stored.model_name.clone());

    info!(
        "Auto-detected {:?} backend for model {} (dimension: {})",
        settings.backend, stored.model_name, stored.dimension
    );

    let provider = DynamicEmbeddingProvider::from_settings(&settings)
        .with_context(|| format!("Failed to create embedding provider for model {}", stored.model_name))?;
    check_compatibility(&provider, stored)?;
    Ok(provider)
}

/// Execute a ranking query
async fn execute_search(
    engine: &Engine<'_>,
    query_text: &str,
    top_n: usize,
    year_range: Option<YearRange>,
) -> Result<Vec<SearchResult>> {
    debug!("Ranking papers for query: {}", query_text);

    let query = SearchQuery::new(query_text, Some(top_n), year_range);
    engine
        .search(&query)
        .await
        .with_context(|| format!("Failed to rank papers for query: '{}'", query_text))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Format results as a pretty table
fn format_results_table(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Authors").add_attribute(Attribute::Bold),
        Cell::new("Published").add_attribute(Attribute::Bold),
        Cell::new("Relevance").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for (idx, result) in results.iter().enumerate() {
        let (relevance_str, color) = match result.relevance {
            RelevanceLevel::Identical => ("IDENTICAL", Color::Green),
            RelevanceLevel::HighlySimilar => ("HIGHLY_SIMILAR", Color::Cyan),
            RelevanceLevel::Similar => ("SIMILAR", Color::Yellow),
            RelevanceLevel::Relevant => ("RELEVANT", Color::White),
        };

        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(truncate(&result.paper.title, 60)),
            Cell::new(truncate(&result.paper.authors, 40)),
            Cell::new(&result.paper.published_date),
            Cell::new(relevance_str).fg(color),
            Cell::new(format!("{:.4}", result.score)),
        ]);
    }

    table.to_string()
}

/// Format results as JSON
fn format_results_json(results: &[SearchResult]) -> Result<String> {
    serde_json::to_string_pretty(results).context("Failed to serialize results to JSON")
}

/// Write the ranked records (metadata only) for downstream consumers
fn write_records(path: &Path, results: &[SearchResult]) -> Result<()> {
    let records: Vec<&PaperRecord> = results.iter().map(|r| &r.paper).collect();
    let json = serde_json::to_string_pretty(&records).context("Failed to serialize records")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

fn print_results(results: &[SearchResult], format: OutputFormat, elapsed_secs: f64) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", format_results_table(results));
            println!("\nRanked {} results in {:.2}s", results.len(), elapsed_secs);
        }
        OutputFormat::Json => println!("{}", format_results_json(results)?),
    }
    Ok(())
}

/// Display detailed view of a single result
fn display_result_detail(result: &SearchResult, rank: usize) {
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Title: {}", result.paper.title);
    println!("Authors: {}", result.paper.authors);
    println!("Published: {}", result.paper.published_date);
    println!("URL: {}", result.paper.url);
    println!("Id: {}", result.paper.id);
    println!("Relevance: {:?}", result.relevance);
    println!("Score: {:.4}", result.score);
    println!("\nAbstract:\n{}", result.paper.abstract_text);
    println!("{}", "═".repeat(80));
}

fn print_help() {
    println!("Commands:");
    println!("  <query>         - Rank papers against the query");
    println!("  /top N          - Set number of results to N");
    println!("  /year START END - Filter by year range");
    println!("  /year clear     - Clear year filter");
    println!("  /format table   - Use table output format");
    println!("  /format json    - Use JSON output format");
    println!("  /detail N       - Show full details for result rank N");
    println!("  /save FILE      - Write the last results to FILE as JSON");
    println!("  /help           - Show this help");
    println!("  Ctrl+D or Ctrl+C - Exit");
}

/// Run interactive REPL mode
async fn run_interactive(
    engine: &Engine<'_>,
    mut top_n: usize,
    mut year_range: Option<YearRange>,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Paper Ranking");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut last_results: Vec<SearchResult> = Vec::new();

    loop {
        match rl.readline("Rank> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                // History is best effort
                let _ = rl.add_history_entry(line);

                if !line.starts_with('/') {
                    let start = Instant::now();
                    match execute_search(engine, line, top_n, year_range).await {
                        Ok(results) => {
                            if let Err(e) = print_results(&results, format, start.elapsed().as_secs_f64()) {
                                eprintln!("Error formatting results: {}", e);
                            }
                            last_results = results;
                        }
                        Err(e) => eprintln!("Ranking failed: {:#}", e),
                    }
                    continue;
                }

                let parts: Vec<&str> = line.split_whitespace().collect();
                match parts.as_slice() {
                    ["/help"] => print_help(),
                    ["/top", n] => match n.parse::<usize>() {
                        Ok(n) if n > 0 => {
                            top_n = n;
                            println!("Set top-n to {}", top_n);
                        }
                        _ => eprintln!("Invalid number: must be a positive integer"),
                    },
                    ["/year", "clear"] => {
                        year_range = None;
                        println!("Cleared year filter");
                    }
                    ["/year", start, end] => match (start.parse::<i32>(), end.parse::<i32>()) {
                        (Ok(start), Ok(end)) if start <= end => {
                            year_range = Some(YearRange::new(start, end));
                            println!("Set year filter: {} - {}", start, end);
                        }
                        _ => eprintln!("Invalid year range: START must be <= END"),
                    },
                    ["/format", "table"] => {
                        format = OutputFormat::Table;
                        println!("Set output format to table");
                    }
                    ["/format", "json"] => {
                        format = OutputFormat::Json;
                        println!("Set output format to JSON");
                    }
                    ["/detail", n] => match n.parse::<usize>() {
                        Ok(rank) if rank > 0 && rank <= last_results.len() => {
                            display_result_detail(&last_results[rank - 1], rank);
                        }
                        Ok(rank) if rank > last_results.len() => {
                            eprintln!(
                                "Rank {} out of range (last query had {} results)",
                                rank,
                                last_results.len()
                            );
                        }
                        _ => eprintln!("Invalid rank: must be a positive integer"),
                    },
                    ["/save", path] => {
                        if let Err(e) = write_records(Path::new(path), &last_results) {
                            eprintln!("{:#}", e);
                        }
                    }
                    _ => eprintln!("Unknown command: {}. Type /help for available commands.", line),
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
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let config = apply_args(config, &args);

    init_logging(&config.logging.level).context("Failed to initialize logging")?;

    let query = match (&args.query, args.interactive) {
        (Some(query), false) => Some(query.clone()),
        (None, true) => None,
        _ => anyhow::bail!(
            "Either --query or --interactive must be specified.\n\
             Use --help for usage information."
        ),
    };

    if let (Some(start), Some(end)) = (args.year_start, args.year_end) {
        if start > end {
            anyhow::bail!(
                "Invalid year range: start year ({}) cannot be greater than end year ({})",
                start,
                end
            );
        }
    }

    let db_path = &config.storage.db_path;
    if !db_path.exists() {
        anyhow::bail!(
            "Database file not found: {}\n\
             Please run the ingest binary first to create the database.",
            db_path.display()
        );
    }

    info!("Loading database from: {}", db_path.display());

    let mut storage = SqliteStorage::open(db_path).context("Failed to open database")?;
    storage.initialize().await.context("Failed to initialize storage")?;

    let stored_config = storage
        .get_config()
        .await
        .context("Failed to retrieve embedding configuration from database")?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Database has no embedding configuration.\n\
                 Please run the ingest binary to create the database first."
            )
        })?;

    let paper_count = storage.count_papers().await.context("Failed to count papers in database")?;
    if paper_count == 0 {
        warn!("Database is empty; every query will return no results");
    } else {
        info!("Database contains {} papers", paper_count);
    }

    let embedding_provider = create_embedding_provider(&config, &stored_config)?;
    let engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

    let year_range = match (args.year_start, args.year_end) {
        (Some(start), Some(end)) => Some(YearRange::new(start, end)),
        (Some(start), None) => Some(YearRange::new(start, i32::MAX)),
        (None, Some(end)) => Some(YearRange::new(i32::MIN, end)),
        (None, None) => None,
    };

    match query {
        None => run_interactive(&engine, args.top_n, year_range, args.format).await?,
        Some(query) => {
            let start = Instant::now();
            let results = execute_search(&engine, &query, args.top_n, year_range).await?;
            print_results(&results, args.format, start.elapsed().as_secs_f64())?;

            if let Some(output) = &args.output {
                write_records(output, &results)?;
            }
        }
    }

    Ok(())
}
