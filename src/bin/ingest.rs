//! Ingest binary entry point.
//!
//! Searches arXiv (or a local JSON file of candidates) for a topic and adds
//! every paper not already in the database.
//!
//! # Examples
//!
//! Ingest from arXiv:
//! ```bash
//! ingest --query "graph neural networks" --max-candidates 10 --year 2023
//! ```
//!
//! Ingest an offline candidate file:
//! ```bash
//! ingest --query "graph neural networks" --input candidates.json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paperpilot::{
    config::{AppConfig, EmbeddingBackend},
    embedding::{DynamicEmbeddingProvider, EmbeddingProvider},
    ingestion::IngestionStats,
    logging::init_logging,
    provider::{arxiv::ArxivProvider, json::JsonFileProvider, PaperProvider},
    storage::sqlite::SqliteStorage,
    store::PaperStore,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Search for papers on a topic and add the new ones to the database
#[derive(Parser, Debug)]
#[command(
    name = "ingest",
    version,
    about = "Search for papers and add new ones to the database",
    long_about = "Searches arXiv for a topic, skips papers already stored (by identifier), \
                  embeds the abstracts of the rest and stores them in one transaction.

EXAMPLES:
  Ingest the 10 most relevant 2023 papers:
    ingest --query \"graph neural networks\" --max-candidates 10 --year 2023

  Ingest from a local candidate file:
    ingest --query \"graph neural networks\" --input candidates.json

  Use OpenAI embeddings:
    OPENAI_API_KEY=sk-... ingest --query \"transformers\" --embedding-backend open-ai"
)]
struct IngestArgs {
    /// Topic to search for
    #[arg(short, long, value_name = "TEXT")]
    query: String,

    /// Maximum number of candidates to request
    #[arg(long, value_name = "N", default_value = "20")]
    max_candidates: usize,

    /// Restrict candidates to papers submitted in this year
    #[arg(long, value_name = "YEAR")]
    year: Option<i32>,

    /// Read candidates from a JSON file instead of querying arXiv
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE", env = "PAPERPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Database file path
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Embedding backend to use for a new database
    #[arg(long, value_enum)]
    embedding_backend: Option<EmbeddingBackend>,

    /// Specific embedding model name (backend-dependent)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

/// Resolve configuration: defaults, file, environment, then flags.
fn load_config(args: &IngestArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(db_path) = &args.db_path {
        config.storage.db_path = db_path.clone();
    }
    if let Some(backend) = args.embedding_backend {
        config.embedding.backend = backend;
    }
    if let Some(model) = &args.embedding_model {
        config.embedding.model = Some(model.clone());
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.embedding.cache_dir = Some(cache_dir.clone());
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    Ok(config)
}

/// Create a spinner shown while the provider and embedder work
fn create_spinner(message: String) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed_precise}] {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    Ok(spinner)
}

fn print_summary(stats: &IngestionStats, elapsed: Duration) {
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Ingestion Completed               ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Total processed:      {:>16} ║", stats.total_processed);
    println!("║ Added:                {:>16} ║", stats.inserted);
    println!("║ Duplicates skipped:   {:>16} ║", stats.duplicates_skipped);
    println!("║ Malformed skipped:    {:>16} ║", stats.malformed_skipped);
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");
}

/// Run one ingest against whichever provider was selected
async fn run<P: PaperProvider>(
    provider: P,
    embedding_provider: DynamicEmbeddingProvider,
    storage: SqliteStorage,
    args: &IngestArgs,
) -> Result<IngestionStats> {
    let mut store = PaperStore::open(provider, embedding_provider, storage)
        .await
        .context("Failed to open paper store")?;

    let before = store.len().await.context("Failed to count stored papers")?;
    debug!(stored = before, "Opened paper store");

    let spinner = create_spinner(format!(
        "Searching {} for \"{}\"...",
        store.provider().name(),
        args.query
    ))?;

    let result = store
        .ingest_with_stats(&args.query, args.max_candidates, args.year)
        .await;
    spinner.finish_and_clear();

    let stats = result.context("Ingestion failed")?;
    info!(
        stored = before + stats.inserted,
        "Database now holds {} papers",
        before + stats.inserted
    );
    Ok(stats)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IngestArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config.logging.level).context("Failed to initialize logging")?;

    info!("Starting paper ingestion");
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();

    let embedding_provider = DynamicEmbeddingProvider::from_settings(&config.embedding)
        .context("Failed to create embedding provider")?;
    info!(
        "Embedding provider initialized: model={}, dimension={}",
        embedding_provider.model_name(),
        embedding_provider.dimension()
    );

    let storage = SqliteStorage::open(&config.storage.db_path)
        .with_context(|| format!("Failed to open database {}", config.storage.db_path.display()))?;
    info!("Database path: {}", config.storage.db_path.display());

    let stats = match &args.input {
        Some(input) => {
            let provider = JsonFileProvider::from_file(input)
                .await
                .with_context(|| format!("Failed to load candidates from {}", input.display()))?;
            if provider.is_empty() {
                warn!("No candidates found in {}", input.display());
            }
            run(provider, embedding_provider, storage, &args).await?
        }
        None => {
            let provider = ArxivProvider::from_settings(&config.arxiv).context("Failed to create arXiv client")?;
            run(provider, embedding_provider, storage, &args).await?
        }
    };

    print_summary(&stats, start_time.elapsed());

    if stats.malformed_skipped > 0 {
        warn!(
            "{} candidates were missing required fields - check logs for details",
            stats.malformed_skipped
        );
    }

    Ok(())
}
