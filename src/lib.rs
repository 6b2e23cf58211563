//! PaperPilot - a deduplicating, embedding-indexed store of research papers.
//!
//! The library retrieves candidate papers from a search provider, stores each
//! one at most once (keyed by the provider's identifier) together with an
//! embedding of its abstract, and ranks the stored papers by cosine similarity
//! to a free-text query.
//!
//! # Architecture
//!
//! - **models**: Core data structures (PaperRecord, SearchResult, EmbeddingConfig)
//! - **provider**: Candidate sources (arXiv API, local JSON files)
//! - **embedding**: Text embedding generation and normalization
//! - **storage**: Database persistence and retrieval (SQLite-based)
//! - **ingestion**: Deduplicate, embed and persist candidates in one batch
//! - **query**: Similarity ranking
//! - **store**: The `PaperStore` facade with `ingest` and `rank`
//! - **config** / **logging**: Ambient setup used by the binaries
//!
//! # Workflow
//!
//! ## Ingestion
//!
//! 1. Ask the provider for up to N candidates, optionally limited to one year
//! 2. Skip candidates whose id is already stored (or already seen)
//! 3. Skip candidates missing required fields
//! 4. Embed the remaining abstracts and write them in one transaction
//!
//! ## Ranking
//!
//! 1. Normalize and embed the query text
//! 2. Compute cosine similarity against every stored embedding
//! 3. Return the top-N records, metadata only
//!
//! # Example
//!
//! ```ignore
//! use paperpilot::{
//!     embedding::fastembed::FastEmbedProvider,
//!     provider::arxiv::{ArxivProvider, DEFAULT_ARXIV_ENDPOINT},
//!     storage::sqlite::SqliteStorage,
//!     store::PaperStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let arxiv = ArxivProvider::new(DEFAULT_ARXIV_ENDPOINT, std::time::Duration::from_secs(30))?;
//!     let embedder = FastEmbedProvider::with_defaults()?;
//!     let mut store = PaperStore::open(arxiv, embedder, SqliteStorage::open("papers.db")?).await?;
//!
//!     let added = store.ingest("graph neural networks", 10, Some(2023)).await?;
//!     println!("added {added} papers");
//!
//!     for paper in store.rank("graph neural networks", 3).await? {
//!         println!("{} ({})", paper.title, paper.published_date);
//!     }
//!
//!     Ok(())
//! }
//! ```

// Public modules
pub mod config;
pub mod embedding;
pub mod ingestion;
pub mod logging;
pub mod models;
pub mod provider;
pub mod query;
pub mod storage;
pub mod store;

// Re-export commonly used types at the crate root
pub use embedding::EmbeddingProvider;
pub use models::{EmbeddingConfig, PaperRecord, RelevanceLevel, SearchResult};
pub use provider::{Candidate, PaperProvider, SearchRequest};
pub use query::{SearchEngine, SearchQuery};
pub use storage::{PaperStorage, YearRange};
pub use store::{PaperStore, StoreError, StoreResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
