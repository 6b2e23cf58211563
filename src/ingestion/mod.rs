//! Ingestion pipeline module.
//!
//! This module turns provider candidates into stored records: it deduplicates
//! by identifier, skips malformed candidates, generates embeddings for what is
//! left, and persists the result in one atomic batch.
//!
//! # Usage Patterns
//!
//! ## Primary: Opening a Store
//! [`IngestionPipeline::open`] works for both fresh and existing databases. A
//! fresh database gets the provider's embedding configuration recorded; an
//! existing one has its recorded configuration checked against the provider.
//!
//! ```ignore
//! use paperpilot::ingestion::IngestionPipeline;
//! use paperpilot::storage::sqlite::SqliteStorage;
//! use paperpilot::embedding::fastembed::FastEmbedProvider;
//! use paperpilot::provider::{json::JsonFileProvider, SearchRequest};
//!
//! let storage = SqliteStorage::open("papers.db")?;
//! let embedding_provider = FastEmbedProvider::with_defaults()?;
//! let mut pipeline = IngestionPipeline::open(embedding_provider, storage, None).await?;
//!
//! let provider = JsonFileProvider::from_file("candidates.json").await?;
//! let request = SearchRequest::new("graph neural networks", 20, Some(2023));
//! let stats = pipeline.ingest_from_provider(&provider, &request).await?;
//! println!("Inserted: {}, Duplicates: {}", stats.inserted, stats.duplicates_skipped);
//! ```
//!
//! ## Read-only tools
//! [`check_compatibility`] lets a tool that only ranks confirm its embedder
//! matches the configuration recorded in an existing database.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::models::{EmbeddingConfig, PaperRecord};
use crate::provider::{Candidate, PaperProvider, ProviderError, SearchRequest};
use crate::storage::{PaperStorage, StorageError};

/// Default number of abstracts sent to the embedder per call.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    /// Provider operation failed
    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// Invalid input data or incompatible configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Statistics from an ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IngestionStats {
    /// Total number of candidates examined
    pub total_processed: usize,

    /// Number of records newly inserted
    pub inserted: usize,

    /// Number of candidates whose id was already stored or already seen
    pub duplicates_skipped: usize,

    /// Number of candidates missing required fields
    pub malformed_skipped: usize,
}

impl IngestionStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a duplicate that was skipped.
    pub fn record_duplicate(&mut self) {
        self.total_processed += 1;
        self.duplicates_skipped += 1;
    }

    /// Record a malformed candidate that was skipped.
    pub fn record_malformed(&mut self) {
        self.total_processed += 1;
        self.malformed_skipped += 1;
    }

    /// Record a candidate staged for insertion.
    pub fn record_staged(&mut self) {
        self.total_processed += 1;
    }
}

/// Check that an embedding provider produces vectors compatible with a stored
/// configuration.
///
/// # Errors
/// Returns `IngestionError::InvalidInput` naming both sides of the mismatch
pub fn check_compatibility<E>(provider: &E, stored: &EmbeddingConfig) -> IngestionResult<()>
where
    E: EmbeddingProvider + ?Sized,
{
    if provider.model_name() != stored.model_name {
        return Err(IngestionError::InvalidInput(format!(
            "Embedding model mismatch: provider uses '{}' but storage has '{}'",
            provider.model_name(),
            stored.model_name
        )));
    }

    if provider.dimension() != stored.dimension {
        return Err(IngestionError::InvalidInput(format!(
            "Embedding dimension mismatch: provider has {} but storage has {}",
            provider.dimension(),
            stored.dimension
        )));
    }

    Ok(())
}

/// Ingestion pipeline coordinator.
///
/// Owns the embedding provider and the storage for the lifetime of a store.
/// Ingestion takes `&mut self`, so one pipeline never runs two batches at once.
pub struct IngestionPipeline<E, S>
where
    E: EmbeddingProvider,
    S: PaperStorage,
{
    /// Embedding provider for generating paper embeddings
    embedding_provider: E,

    /// Storage backend for persisting papers
    storage: S,

    /// Maximum abstracts per embedding call
    batch_size: usize,
}

impl<E, S> IngestionPipeline<E, S>
where
    E: EmbeddingProvider,
    S: PaperStorage,
{
    /// Extract embedding configuration from a provider.
    fn extract_config(provider: &E) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: provider.model_name().to_string(),
            dimension: provider.dimension(),
        }
    }

    fn build(embedding_provider: E, storage: S, batch_size: Option<usize>) -> Self {
        Self {
            embedding_provider,
            storage,
            batch_size: batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
        }
    }

    /// Open storage for ingestion, recording or validating the embedding
    /// configuration.
    ///
    /// 1. Initializes the storage schema (idempotent)
    /// 2. Records the provider's configuration if none is stored yet
    /// 3. Otherwise validates the provider against the stored configuration
    ///
    /// # Errors
    /// Returns `IngestionError::InvalidInput` on a model or dimension mismatch,
    /// other variants for storage failures
    pub async fn open(embedding_provider: E, mut storage: S, batch_size: Option<usize>) -> IngestionResult<Self> {
        storage.initialize().await?;

        match storage.get_config().await? {
            Some(stored) => check_compatibility(&embedding_provider, &stored)?,
            None => {
                let config = Self::extract_config(&embedding_provider);
                info!(model = %config.model_name, dimension = config.dimension, "Recording embedding configuration");
                storage.store_config(&config).await?;
            }
        }

        Ok(Self::build(embedding_provider, storage, batch_size))
    }

    /// The embedding provider used for both ingestion and ranking.
    pub fn embedding_provider(&self) -> &E {
        &self.embedding_provider
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Ingest candidates in the order given.
    ///
    /// Each candidate is checked by identifier first: one already stored, or
    /// already staged earlier in this call, is skipped without embedding.
    /// Candidates missing required fields are skipped and counted. Everything
    /// staged is embedded and then written in a single atomic batch.
    ///
    /// # Errors
    /// Returns `IngestionError` if an existence check, the embedding, or the
    /// batch write fails. Nothing from this call is stored in that case.
    pub async fn ingest_candidates(&mut self, candidates: Vec<Candidate>) -> IngestionResult<IngestionStats> {
        let mut stats = IngestionStats::new();
        let mut staged: Vec<PaperRecord> = Vec::new();
        let mut staged_ids: HashSet<String> = HashSet::new();

        for candidate in candidates {
            let Some(id) = candidate.identifier().map(str::to_string) else {
                warn!(title = ?candidate.title, "Skipping candidate without identifier");
                stats.record_malformed();
                continue;
            };

            if staged_ids.contains(&id) || self.storage.exists_by_id(&id).await? {
                debug!(id = %id, "Skipping duplicate paper");
                stats.record_duplicate();
                continue;
            }

            match candidate.into_record() {
                Ok(record) => {
                    staged_ids.insert(id);
                    staged.push(record);
                    stats.record_staged();
                }
                Err(reason) => {
                    warn!(id = %id, %reason, "Skipping malformed candidate");
                    stats.record_malformed();
                }
            }
        }

        if staged.is_empty() {
            debug!(processed = stats.total_processed, "No new papers to insert");
            return Ok(stats);
        }

        self.attach_embeddings(&mut staged).await?;

        let inserted = self.storage.insert_batch(&staged).await?;
        // Rows that lost a race with another writer were ignored by the insert
        stats.duplicates_skipped += staged.len().saturating_sub(inserted);
        stats.inserted = inserted;

        info!(
            inserted = stats.inserted,
            duplicates = stats.duplicates_skipped,
            malformed = stats.malformed_skipped,
            "Committed ingestion batch"
        );

        Ok(stats)
    }

    /// Embed every staged abstract, `batch_size` texts per call.
    ///
    /// The embedder sees `abstract_text` exactly as it will be stored.
    async fn attach_embeddings(&self, staged: &mut [PaperRecord]) -> IngestionResult<()> {
        let dimension = self.embedding_provider.dimension();

        for chunk in staged.chunks_mut(self.batch_size) {
            let text_refs: Vec<&str> = chunk.iter().map(|p| p.abstract_text.as_str()).collect();

            let embeddings = self.embedding_provider.embed_batch(&text_refs).await?;
            if embeddings.len() != chunk.len() {
                return Err(EmbeddingError::Other(format!(
                    "Expected {} embeddings, got {}",
                    chunk.len(),
                    embeddings.len()
                ))
                .into());
            }

            for (paper, embedding) in chunk.iter_mut().zip(embeddings) {
                if embedding.len() != dimension {
                    return Err(EmbeddingError::Other(format!(
                        "Embedding for {} has {} dimensions, expected {}",
                        paper.id,
                        embedding.len(),
                        dimension
                    ))
                    .into());
                }
                if embedding.iter().any(|v| !v.is_finite()) {
                    return Err(EmbeddingError::Other(format!("Embedding for {} has non-finite values", paper.id)).into());
                }
                paper.embedding = Some(embedding);
            }
        }

        Ok(())
    }

    /// Run a provider search and ingest the results.
    ///
    /// # Errors
    /// Returns `IngestionError::InvalidInput` for a zero `max_results`,
    /// `IngestionError::ProviderError` if the search fails, and the errors of
    /// [`ingest_candidates`](Self::ingest_candidates) otherwise
    pub async fn ingest_from_provider<P>(&mut self, provider: &P, request: &SearchRequest) -> IngestionResult<IngestionStats>
    where
        P: PaperProvider + ?Sized,
    {
        if request.max_results == 0 {
            return Err(IngestionError::InvalidInput(
                "max_candidates must be at least 1".to_string(),
            ));
        }

        let mut candidates = provider.search(request).await?;
        candidates.truncate(request.max_results);

        info!(
            provider = provider.name(),
            query = %request.query,
            candidates = candidates.len(),
            "Fetched candidates"
        );

        self.ingest_candidates(candidates).await
    }
}
