//! Storage layer abstraction and implementations.
//!
//! This module defines the interface for persisting and retrieving paper records
//! and their embeddings. The abstraction allows for different storage backends
//! while keeping one contract: records are keyed by their external id, written
//! in atomic batches, and read back in insertion order.

pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EmbeddingConfig, PaperRecord};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error
    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Schema or migration error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::QueryError(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Year range filter for queries.
///
/// Allows filtering papers by publication year range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    /// Start year (inclusive)
    pub start: i32,

    /// End year (inclusive)
    pub end: i32,
}

impl YearRange {
    /// Create a new year range.
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// A range covering a single year.
    pub fn year(year: i32) -> Self {
        Self::new(year, year)
    }

    /// Check if a year falls within this range.
    pub fn contains(&self, year: i32) -> bool {
        year >= self.start && year <= self.end
    }
}

/// Trait for paper storage backends.
///
/// Implementations must uphold:
/// - at most one record per `id`
/// - `insert_batch` writes every new record of the batch or none of them
/// - `get_all_papers` returns records in insertion order
#[async_trait]
pub trait PaperStorage: Send + Sync {
    /// Initialize the storage (create tables, indexes, etc.).
    ///
    /// This should be idempotent and safe to call multiple times.
    ///
    /// # Errors
    /// Returns `StorageError` if initialization fails
    async fn initialize(&mut self) -> StorageResult<()>;

    /// Store the embedding configuration.
    ///
    /// This configuration is persisted to keep ingestion-time and query-time
    /// embeddings in the same vector space.
    ///
    /// # Errors
    /// Returns `StorageError` if storage fails
    async fn store_config(&mut self, config: &EmbeddingConfig) -> StorageResult<()>;

    /// Retrieve the embedding configuration, or `None` for a fresh store.
    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>>;

    /// Check whether a record with this id is already stored.
    async fn exists_by_id(&self, id: &str) -> StorageResult<bool>;

    /// Insert a batch of embedded records in one transaction.
    ///
    /// Records whose id is already stored are left untouched. On any failure
    /// the whole batch is rolled back.
    ///
    /// # Returns
    /// The number of records actually inserted
    ///
    /// # Errors
    /// Returns `StorageError::SerializationError` if a record has no embedding
    /// (before anything is written), or another variant if the write fails
    async fn insert_batch(&mut self, papers: &[PaperRecord]) -> StorageResult<usize>;

    /// Retrieve all records with their embeddings, in insertion order.
    ///
    /// Used by brute-force ranking, which scans every stored vector.
    ///
    /// # Errors
    /// Returns `StorageError` if retrieval fails
    async fn get_all_papers(&self, year_range: Option<YearRange>) -> StorageResult<Vec<PaperRecord>>;

    /// Get a record by its id.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the record doesn't exist
    async fn get_paper_by_id(&self, id: &str) -> StorageResult<PaperRecord>;

    /// Get the total count of stored records.
    async fn count_papers(&self) -> StorageResult<usize>;
}
