//! Query processing and ranking module.
//!
//! This module handles search queries, computes similarity rankings, and returns
//! top-k results. It coordinates between the embedding provider and storage layer
//! to perform semantic search.
//!
//! # Usage
//!
//! ```rust,no_run
//! use paperpilot::embedding::fastembed::FastEmbedProvider;
//! use paperpilot::query::{BruteForceSearchEngine, SearchEngine, SearchQuery};
//! use paperpilot::storage::{sqlite::SqliteStorage, PaperStorage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let embedding_provider = FastEmbedProvider::with_defaults()?;
//! let mut storage = SqliteStorage::open("papers.db")?;
//! storage.initialize().await?;
//!
//! let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);
//!
//! let query = SearchQuery::new("graph neural networks", Some(5), None);
//! let results = search_engine.search(&query).await?;
//!
//! // Results are sorted by descending similarity score
//! for result in results {
//!     println!("{} - Score: {:.3}", result.paper.title, result.score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Text normalization is automatically applied to queries before embedding.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::embedding::{normalize_text, EmbeddingError, EmbeddingProvider};
use crate::models::{PaperRecord, SearchResult};
use crate::storage::{PaperStorage, StorageError, YearRange};

/// Result count used when a query does not ask for one.
pub const DEFAULT_TOP_K: usize = 5;

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    /// Storage access failed
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A stored vector does not live in the query's embedding space
    #[error("Paper {id} has a {actual}-dimensional embedding, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Search query parameters.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// The search query text (will be normalized and embedded)
    pub query: String,

    /// Maximum number of results to return
    pub top_k: usize,

    /// Optional publication year range filter
    pub year_range: Option<YearRange>,
}

impl SearchQuery {
    /// Create a new search query.
    ///
    /// # Arguments
    /// * `query` - The search query text
    /// * `top_k` - Maximum number of results to return (default: [`DEFAULT_TOP_K`])
    /// * `year_range` - Optional year range filter
    pub fn new(query: impl Into<String>, top_k: Option<usize>, year_range: Option<YearRange>) -> Self {
        Self {
            query: query.into(),
            top_k: top_k.unwrap_or(DEFAULT_TOP_K),
            year_range,
        }
    }
}

/// Trait for search and ranking engines.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Execute a search query and return ranked results.
    ///
    /// # Returns
    /// At most `query.top_k` results, highest score first. An empty store
    /// yields an empty vector.
    ///
    /// # Errors
    /// Returns `QueryError` if the query is blank or embedding/storage fails
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<SearchResult>>;
}

/// Compute cosine similarity between two vectors.
///
/// Returns `None` if the vectors have different lengths. A zero-magnitude
/// vector is orthogonal to everything and scores `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }

    Some(dot_product / (norm_a * norm_b))
}

/// Score every paper against `query_embedding` and keep the best `top_k`.
///
/// The sort is stable, so equal scores keep the input (insertion) order.
///
/// # Errors
/// Returns `QueryError::DimensionMismatch` if a paper has no embedding or one
/// of a different length
pub fn rank_papers(
    query_embedding: &[f32],
    papers: Vec<PaperRecord>,
    top_k: usize,
) -> QueryResult<Vec<SearchResult>> {
    let mut results = Vec::with_capacity(papers.len());

    for paper in papers {
        let stored = paper.embedding.as_deref().unwrap_or_default();
        let score = cosine_similarity(query_embedding, stored).ok_or_else(|| {
            QueryError::DimensionMismatch {
                id: paper.id.clone(),
                expected: query_embedding.len(),
                actual: stored.len(),
            }
        })?;
        results.push(SearchResult::new(paper, score));
    }

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_k);

    Ok(results)
}

/// Brute-force search engine.
///
/// Retrieves every candidate record from storage, computes cosine similarity
/// with the query embedding, and returns the top-k results. Borrows its
/// collaborators so a store can rank without giving them up.
pub struct BruteForceSearchEngine<'a, E: ?Sized, S: ?Sized> {
    /// Embedding provider for query embedding
    embedding_provider: &'a E,

    /// Storage backend for paper retrieval
    storage: &'a S,
}

impl<'a, E, S> BruteForceSearchEngine<'a, E, S>
where
    E: EmbeddingProvider + ?Sized,
    S: PaperStorage + ?Sized,
{
    /// Create a new brute-force search engine.
    pub fn new(embedding_provider: &'a E, storage: &'a S) -> Self {
        Self {
            embedding_provider,
            storage,
        }
    }
}

#[async_trait]
impl<'a, E, S> SearchEngine for BruteForceSearchEngine<'a, E, S>
where
    E: EmbeddingProvider + ?Sized,
    S: PaperStorage + ?Sized,
{
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<SearchResult>> {
        let papers = self.storage.get_all_papers(query.year_range).await?;
        if papers.is_empty() || query.top_k == 0 {
            debug!(stored = papers.len(), top_k = query.top_k, "Nothing to rank");
            return Ok(Vec::new());
        }

        let normalized_query = normalize_text(&query.query);
        if normalized_query.is_empty() {
            return Err(QueryError::InvalidQuery("query text is empty".to_string()));
        }

        let query_embedding = self.embedding_provider.embed(&normalized_query).await?;
        let scanned = papers.len();
        let results = rank_papers(&query_embedding, papers, query.top_k)?;

        debug!(scanned, returned = results.len(), "Ranked stored papers");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmbeddingConfig, RelevanceLevel};
    use std::sync::{Arc, Mutex};

    // Mock EmbeddingProvider that always answers with a fixed query vector
    struct MockEmbeddingProvider {
        query_embedding: Vec<f32>,
        calls: Arc<Mutex<Vec<String>>>,
        should_fail: bool,
    }

    impl MockEmbeddingProvider {
        fn new(query_embedding: Vec<f32>) -> Self {
            Self {
                query_embedding,
                calls: Arc::new(Mutex::new(Vec::new())),
                should_fail: false,
            }
        }

        fn with_failure() -> Self {
            Self {
                should_fail: true,
                ..Self::new(vec![1.0, 0.0, 0.0])
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.should_fail {
                return Err(EmbeddingError::ApiError("Mock embedding failure".to_string()));
            }
            self.calls.lock().unwrap().push(text.to_string());
            Ok(self.query_embedding.clone())
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut results = Vec::new();
            for text in texts {
                results.push(self.embed(text).await?);
            }
            Ok(results)
        }

        fn dimension(&self) -> usize {
            self.query_embedding.len()
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    // Mock PaperStorage for testing
    struct MockStorage {
        papers: Vec<PaperRecord>,
        should_fail: bool,
    }

    impl MockStorage {
        fn new(papers: Vec<PaperRecord>) -> Self {
            Self {
                papers,
                should_fail: false,
            }
        }

        fn with_failure() -> Self {
            Self {
                papers: Vec::new(),
                should_fail: true,
            }
        }
    }

    #[async_trait]
    impl PaperStorage for MockStorage {
        async fn initialize(&mut self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn store_config(&mut self, _config: &EmbeddingConfig) -> Result<(), StorageError> {
            Ok(())
        }

        async fn get_config(&self) -> Result<Option<EmbeddingConfig>, StorageError> {
            Ok(None)
        }

        async fn exists_by_id(&self, id: &str) -> Result<bool, StorageError> {
            Ok(self.papers.iter().any(|p| p.id == id))
        }

        async fn insert_batch(&mut self, papers: &[PaperRecord]) -> Result<usize, StorageError> {
            self.papers.extend_from_slice(papers);
            Ok(papers.len())
        }

        async fn get_all_papers(&self, year_range: Option<YearRange>) -> Result<Vec<PaperRecord>, StorageError> {
            if self.should_fail {
                return Err(StorageError::QueryError("Mock storage failure".to_string()));
            }

            Ok(self
                .papers
                .iter()
                .filter(|p| match (year_range, p.publish_year()) {
                    (Some(range), Some(year)) => range.contains(year),
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .cloned()
                .collect())
        }

        async fn get_paper_by_id(&self, id: &str) -> Result<PaperRecord, StorageError> {
            self.papers
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(format!("Paper {} not found", id)))
        }

        async fn count_papers(&self) -> Result<usize, StorageError> {
            Ok(self.papers.len())
        }
    }

    fn create_test_paper(id: &str, year: i32, embedding: Vec<f32>) -> PaperRecord {
        PaperRecord {
            id: id.to_string(),
            title: format!("Paper {}", id),
            authors: "Test Author".to_string(),
            published_date: format!("{}-06-01", year),
            url: format!("http://example.org/{}.pdf", id),
            abstract_text: "Test abstract".to_string(),
            embedding: Some(embedding),
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.paper.id.as_str()).collect()
    }

    #[test]
    fn test_cosine_similarity() {
        let score = cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]).unwrap();
        assert!((score - 1.0).abs() < 1e-6);

        let score = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(score.abs() < 1e-6);

        let score = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), Some(0.0));
    }

    #[test]
    fn test_search_query_defaults() {
        let query = SearchQuery::new("test query", None, None);
        assert_eq!(query.top_k, DEFAULT_TOP_K);
        assert!(query.year_range.is_none());
    }

    #[test]
    fn test_rank_papers_stable_ties() {
        let papers = vec![
            create_test_paper("first", 2020, vec![0.0, 1.0]),
            create_test_paper("best", 2020, vec![1.0, 0.0]),
            create_test_paper("second", 2020, vec![0.0, 2.0]),
        ];

        let results = rank_papers(&[1.0, 0.0], papers, 10).unwrap();
        assert_eq!(ids(&results), vec!["best", "first", "second"]);
    }

    #[test]
    fn test_rank_papers_with_nan_score_keeps_order() {
        let papers = vec![
            create_test_paper("first", 2020, vec![0.0, 1.0]),
            create_test_paper("broken", 2020, vec![f32::NAN, 1.0]),
            create_test_paper("best", 2020, vec![1.0, 0.0]),
            create_test_paper("second", 2020, vec![0.0, 2.0]),
        ];

        let results = rank_papers(&[1.0, 0.0], papers, 10).unwrap();
        let finite: Vec<&str> = results
            .iter()
            .filter(|r| r.score.is_finite())
            .map(|r| r.paper.id.as_str())
            .collect();
        assert_eq!(results.len(), 4);
        assert_eq!(finite, vec!["best", "first", "second"]);
    }

    #[test]
    fn test_rank_papers_dimension_mismatch() {
        let papers = vec![create_test_paper("a", 2020, vec![1.0, 0.0, 0.0])];
        let err = rank_papers(&[1.0, 0.0], papers, 10).unwrap_err();
        assert!(matches!(err, QueryError::DimensionMismatch { expected: 2, actual: 3, .. }));
    }

    #[tokio::test]
    async fn test_basic_search_with_sorting() {
        let papers = vec![
            create_test_paper("a", 2020, vec![0.0, 1.0, 0.0]),
            create_test_paper("b", 2021, vec![0.8, 0.6, 0.0]),
            create_test_paper("c", 2022, vec![1.0, 0.0, 0.0]),
        ];

        let embedding_provider = MockEmbeddingProvider::new(vec![1.0, 0.0, 0.0]);
        let storage = MockStorage::new(papers);
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let query = SearchQuery::new("test query", Some(3), None);
        let results = search_engine.search(&query).await.unwrap();

        assert_eq!(ids(&results), vec!["c", "b", "a"]);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(results.iter().all(|r| r.paper.embedding.is_none()));
    }

    #[tokio::test]
    async fn test_top_k_truncation() {
        let papers = vec![
            create_test_paper("1", 2020, vec![1.0, 0.0, 0.0]),
            create_test_paper("2", 2021, vec![0.9, 0.1, 0.0]),
            create_test_paper("3", 2022, vec![0.8, 0.2, 0.0]),
            create_test_paper("4", 2023, vec![0.7, 0.3, 0.0]),
            create_test_paper("5", 2024, vec![0.6, 0.4, 0.0]),
        ];

        let embedding_provider = MockEmbeddingProvider::new(vec![1.0, 0.0, 0.0]);
        let storage = MockStorage::new(papers);
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let results = search_engine.search(&SearchQuery::new("test", Some(2), None)).await.unwrap();
        assert_eq!(ids(&results), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_top_k_larger_than_store() {
        let papers = vec![
            create_test_paper("1", 2020, vec![1.0, 0.0]),
            create_test_paper("2", 2021, vec![0.0, 1.0]),
        ];

        let embedding_provider = MockEmbeddingProvider::new(vec![1.0, 0.0]);
        let storage = MockStorage::new(papers);
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let results = search_engine.search(&SearchQuery::new("test", Some(10), None)).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_year_range_filtering() {
        let papers = vec![
            create_test_paper("old", 2015, vec![1.0, 0.0, 0.0]),
            create_test_paper("recent-1", 2020, vec![0.9, 0.1, 0.0]),
            create_test_paper("recent-2", 2021, vec![0.8, 0.2, 0.0]),
            create_test_paper("newest", 2025, vec![0.7, 0.3, 0.0]),
        ];

        let embedding_provider = MockEmbeddingProvider::new(vec![1.0, 0.0, 0.0]);
        let storage = MockStorage::new(papers);
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let query = SearchQuery::new("test", Some(10), Some(YearRange::new(2020, 2021)));
        let results = search_engine.search(&query).await.unwrap();

        assert_eq!(ids(&results), vec!["recent-1", "recent-2"]);
    }

    #[tokio::test]
    async fn test_empty_store_skips_embedding() {
        let embedding_provider = MockEmbeddingProvider::with_failure();
        let storage = MockStorage::new(Vec::new());
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let results = search_engine.search(&SearchQuery::new("test", Some(5), None)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_query_is_normalized_before_embedding() {
        let embedding_provider = MockEmbeddingProvider::new(vec![1.0, 0.0]);
        let storage = MockStorage::new(vec![create_test_paper("1", 2020, vec![1.0, 0.0])]);
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        search_engine
            .search(&SearchQuery::new("  graph\n neural  networks ", Some(1), None))
            .await
            .unwrap();

        assert_eq!(*embedding_provider.calls.lock().unwrap(), vec!["graph neural networks"]);
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let embedding_provider = MockEmbeddingProvider::new(vec![1.0, 0.0]);
        let storage = MockStorage::new(vec![create_test_paper("1", 2020, vec![1.0, 0.0])]);
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let result = search_engine.search(&SearchQuery::new(" \n ", Some(5), None)).await;
        assert!(matches!(result, Err(QueryError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_blank_query_on_empty_store_returns_nothing() {
        let embedding_provider = MockEmbeddingProvider::with_failure();
        let storage = MockStorage::new(Vec::new());
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let results = search_engine.search(&SearchQuery::new("   ", Some(5), None)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_error_propagation() {
        let embedding_provider = MockEmbeddingProvider::with_failure();
        let storage = MockStorage::new(vec![create_test_paper("1", 2020, vec![1.0, 0.0, 0.0])]);
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let result = search_engine.search(&SearchQuery::new("test", Some(10), None)).await;
        match result {
            Err(QueryError::EmbeddingError(_)) => {}
            other => panic!("Expected EmbeddingError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_storage_error_propagation() {
        let embedding_provider = MockEmbeddingProvider::new(vec![1.0, 0.0, 0.0]);
        let storage = MockStorage::with_failure();
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let result = search_engine.search(&SearchQuery::new("test", Some(10), None)).await;
        match result {
            Err(QueryError::StorageError(_)) => {}
            other => panic!("Expected StorageError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relevance_level_assignment() {
        let papers = vec![
            create_test_paper("identical", 2020, vec![1.0, 0.0, 0.0]),
            create_test_paper("similar", 2021, vec![0.8, 0.6, 0.0]),
        ];

        let embedding_provider = MockEmbeddingProvider::new(vec![1.0, 0.0, 0.0]);
        let storage = MockStorage::new(papers);
        let search_engine = BruteForceSearchEngine::new(&embedding_provider, &storage);

        let results = search_engine.search(&SearchQuery::new("test", Some(10), None)).await.unwrap();

        assert_eq!(results[0].relevance, RelevanceLevel::Identical);
        assert_eq!(results[1].relevance, RelevanceLevel::Similar);
    }
}
