//! The paper store: deduplicated ingestion plus similarity ranking.
//!
//! [`PaperStore`] ties a [`PaperProvider`], an [`EmbeddingProvider`] and a
//! [`PaperStorage`] together behind two operations:
//!
//! - [`PaperStore::ingest`] searches the provider and adds every candidate
//!   whose id is not stored yet, in one atomic batch
//! - [`PaperStore::rank`] returns stored records ordered by cosine similarity
//!   to a query
//!
//! `ingest` takes `&mut self` and `rank` takes `&self`, so a shared store can
//! serve any number of concurrent rankings while writes stay exclusive.
//!
//! ```ignore
//! use paperpilot::store::PaperStore;
//!
//! let mut store = PaperStore::open(arxiv, embedder, SqliteStorage::open("papers.db")?).await?;
//! let added = store.ingest("graph neural networks", 10, Some(2023)).await?;
//! let top = store.rank("graph neural networks", 3).await?;
//! ```

use thiserror::Error;
use tracing::info;

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::ingestion::{IngestionError, IngestionPipeline, IngestionStats};
use crate::models::{PaperRecord, SearchResult};
use crate::provider::{DateRange, PaperProvider, ProviderError, SearchRequest};
use crate::query::{BruteForceSearchEngine, QueryError, SearchEngine, SearchQuery};
use crate::storage::{PaperStorage, StorageError, YearRange};

/// Errors surfaced by the store.
///
/// Provider failures are kept apart from storage and embedding failures so a
/// caller can tell "the search failed" from "there was nothing to find".
#[derive(Debug, Error)]
pub enum StoreError {
    /// The search provider failed or timed out
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The persistence layer failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Bad arguments or an incompatible store
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<IngestionError> for StoreError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::ProviderError(e) => StoreError::Provider(e),
            IngestionError::StorageError(e) => StoreError::Storage(e),
            IngestionError::EmbeddingError(e) => StoreError::Embedding(e),
            IngestionError::InvalidInput(msg) => StoreError::InvalidInput(msg),
        }
    }
}

impl From<QueryError> for StoreError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::EmbeddingError(e) => StoreError::Embedding(e),
            QueryError::StorageError(e) => StoreError::Storage(e),
            QueryError::InvalidQuery(msg) => StoreError::InvalidInput(msg),
            mismatch @ QueryError::DimensionMismatch { .. } => {
                StoreError::Storage(StorageError::SerializationError(mismatch.to_string()))
            }
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A deduplicating, embedding-indexed collection of papers.
pub struct PaperStore<P, E, S>
where
    P: PaperProvider,
    E: EmbeddingProvider,
    S: PaperStorage,
{
    provider: P,
    pipeline: IngestionPipeline<E, S>,
}

impl<P, E, S> PaperStore<P, E, S>
where
    P: PaperProvider,
    E: EmbeddingProvider,
    S: PaperStorage,
{
    /// Open a store over `storage`.
    ///
    /// A fresh storage records the embedder's model and dimension; an existing
    /// one must have been built with the same embedder.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidInput` for an embedder mismatch and
    /// `StoreError::Storage` if the storage cannot be initialized
    pub async fn open(provider: P, embedding_provider: E, storage: S) -> StoreResult<Self> {
        let pipeline = IngestionPipeline::open(embedding_provider, storage, None).await?;
        Ok(Self { provider, pipeline })
    }

    /// Search the provider and add every new candidate.
    ///
    /// Returns the number of records added; duplicates and malformed
    /// candidates count as zero.
    ///
    /// # Errors
    /// See [`ingest_with_stats`](Self::ingest_with_stats)
    pub async fn ingest(&mut self, query: &str, max_candidates: usize, year_filter: Option<i32>) -> StoreResult<usize> {
        Ok(self.ingest_with_stats(query, max_candidates, year_filter).await?.inserted)
    }

    /// Like [`ingest`](Self::ingest), reporting every candidate's outcome.
    ///
    /// # Errors
    /// - `StoreError::InvalidInput` for a blank query, a zero `max_candidates`
    ///   or an unrepresentable year
    /// - `StoreError::Provider` if the search fails; nothing is stored
    /// - `StoreError::Embedding` / `StoreError::Storage` if the batch cannot be
    ///   embedded or written; nothing from the batch is stored
    pub async fn ingest_with_stats(
        &mut self,
        query: &str,
        max_candidates: usize,
        year_filter: Option<i32>,
    ) -> StoreResult<IngestionStats> {
        if query.trim().is_empty() {
            return Err(StoreError::InvalidInput("query must not be empty".to_string()));
        }
        if let Some(year) = year_filter {
            if DateRange::calendar_year(year).is_none() {
                return Err(StoreError::InvalidInput(format!("unsupported year filter {}", year)));
            }
        }

        let request = SearchRequest::new(query.trim(), max_candidates, year_filter);
        let stats = self.pipeline.ingest_from_provider(&self.provider, &request).await?;

        info!(
            query = %request.query,
            year = ?year_filter,
            added = stats.inserted,
            "Ingest finished"
        );
        Ok(stats)
    }

    /// The `top_n` stored records most similar to `query`, most similar first.
    ///
    /// Returns fewer than `top_n` records when the store holds fewer, and an
    /// empty vector for an empty store. Records carry no embedding.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidInput` for a blank query against a non-empty
    /// store, and embedding or storage errors otherwise
    pub async fn rank(&self, query: &str, top_n: usize) -> StoreResult<Vec<PaperRecord>> {
        Ok(self
            .rank_scored(query, top_n, None)
            .await?
            .into_iter()
            .map(|result| result.paper)
            .collect())
    }

    /// Ranked results with their similarity scores, optionally restricted to
    /// a range of publication years.
    ///
    /// # Errors
    /// Same as [`rank`](Self::rank)
    pub async fn rank_scored(
        &self,
        query: &str,
        top_n: usize,
        year_range: Option<YearRange>,
    ) -> StoreResult<Vec<SearchResult>> {
        let engine = BruteForceSearchEngine::new(self.pipeline.embedding_provider(), self.pipeline.storage());
        let results = engine.search(&SearchQuery::new(query, Some(top_n), year_range)).await?;
        Ok(results)
    }

    /// Look up a stored record (without its embedding).
    pub async fn get(&self, id: &str) -> StoreResult<Option<PaperRecord>> {
        match self.pipeline.storage().get_paper_by_id(id).await {
            Ok(paper) => Ok(Some(paper.metadata())),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.pipeline.storage().count_papers().await?)
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn embedding_provider(&self) -> &E {
        self.pipeline.embedding_provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Candidate, ProviderResult};
    use crate::storage::sqlite::SqliteStorage;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    const KEYWORDS: [&str; 3] = ["graph", "vision", "language"];

    /// Embeds text as keyword counts, so similarity is predictable.
    #[derive(Clone)]
    struct KeywordEmbedder {
        model_name: String,
        state: Arc<Mutex<EmbedderState>>,
    }

    #[derive(Default)]
    struct EmbedderState {
        calls: usize,
        should_fail: bool,
    }

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                model_name: "keyword-embedder".to_string(),
                state: Arc::new(Mutex::new(EmbedderState::default())),
            }
        }

        fn named(model_name: &str) -> Self {
            Self {
                model_name: model_name.to_string(),
                ..Self::new()
            }
        }

        fn with_failure(self) -> Self {
            self.state.lock().unwrap().should_fail = true;
            self
        }

        fn calls(&self) -> usize {
            self.state.lock().unwrap().calls
        }

        fn vector(text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            KEYWORDS
                .iter()
                .map(|k| lower.matches(k).count() as f32 + 0.01)
                .collect()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut batch = self.embed_batch(&[text]).await?;
            Ok(batch.remove(0))
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            if state.should_fail {
                return Err(EmbeddingError::ApiError("embedder offline".to_string()));
            }
            Ok(texts.iter().map(|t| Self::vector(t)).collect())
        }

        fn dimension(&self) -> usize {
            KEYWORDS.len()
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }

    /// Provider returning a scripted response, recording each request.
    #[derive(Clone, Default)]
    struct ScriptedProvider {
        state: Arc<Mutex<ScriptedState>>,
    }

    #[derive(Default)]
    struct ScriptedState {
        candidates: Vec<Candidate>,
        requests: Vec<SearchRequest>,
        should_fail: bool,
    }

    impl ScriptedProvider {
        fn returning(candidates: Vec<Candidate>) -> Self {
            let provider = Self::default();
            provider.state.lock().unwrap().candidates = candidates;
            provider
        }

        fn set_candidates(&self, candidates: Vec<Candidate>) {
            self.state.lock().unwrap().candidates = candidates;
        }

        fn fail(&self) {
            self.state.lock().unwrap().should_fail = true;
        }

        fn requests(&self) -> Vec<SearchRequest> {
            self.state.lock().unwrap().requests.clone()
        }
    }

    #[async_trait]
    impl PaperProvider for ScriptedProvider {
        async fn search(&self, request: &SearchRequest) -> ProviderResult<Vec<Candidate>> {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            if state.should_fail {
                return Err(ProviderError::NetworkError("connection refused".to_string()));
            }
            Ok(state.candidates.iter().take(request.max_results).cloned().collect())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn candidate(id: &str, abstract_text: &str) -> Candidate {
        Candidate {
            id: Some(format!("http://arxiv.org/abs/{}", id)),
            title: Some(format!("Paper {}", id)),
            authors: vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()],
            published: Some("2023-04-05T12:00:00Z".to_string()),
            abstract_text: Some(abstract_text.to_string()),
            url: Some(format!("http://arxiv.org/pdf/{}", id)),
        }
    }

    fn graph_candidates(prefix: &str, n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                let abstract_text = format!("{} {}", "graph ".repeat(i + 1), "vision ".repeat(n - i));
                candidate(&format!("{}{}", prefix, i), &abstract_text)
            })
            .collect()
    }

    async fn open_store(
        provider: ScriptedProvider,
        embedder: KeywordEmbedder,
    ) -> PaperStore<ScriptedProvider, KeywordEmbedder, SqliteStorage> {
        PaperStore::open(provider, embedder, SqliteStorage::in_memory().unwrap())
            .await
            .unwrap()
    }

    fn ids(records: &[PaperRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_repeated_ingest_is_idempotent() {
        let provider = ScriptedProvider::returning(graph_candidates("p", 4));
        let mut store = open_store(provider, KeywordEmbedder::new()).await;

        assert_eq!(store.ingest("graphs", 10, None).await.unwrap(), 4);
        assert_eq!(store.ingest("graphs", 10, None).await.unwrap(), 0);
        assert_eq!(store.len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_ingest_builds_year_restricted_request() {
        let provider = ScriptedProvider::returning(Vec::new());
        let mut store = open_store(provider.clone(), KeywordEmbedder::new()).await;

        assert_eq!(store.ingest("  graph neural networks ", 10, Some(2023)).await.unwrap(), 0);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query, "graph neural networks");
        assert_eq!(requests[0].max_results, 10);
        assert_eq!(requests[0].date_range, DateRange::calendar_year(2023));
    }

    #[tokio::test]
    async fn test_ingest_rejects_bad_arguments() {
        let provider = ScriptedProvider::returning(graph_candidates("p", 2));
        let mut store = open_store(provider.clone(), KeywordEmbedder::new()).await;

        assert!(matches!(store.ingest("   ", 10, None).await, Err(StoreError::InvalidInput(_))));
        assert!(matches!(store.ingest("graphs", 0, None).await, Err(StoreError::InvalidInput(_))));
        assert!(matches!(
            store.ingest("graphs", 10, Some(i32::MAX)).await,
            Err(StoreError::InvalidInput(_))
        ));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_with_wrongly_typed_element_still_ingests_the_rest() {
        use crate::provider::json::JsonFileProvider;
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"[
            {"id": "a", "title": "Alpha", "published": "2023-01-01", "summary": "graph", "url": "http://a"},
            {"id": 12345, "title": "Broken", "authors": null, "published": "2023-01-01", "summary": "graph", "url": "http://x"},
            {"id": "c", "title": "Gamma", "published": "2023-01-01", "summary": "vision", "url": "http://c"}
        ]"#,
        )
        .unwrap();

        let provider = JsonFileProvider::from_file(file.path()).await.unwrap();
        let mut store = PaperStore::open(provider, KeywordEmbedder::new(), SqliteStorage::in_memory().unwrap())
            .await
            .unwrap();

        let stats = store.ingest_with_stats("graphs", 10, None).await.unwrap();
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.malformed_skipped, 1);
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_distinguishable() {
        let provider = ScriptedProvider::returning(graph_candidates("p", 2));
        provider.fail();
        let mut store = open_store(provider, KeywordEmbedder::new()).await;

        let err = store.ingest("graphs", 10, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Provider(_)), "got {:?}", err);
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_candidate_is_skipped() {
        let mut candidates = graph_candidates("p", 5);
        candidates[2].abstract_text = None;
        let provider = ScriptedProvider::returning(candidates);
        let mut store = open_store(provider, KeywordEmbedder::new()).await;

        let stats = store.ingest_with_stats("graphs", 10, None).await.unwrap();
        assert_eq!(stats.inserted, 4);
        assert_eq!(stats.malformed_skipped, 1);
        assert!(store.get("http://arxiv.org/abs/p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rank_orders_by_cosine_similarity() {
        let provider = ScriptedProvider::returning(vec![
            candidate("vision", "vision transformers for vision"),
            candidate("mixed", "graph models for vision"),
            candidate("graph", "graph networks on graph data"),
        ]);
        let mut store = open_store(provider, KeywordEmbedder::new()).await;
        store.ingest("anything", 10, None).await.unwrap();

        let ranked = store.rank("graph neural networks", 10).await.unwrap();
        assert_eq!(
            ids(&ranked),
            vec![
                "http://arxiv.org/abs/graph",
                "http://arxiv.org/abs/mixed",
                "http://arxiv.org/abs/vision"
            ]
        );

        let scored = store.rank_scored("graph neural networks", 10, None).await.unwrap();
        assert!(scored.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_rank_returns_metadata_only() {
        let provider = ScriptedProvider::returning(vec![candidate("a", "graph\nlearning\nabstract")]);
        let mut store = open_store(provider, KeywordEmbedder::new()).await;
        store.ingest("graphs", 1, None).await.unwrap();

        let ranked = store.rank("graph", 1).await.unwrap();
        let record = &ranked[0];
        assert!(record.embedding.is_none());
        assert_eq!(record.title, "Paper a");
        assert_eq!(record.authors, "Ada Lovelace, Alan Turing");
        assert_eq!(record.published_date, "2023-04-05");
        assert_eq!(record.url, "http://arxiv.org/pdf/a");
        assert_eq!(record.abstract_text, "graph learning abstract");
    }

    #[tokio::test]
    async fn test_rank_bounded_by_store_size() {
        let provider = ScriptedProvider::returning(graph_candidates("p", 2));
        let mut store = open_store(provider, KeywordEmbedder::new()).await;
        store.ingest("graphs", 10, None).await.unwrap();

        assert_eq!(store.rank("graph", 5).await.unwrap().len(), 2);
        assert_eq!(store.rank("graph", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rank_empty_store() {
        let embedder = KeywordEmbedder::new().with_failure();
        let store = open_store(ScriptedProvider::default(), embedder.clone()).await;

        assert!(store.rank("graph neural networks", 5).await.unwrap().is_empty());
        assert_eq!(embedder.calls(), 0, "empty store must not need the embedder");
    }

    #[tokio::test]
    async fn test_concurrent_rankings_share_the_store() {
        let provider = ScriptedProvider::returning(graph_candidates("p", 3));
        let mut store = open_store(provider, KeywordEmbedder::new()).await;
        store.ingest("graphs", 10, None).await.unwrap();

        let store = &store;
        let (first, second) = tokio::join!(store.rank("graph", 3), store.rank("graph", 3));
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test]
    async fn test_scenario_seven_new_three_stored() {
        let all = graph_candidates("p", 10);
        let provider = ScriptedProvider::returning(vec![all[1].clone(), all[4].clone(), all[8].clone()]);
        let mut store = open_store(provider.clone(), KeywordEmbedder::new()).await;
        assert_eq!(store.ingest("graph neural networks", 10, None).await.unwrap(), 3);

        provider.set_candidates(all);
        let stats = store.ingest_with_stats("graph neural networks", 10, None).await.unwrap();
        assert_eq!(stats.inserted, 7);
        assert_eq!(stats.duplicates_skipped, 3);

        let top = store.rank_scored("graph neural networks", 3, None).await.unwrap();
        assert_eq!(top.len(), 3);
        assert!(top.windows(2).all(|w| w[0].score >= w[1].score));
        // More "graph" mentions, fewer "vision" ones: the last candidates win
        let top_ids: Vec<_> = top.iter().map(|r| r.paper.id.as_str()).collect();
        assert_eq!(
            top_ids,
            vec![
                "http://arxiv.org/abs/p9",
                "http://arxiv.org/abs/p8",
                "http://arxiv.org/abs/p7"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_batch_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papers.db");

        let provider = ScriptedProvider::returning(graph_candidates("ok", 2));
        let mut store = PaperStore::open(provider.clone(), KeywordEmbedder::new(), SqliteStorage::open(&path).unwrap())
            .await
            .unwrap();
        assert_eq!(store.ingest("graphs", 10, None).await.unwrap(), 2);

        // A second connection installs a trigger that rejects one row mid-batch
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON papers
                 WHEN NEW.id = 'http://arxiv.org/abs/bad1'
                 BEGIN SELECT RAISE(ABORT, 'disk on fire'); END;",
            )
            .unwrap();

        provider.set_candidates(graph_candidates("bad", 3));
        let err = store.ingest("graphs", 10, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)), "got {:?}", err);

        let ranked = store.rank("graph", 10).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|r| r.id.contains("/ok")));
    }

    #[tokio::test]
    async fn test_reopen_keeps_records_and_rejects_other_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papers.db");

        {
            let provider = ScriptedProvider::returning(graph_candidates("p", 3));
            let mut store = PaperStore::open(provider, KeywordEmbedder::new(), SqliteStorage::open(&path).unwrap())
                .await
                .unwrap();
            store.ingest("graphs", 10, None).await.unwrap();
        }

        let store = PaperStore::open(
            ScriptedProvider::default(),
            KeywordEmbedder::new(),
            SqliteStorage::open(&path).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(store.rank("graph", 10).await.unwrap().len(), 3);

        let other = PaperStore::open(
            ScriptedProvider::default(),
            KeywordEmbedder::named("another-model"),
            SqliteStorage::open(&path).unwrap(),
        )
        .await;
        assert!(matches!(other, Err(StoreError::InvalidInput(_))));
    }
}
