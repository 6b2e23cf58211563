//! Core data models for the paper store.
//!
//! This module contains the fundamental data structures used across the application:
//! the stored paper record, ranked search results, and the embedding configuration
//! persisted alongside the database.

use serde::{Deserialize, Serialize};

/// A single retrieved publication.
///
/// Records are created once by the ingestion pipeline and never updated in place.
/// The `id` is the provider's stable identifier and acts as the primary key; the
/// `embedding` is derived from `abstract_text` at insertion time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperRecord {
    /// Globally unique external identifier (e.g. `http://arxiv.org/abs/2301.00001v1`)
    pub id: String,

    /// Paper title
    pub title: String,

    /// Author names in publication order, joined with `", "`
    pub authors: String,

    /// Publication date formatted as `YYYY-MM-DD`
    pub published_date: String,

    /// Document URL (PDF link when the provider offers one)
    pub url: String,

    /// Normalized abstract; this is the text that gets embedded
    pub abstract_text: String,

    /// Vector embedding of the abstract.
    /// Only populated between embedding and persistence; ranked output never carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl PaperRecord {
    /// Year of publication, parsed from the leading `YYYY` of `published_date`.
    pub fn publish_year(&self) -> Option<i32> {
        self.published_date.get(..4).and_then(|y| y.parse().ok())
    }

    /// Return a copy of this record with the embedding stripped.
    pub fn metadata(&self) -> PaperRecord {
        PaperRecord {
            embedding: None,
            ..self.clone()
        }
    }
}

/// Normalize an abstract for storage and embedding.
///
/// Every line break becomes a single space and the result is trimmed. Runs of
/// other whitespace are preserved so the stored text stays close to the source.
pub fn normalize_abstract(text: &str) -> String {
    text.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

/// Join author names into the single display string stored with a record.
pub fn join_authors<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| n.as_ref().trim())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Relevance classification for ranked results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Cosine similarity > 0.95
    Identical,

    /// Cosine similarity > 0.85
    HighlySimilar,

    /// Cosine similarity > 0.70
    Similar,

    /// Anything lower
    Relevant,
}

impl RelevanceLevel {
    /// Determine relevance level from a cosine similarity score.
    pub fn from_score(score: f32) -> Self {
        if score > 0.95 {
            RelevanceLevel::Identical
        } else if score > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if score > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }
}

/// A ranked paper: metadata plus how well it matched the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The paper metadata (embedding stripped)
    pub paper: PaperRecord,

    /// Cosine similarity score, higher is better
    pub score: f32,

    /// Categorical relevance classification
    pub relevance: RelevanceLevel,
}

impl SearchResult {
    /// Create a new search result, dropping the paper's embedding.
    pub fn new(mut paper: PaperRecord, score: f32) -> Self {
        paper.embedding = None;
        Self {
            paper,
            score,
            relevance: RelevanceLevel::from_score(score),
        }
    }
}

/// Identity of the embedding model a store was built with.
///
/// Persisted on first open and compared on every later open: vectors from a
/// different model live in a different geometry and cannot be ranked together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Name/identifier of the embedding model (e.g., "AllMiniLML6V2")
    pub model_name: String,

    /// Dimension of the embedding vectors
    pub dimension: usize,
}
