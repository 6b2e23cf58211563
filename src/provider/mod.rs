//! Paper provider module.
//!
//! This module defines the interface for sourcing candidate papers from a search
//! service and includes implementations for the arXiv API and local JSON files.
//!
//! Providers return raw [`Candidate`]s. Every field is optional at this level;
//! [`Candidate::into_record`] is the single place where a candidate is checked
//! for completeness and turned into a [`PaperRecord`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{join_authors, normalize_abstract, PaperRecord};

pub mod arxiv;
pub mod json;

/// Errors that can occur when fetching papers from a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to read from the data source
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the response or file
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Network or connection error (includes timeouts)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The service answered with an error status or error document
    #[error("API error: {0}")]
    Api(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Why a candidate could not become a record. Recovered locally by skipping it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("candidate is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("candidate has an unparseable publication date: {0}")]
    InvalidDate(String),
}

/// Inclusive publication date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// January 1st through December 31st of `year`.
    ///
    /// Returns `None` for years chrono cannot represent.
    pub fn calendar_year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year, 12, 31)?,
        })
    }

    /// Check if a date falls within this range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// A provider search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Free-text topic query
    pub query: String,

    /// Upper bound on returned candidates
    pub max_results: usize,

    /// Optional publication date constraint
    pub date_range: Option<DateRange>,
}

impl SearchRequest {
    /// Request, optionally restricted to one calendar year.
    pub fn new(query: impl Into<String>, max_results: usize, year: Option<i32>) -> Self {
        Self {
            query: query.into(),
            max_results,
            date_range: year.and_then(DateRange::calendar_year),
        }
    }
}

/// A raw search hit as returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`
    pub published: Option<String>,
    #[serde(alias = "summary", alias = "abstract")]
    pub abstract_text: Option<String>,
    pub url: Option<String>,
}

impl Candidate {
    /// The candidate's identifier, if it has a non-blank one.
    pub fn identifier(&self) -> Option<&str> {
        non_blank(&self.id)
    }

    /// Publication date, if present and parseable.
    pub fn published_date(&self) -> Option<NaiveDate> {
        non_blank(&self.published).and_then(parse_date)
    }

    /// Validate the candidate and assemble a record (without embedding).
    ///
    /// # Errors
    /// Returns `MalformedRecord` when a required field is missing or blank, or
    /// when the publication date cannot be parsed.
    pub fn into_record(self) -> Result<PaperRecord, MalformedRecord> {
        let id = required(&self.id, "id")?;
        let title = required(&self.title, "title")?;
        let published = required(&self.published, "published")?;
        let abstract_text = required(&self.abstract_text, "abstract")?;
        let url = required(&self.url, "url")?;

        let date = parse_date(published).ok_or_else(|| MalformedRecord::InvalidDate(published.to_string()))?;

        Ok(PaperRecord {
            id: id.to_string(),
            title: title.split_whitespace().collect::<Vec<_>>().join(" "),
            authors: join_authors(&self.authors),
            published_date: date.format("%Y-%m-%d").to_string(),
            url: url.to_string(),
            abstract_text: normalize_abstract(abstract_text),
            embedding: None,
        })
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, MalformedRecord> {
    non_blank(field).ok_or(MalformedRecord::MissingField(name))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

/// Trait for sourcing candidate papers from a search service.
///
/// # Design Notes
///
/// - Providers return candidates without embeddings
/// - Candidates come back in the provider's own relevance order
/// - Deduplication is the store's job, not the provider's
/// - A failed request is an error, never an empty result
#[async_trait]
pub trait PaperProvider: Send + Sync {
    /// Run a search and return at most `request.max_results` candidates.
    ///
    /// # Errors
    /// Returns `ProviderError` if the service cannot be reached or its
    /// response cannot be parsed as a whole
    async fn search(&self, request: &SearchRequest) -> ProviderResult<Vec<Candidate>>;

    /// Human-readable provider name for logging.
    fn name(&self) -> &str;
}
