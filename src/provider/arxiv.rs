//! arXiv search provider.
//!
//! Queries the public arXiv API and converts Atom feed entries into
//! [`Candidate`]s. Large requests are paged; the API asks clients to wait a
//! few seconds between consecutive calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{Candidate, PaperProvider, ProviderError, ProviderResult, SearchRequest};
use crate::config::ArxivSettings;

/// Public arXiv query endpoint.
pub const DEFAULT_ARXIV_ENDPOINT: &str = "https://export.arxiv.org/api/query";

const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(3);

/// Provider backed by the arXiv query API.
#[derive(Debug, Clone)]
pub struct ArxivProvider {
    client: Client,
    endpoint: String,
    page_size: usize,
    page_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@title")]
    title: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl Entry {
    fn is_error(&self) -> bool {
        self.id.as_deref().is_some_and(|id| id.contains("arxiv.org/api/errors"))
    }

    /// PDF link, falling back to the abstract page.
    fn document_url(&self) -> Option<String> {
        let pdf = self.links.iter().find(|l| l.title.as_deref() == Some("pdf"));
        let alternate = self.links.iter().find(|l| l.rel.as_deref() == Some("alternate"));
        pdf.or(alternate).and_then(|l| l.href.clone())
    }

    fn into_candidate(self) -> Candidate {
        let url = self.document_url();
        Candidate {
            id: self.id.map(|s| s.trim().to_string()),
            title: self.title,
            authors: self.authors.into_iter().filter_map(|a| a.name).collect(),
            published: self.published.map(|s| s.trim().to_string()),
            abstract_text: self.summary,
            url,
        }
    }
}

/// Build the arXiv `search_query` expression for a request.
///
/// ```
/// use paperpilot::provider::{arxiv::build_search_query, SearchRequest};
/// let request = SearchRequest::new("graph neural networks", 10, Some(2023));
/// assert_eq!(
///     build_search_query(&request),
///     "(graph neural networks) AND submittedDate:[202301010000 TO 202312312359]"
/// );
/// ```
pub fn build_search_query(request: &SearchRequest) -> String {
    let mut query = format!("({})", request.query.trim());
    if let Some(range) = request.date_range {
        query.push_str(&format!(
            " AND submittedDate:[{}0000 TO {}2359]",
            range.start.format("%Y%m%d"),
            range.end.format("%Y%m%d")
        ));
    }
    query
}

/// Parse an arXiv Atom response body.
///
/// # Errors
/// Returns `ProviderError::ParseError` for a body that is not a feed and
/// `ProviderError::Api` when the feed carries an arXiv error entry.
pub fn parse_feed(body: &str) -> ProviderResult<Vec<Candidate>> {
    let feed: Feed = quick_xml::de::from_str(body)
        .map_err(|e| ProviderError::ParseError(format!("invalid arXiv feed: {}", e)))?;

    if let Some(error) = feed.entries.iter().find(|e| e.is_error()) {
        let message = error
            .summary
            .as_deref()
            .or(error.title.as_deref())
            .unwrap_or("unknown arXiv error");
        return Err(ProviderError::Api(message.trim().to_string()));
    }

    Ok(feed.entries.into_iter().map(Entry::into_candidate).collect())
}

impl ArxivProvider {
    /// Create a provider against `endpoint` with the given request timeout.
    ///
    /// # Errors
    /// Returns `ProviderError::ConfigError` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> ProviderResult<Self> {
        Self::with_user_agent(endpoint, timeout, concat!("paperpilot/", env!("CARGO_PKG_VERSION")))
    }

    fn with_user_agent(
        endpoint: impl Into<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
        })
    }

    /// Create a provider from application settings.
    ///
    /// # Errors
    /// Returns `ProviderError::ConfigError` if the HTTP client cannot be built.
    pub fn from_settings(settings: &ArxivSettings) -> ProviderResult<Self> {
        Self::with_user_agent(
            settings.endpoint.clone(),
            Duration::from_secs(settings.timeout_secs),
            &settings.user_agent,
        )
    }

    /// Override paging: results per request and pause between requests.
    pub fn with_paging(mut self, page_size: usize, page_delay: Duration) -> Self {
        self.page_size = page_size.max(1);
        self.page_delay = page_delay;
        self
    }

    async fn fetch_page(
        &self,
        search_query: &str,
        start: usize,
        count: usize,
    ) -> ProviderResult<Vec<Candidate>> {
        debug!(start, count, "Requesting arXiv page");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("search_query", search_query.to_string()),
                ("start", start.to_string()),
                ("max_results", count.to_string()),
                ("sortBy", "relevance".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::NetworkError(format!("arXiv request timed out: {}", e))
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Api(format!("arXiv returned HTTP {}", status)));
        }

        parse_feed(&body)
    }
}

#[async_trait]
impl PaperProvider for ArxivProvider {
    async fn search(&self, request: &SearchRequest) -> ProviderResult<Vec<Candidate>> {
        let search_query = build_search_query(request);
        let mut candidates = Vec::with_capacity(request.max_results.min(self.page_size));

        while candidates.len() < request.max_results {
            if !candidates.is_empty() && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let count = (request.max_results - candidates.len()).min(self.page_size);
            let page = self
                .fetch_page(&search_query, candidates.len(), count)
                .await?;
            let exhausted = page.len() < count;
            candidates.extend(page);

            if exhausted {
                break;
            }
        }

        candidates.truncate(request.max_results);
        debug!(query = %search_query, returned = candidates.len(), "arXiv search complete");
        Ok(candidates)
    }

    fn name(&self) -> &str {
        "arXiv"
    }
}
