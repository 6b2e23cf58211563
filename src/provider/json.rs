//! JSON file provider.
//!
//! Serves candidates from a local JSON array, for offline ingestion and
//! reproducible runs. Each element uses the [`Candidate`] field names; the
//! abstract may also be spelled `summary` or `abstract`.
//!
//! ```json
//! [
//!   {
//!     "id": "http://arxiv.org/abs/2301.00001v1",
//!     "title": "Graph Neural Networks",
//!     "authors": ["Ada Lovelace"],
//!     "published": "2023-01-02T18:59:59Z",
//!     "summary": "We study ...",
//!     "url": "http://arxiv.org/pdf/2301.00001v1"
//!   }
//! ]
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Candidate, PaperProvider, ProviderError, ProviderResult, SearchRequest};

/// Provider over a fixed list of candidates.
///
/// The text query is not interpreted; the file is assumed to already hold the
/// hits for it, in relevance order. Year filters and result limits apply.
#[derive(Debug, Clone)]
pub struct JsonFileProvider {
    candidates: Vec<Candidate>,
    name: String,
}

impl JsonFileProvider {
    /// Load candidates from a JSON file.
    ///
    /// Elements are decoded one at a time. An element that does not decode as
    /// a candidate is kept with only its identifier, so ingestion reports it as
    /// malformed instead of the whole file failing.
    ///
    /// # Errors
    /// Returns `ProviderError::IoError` if the file cannot be read and
    /// `ProviderError::ParseError` if it is not a JSON array.
    pub async fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let elements: Vec<Value> = serde_json::from_str(&content)
            .map_err(|e| ProviderError::ParseError(format!("{}: {}", path.display(), e)))?;

        let candidates: Vec<Candidate> = elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| decode_candidate(index, element))
            .collect();

        debug!(path = %path.display(), count = candidates.len(), "Loaded candidates from file");

        Ok(Self {
            candidates,
            name: format!("JSON file ({})", path.display()),
        })
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

fn decode_candidate(index: usize, element: Value) -> Candidate {
    let id = element.get("id").and_then(Value::as_str).map(str::to_string);

    serde_json::from_value(element).unwrap_or_else(|e| {
        warn!(index, id = ?id, error = %e, "Candidate does not match the expected shape");
        Candidate { id, ..Candidate::default() }
    })
}

#[async_trait]
impl PaperProvider for JsonFileProvider {
    async fn search(&self, request: &SearchRequest) -> ProviderResult<Vec<Candidate>> {
        let results = self
            .candidates
            .iter()
            .filter(|candidate| match request.date_range {
                // Undated candidates pass through and are rejected later as malformed
                Some(range) => candidate.published_date().map_or(true, |d| range.contains(d)),
                None => true,
            })
            .take(request.max_results)
            .cloned()
            .collect();

        Ok(results)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
