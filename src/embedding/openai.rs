//! OpenAI embedding provider implementation.
//!
//! Calls the `/embeddings` endpoint of the OpenAI API (or any compatible
//! server) with the whole batch in a single request.

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default API base URL.
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

/// OpenAI embedding provider.
#[derive(Debug, Clone)]
pub struct OpenAIEmbedding {
    /// OpenAI API key for authentication
    api_key: String,

    /// Model identifier (e.g., "text-embedding-3-small")
    model: String,

    /// API base URL, without the trailing `/embeddings`
    endpoint: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,

    client: Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedding {
    /// Create a new OpenAI embedding provider.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (defaults to "text-embedding-3-small" if None)
    pub fn new(api_key: String, model: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "text-embedding-3-small".to_string());
        let embedding_dimension = match model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536,
        };

        Self {
            api_key,
            model,
            endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            embedding_dimension,
            client: Client::new(),
        }
    }

    /// Point the provider at a different API base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::ApiError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ApiError(format!("Invalid response body: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::Other(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
