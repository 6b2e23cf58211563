//! Embedding provider abstraction and implementations.
//!
//! This module defines the interface for text embedding generation and provides
//! implementations for a local model (fastembed) and the OpenAI embeddings API.
//!
//! The same provider must be used for ingestion and ranking. The store persists
//! the provider's `model_name()` and `dimension()` and refuses to open with a
//! different one.

pub mod fastembed;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{EmbeddingBackend, EmbeddingSettings};
use self::fastembed::FastEmbedProvider;
use self::openai::OpenAIEmbedding;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Network or API communication error
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Invalid input text (e.g., empty, too long)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key, unknown model)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors generate vector embeddings from text. Output must be
/// deterministic for a given model: the store compares vectors computed at
/// different times.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts in a single batch.
    ///
    /// Returns one vector per input, in input order.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if any embedding generation fails
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Number of dimensions in the produced vectors.
    fn dimension(&self) -> usize;

    /// Model identifier (e.g., "AllMiniLML6V2", "text-embedding-3-small").
    fn model_name(&self) -> &str;
}

/// Normalizes free text before embedding it as a query.
///
/// Trims the input and collapses every whitespace run (including line breaks)
/// into a single space. Case is preserved.
///
/// ```
/// use paperpilot::embedding::normalize_text;
/// assert_eq!(normalize_text("  graph\n neural   networks "), "graph neural networks");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Embedding provider chosen at runtime from configuration.
pub enum DynamicEmbeddingProvider {
    FastEmbed(FastEmbedProvider),
    OpenAI(OpenAIEmbedding),
}

impl DynamicEmbeddingProvider {
    /// Build the provider described by `settings`.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` for an unknown model name or a
    /// missing OpenAI API key, and propagates model initialization failures.
    pub fn from_settings(settings: &EmbeddingSettings) -> EmbeddingResult<Self> {
        match settings.backend {
            EmbeddingBackend::FastEmbed => {
                let model = settings
                    .model
                    .as_deref()
                    .map(self::fastembed::parse_model)
                    .transpose()?;
                let cache_dir = settings
                    .cache_dir
                    .clone()
                    .or_else(|| dirs::cache_dir().map(|p| p.join("fastembed")));
                Ok(Self::FastEmbed(FastEmbedProvider::new(model, cache_dir)?))
            }
            EmbeddingBackend::OpenAI => {
                let api_key = settings.openai_api_key.clone().ok_or_else(|| {
                    EmbeddingError::ConfigError(
                        "OPENAI_API_KEY must be set when using the OpenAI backend".to_string(),
                    )
                })?;
                let provider = OpenAIEmbedding::new(api_key, settings.model.clone())
                    .with_endpoint(settings.openai_endpoint.clone());
                Ok(Self::OpenAI(provider))
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for DynamicEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            DynamicEmbeddingProvider::FastEmbed(p) => p.embed(text).await,
            DynamicEmbeddingProvider::OpenAI(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            DynamicEmbeddingProvider::FastEmbed(p) => p.embed_batch(texts).await,
            DynamicEmbeddingProvider::OpenAI(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            DynamicEmbeddingProvider::FastEmbed(p) => p.dimension(),
            DynamicEmbeddingProvider::OpenAI(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            DynamicEmbeddingProvider::FastEmbed(p) => p.model_name(),
            DynamicEmbeddingProvider::OpenAI(p) => p.model_name(),
        }
    }
}
