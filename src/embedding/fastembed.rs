//! FastEmbed embedding provider implementation.
//!
//! Runs sentence-embedding models locally through the fastembed library. The
//! default model is all-MiniLM-L6-v2 (384 dimensions), which needs no API key
//! and is downloaded into the cache directory on first use.

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// FastEmbed embedding provider.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// The embedding model instance (wrapped in Arc<Mutex> for thread-safety)
    model: Arc<Mutex<TextEmbedding>>,

    /// Model identifier, persisted in the store's embedding config
    model_name: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,
}

/// Resolve a user-supplied model name to a fastembed model.
///
/// Accepts the fastembed variant name (`AllMiniLML6V2`) as well as the usual
/// Hugging Face ids (`sentence-transformers/all-MiniLM-L6-v2`, `BAAI/bge-small-en-v1.5`).
///
/// # Errors
/// Returns `EmbeddingError::ConfigError` for names with no local model.
pub fn parse_model(name: &str) -> EmbeddingResult<EmbeddingModel> {
    let key: String = name
        .rsplit('/')
        .next()
        .unwrap_or(name)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    match key.as_str() {
        "allminilml6v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bgesmallenv15" => Ok(EmbeddingModel::BGESmallENV15),
        "bgebaseenv15" => Ok(EmbeddingModel::BGEBaseENV15),
        "bgelargeenv15" => Ok(EmbeddingModel::BGELargeENV15),
        "nomicembedtextv1" => Ok(EmbeddingModel::NomicEmbedTextV1),
        "nomicembedtextv15" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "paraphrasemlminilml12v2" | "paraphrasemultilingualminilml12v2" => {
            Ok(EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        "paraphrasemlmpnetbasev2" | "paraphrasemultilingualmpnetbasev2" => {
            Ok(EmbeddingModel::ParaphraseMLMpnetBaseV2)
        }
        _ => Err(EmbeddingError::ConfigError(format!(
            "Unknown FastEmbed model: {name}"
        ))),
    }
}

/// Output dimension of a fastembed model.
fn model_dimension(model: &EmbeddingModel) -> usize {
    match model {
        EmbeddingModel::AllMiniLML6V2 => 384,
        EmbeddingModel::BGESmallENV15 => 384,
        EmbeddingModel::BGEBaseENV15 => 768,
        EmbeddingModel::BGELargeENV15 => 1024,
        EmbeddingModel::NomicEmbedTextV1 => 768,
        EmbeddingModel::NomicEmbedTextV15 => 768,
        EmbeddingModel::ParaphraseMLMiniLML12V2 => 384,
        EmbeddingModel::ParaphraseMLMpnetBaseV2 => 768,
        _ => 384,
    }
}

impl FastEmbedProvider {
    /// Create a new FastEmbed embedding provider.
    ///
    /// # Arguments
    /// * `model` - Optional model to use (defaults to AllMiniLML6V2)
    /// * `cache_dir` - Optional cache directory for model files
    ///
    /// # Errors
    /// Returns `EmbeddingError` if model initialization fails
    pub fn new(model: Option<EmbeddingModel>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model_type = model.unwrap_or(EmbeddingModel::AllMiniLML6V2);
        let model_name = format!("{:?}", model_type);
        let embedding_dimension = model_dimension(&model_type);

        let mut init_options = InitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let text_embedding = TextEmbedding::try_new(init_options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name,
            embedding_dimension,
        })
    }

    /// Create a provider with the default model and cache directory.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if model initialization fails
    pub fn with_defaults() -> EmbeddingResult<Self> {
        Self::new(None, None)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let model = self.model.lock().await;

        let embeddings = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbeddingError::Other(format!("Embedding generation failed: {}", e)))?;

        embeddings
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

        let model = self.model.lock().await;

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        model.embed(text_strings, None).map_err(|e| {
            EmbeddingError::Other(format!("Batch embedding generation failed: {}", e))
        })
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// TextEmbedding does not implement Debug
impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}
