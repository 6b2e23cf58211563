//! Application configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, environment variables, and finally command-line flags applied by
//! the binaries.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::openai::DEFAULT_OPENAI_ENDPOINT;
use crate::provider::arxiv::DEFAULT_ARXIV_ENDPOINT;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    FileReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {message}", .path.display())]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSettings,
    pub arxiv: ArxivSettings,
    pub embedding: EmbeddingSettings,
    pub logging: LoggingSettings,
}

/// Where the paper database lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database file
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("papers.db"),
        }
    }
}

/// arXiv query API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivSettings {
    /// Query endpoint
    pub endpoint: String,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for ArxivSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ARXIV_ENDPOINT.to_string(),
            timeout_secs: 30,
            user_agent: format!("paperpilot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Embedding backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingBackend {
    /// Local fastembed model (no API required)
    FastEmbed,
    /// OpenAI embeddings API (requires OPENAI_API_KEY)
    #[serde(rename = "open-ai", alias = "openai")]
    #[value(name = "open-ai", alias = "openai")]
    OpenAI,
}

impl EmbeddingBackend {
    /// Guess the backend that produced a stored model name.
    pub fn detect(model_name: &str) -> Self {
        if model_name.contains("text-embedding") {
            EmbeddingBackend::OpenAI
        } else {
            EmbeddingBackend::FastEmbed
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast-embed" | "fastembed" => Ok(EmbeddingBackend::FastEmbed),
            "open-ai" | "openai" => Ok(EmbeddingBackend::OpenAI),
            _ => Err(ConfigError::InvalidValue {
                key: "embedding.backend".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,

    /// Model name; the backend default when unset
    pub model: Option<String>,

    /// FastEmbed model cache directory
    pub cache_dir: Option<PathBuf>,

    /// OpenAI-compatible API base URL
    pub openai_endpoint: String,

    /// Only ever read from the environment
    #[serde(skip)]
    pub openai_api_key: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::FastEmbed,
            model: None,
            cache_dir: None,
            openai_endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            openai_api_key: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file. Missing sections and keys fall back to defaults.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Load the optional file, then apply process environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_override()
    }

    /// Apply overrides from the process environment.
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("PAPERPILOT_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("PAPERPILOT_ARXIV_URL") {
            self.arxiv.endpoint = url;
        }
        if let Some(timeout) = lookup("PAPERPILOT_ARXIV_TIMEOUT_SECS") {
            self.arxiv.timeout_secs = timeout.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PAPERPILOT_ARXIV_TIMEOUT_SECS".to_string(),
                value: timeout,
            })?;
        }
        if let Some(backend) = lookup("PAPERPILOT_EMBEDDING_BACKEND") {
            self.embedding.backend = backend.parse()?;
        }
        if let Some(model) = lookup("PAPERPILOT_EMBEDDING_MODEL") {
            self.embedding.model = Some(model);
        }
        if let Some(dir) = lookup("PAPERPILOT_EMBEDDING_CACHE_DIR") {
            self.embedding.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.embedding.openai_endpoint = url;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.embedding.openai_api_key = Some(key);
        }
        if let Some(level) = lookup("PAPERPILOT_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(self)
    }
}
