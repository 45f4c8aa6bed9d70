
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::database::lancedb::is_valid_collection_name;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSION;

pub const DEFAULT_COLLECTION: &str = "scraped_content";
pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const MAX_SEARCH_LIMIT: usize = 20;
pub const DEFAULT_SNIPPET_LENGTH: usize = 200;

/// Environment variable overriding the base directory
pub const HOME_ENV_VAR: &str = "SCRAPE_INDEX_HOME";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// How the embedding backend is chosen on first use
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    /// Use Ollama when it is reachable and serves the model, otherwise hash embeddings
    #[default]
    Auto,
    /// Always use Ollama
    Ollama,
    /// Always use hash embeddings
    Mock,
}

impl fmt::Display for EmbeddingMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Ollama => write!(f, "ollama"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub dimension: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::Auto,
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "all-minilm:latest".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub default_collection: String,
    pub default_limit: usize,
    pub snippet_length: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_collection: DEFAULT_COLLECTION.to_string(),
            default_limit: DEFAULT_SEARCH_LIMIT,
            snippet_length: DEFAULT_SNIPPET_LENGTH,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 16 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid collection name: {0:?} (letters, digits, '_', '-' and '.' only)")]
    InvalidCollectionName(String),
    #[error("Invalid default limit: {0} (must be between 1 and {MAX_SEARCH_LIMIT})")]
    InvalidDefaultLimit(usize),
    #[error("Invalid snippet length: {0} (must be between 1 and 10000)")]
    InvalidSnippetLength(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration rooted at `base_dir`
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Resolve the base directory: `$SCRAPE_INDEX_HOME`, else `~/.scrape-index`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(HOME_ENV_VAR).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }

        dirs::home_dir()
            .map(|home| home.join(".scrape-index"))
            .or_else(|| dirs::data_dir().map(|data| data.join("scrape-index")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load from the default base directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::default_dir().context("Failed to resolve base directory")?;
        Self::load(dir)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.search.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Directory holding the LanceDB collections
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.embedding.ollama_url()
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(16..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if !(1..=300).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_mode(&mut self, mode: EmbeddingMode) {
        self.mode = mode;
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = EmbeddingConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.ollama_url()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_dimension(&mut self, dimension: usize) -> Result<(), ConfigError> {
        if !(16..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.dimension = dimension;
        Ok(())
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_collection_name(&self.default_collection) {
            return Err(ConfigError::InvalidCollectionName(
                self.default_collection.clone(),
            ));
        }

        if !(1..=MAX_SEARCH_LIMIT).contains(&self.default_limit) {
            return Err(ConfigError::InvalidDefaultLimit(self.default_limit));
        }

        if !(1..=10_000).contains(&self.snippet_length) {
            return Err(ConfigError::InvalidSnippetLength(self.snippet_length));
        }

        Ok(())
    }
}
