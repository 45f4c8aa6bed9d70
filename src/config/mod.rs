// Configuration management module
// Loads and validates the TOML settings file under the base directory

pub mod settings;


pub use settings::{
    Config, ConfigError, DEFAULT_COLLECTION, DEFAULT_SEARCH_LIMIT, DEFAULT_SNIPPET_LENGTH,
    EmbeddingConfig, EmbeddingMode, HOME_ENV_VAR, MAX_SEARCH_LIMIT, SearchConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
