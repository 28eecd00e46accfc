// Configuration management module
// TOML configuration for the database, embedding provider and embedding cache

pub mod settings;

use console::style;

pub use settings::{
    CacheConfig, Config, ConfigError, DEFAULT_CACHE_SIZE_LIMIT, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL, DatabaseConfig, EmbeddingConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

#[inline]
pub fn show_config(config: &Config) -> anyhow::Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    match config.embedding.base_url() {
        Ok(url) => eprintln!("  Endpoint: {}", style(url).cyan()),
        Err(e) => eprintln!("  Endpoint: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Dimensions: {}", style(config.embedding.dimensions).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    eprintln!(
        "  Timeout: {}",
        style(format!("{}s", config.embedding.timeout_seconds)).cyan()
    );
    eprintln!(
        "  API Key: {}",
        if config.embedding.resolved_api_key().is_some() {
            style("configured").green()
        } else {
            style("missing").red()
        }
    );

    eprintln!();
    eprintln!("{}", style("Storage:").bold().yellow());
    eprintln!(
        "  Database: {}",
        style(config.database_path().display()).cyan()
    );
    eprintln!(
        "  Embedding Cache: {}",
        style(config.cache_dir_path().display()).cyan()
    );
    eprintln!(
        "  Cache Size Limit: {}",
        style(format!("{} bytes", config.cache.size_limit_bytes)).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}
