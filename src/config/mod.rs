//! Configuration management for genrelay
//!
//! Settings are layered, lowest priority first:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. `.env` file and environment variables
//!
//! # Usage
//!
//! ```no_run
//! use genrelay::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Any field can be overridden with `GENRELAY__<section>__<key>`:
//! - `GENRELAY__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `GENRELAY__RATE_LIMIT__REQUESTS_PER_MINUTE=50`
//! - `GENRELAY__RETRY__BASE_DELAY=500ms`
//!
//! Credentials only come from the environment: `GEMINI_API_KEY` (or
//! `GOOGLE_API_KEY`), `GOOGLE_APPLICATION_CREDENTIALS`, `LOG_ACCESS_KEY`.
//! `GOOGLE_CLOUD_PROJECT`, `GOOGLE_CLOUD_LOCATION` and `LOG_ENDPOINT_URL`
//! fill in values the file leaves unset.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/genrelay.toml`.
//! This can be overridden using the `GENRELAY_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    Config, LoggingConfig, ProviderConfig, RateLimitConfig, RetryConfig, ServerConfig,
    StorageConfig, StorageProvider,
};
pub use sources::apply_secrets;
pub use validation::{ValidationError, validate_provider};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files. Secrets are not
    /// read from the process environment.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[rate_limit]\nrequests_per_minute = 50\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.rate_limit.requests_per_minute, 50);
        assert_eq!(config.logging.flush_threshold, 20);
    }

    #[test]
    fn test_validation_runs_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[logging]
flush_threshold = 50
capacity = 10
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::InvalidFlushThreshold { .. })
        ));
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(&config_path, "[retry]\nmax_attempts = \"many\"\n").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path),
            Err(ConfigError::LoadError(_))
        ));
    }
}
