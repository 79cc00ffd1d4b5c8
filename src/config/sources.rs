use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "GENRELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/genrelay.toml";
const ENV_PREFIX: &str = "GENRELAY";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    apply_secrets(&mut config, |key| env::var(key).ok());

    Ok(config)
}

/// Fill secrets and well-known provider variables from `lookup`.
///
/// Secrets are never read from TOML. Project, location and log endpoint
/// only apply when the file left them unset.
pub fn apply_secrets(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")) {
        config.provider.api_key = Some(key);
    }
    if let Some(path) = non_empty("GOOGLE_APPLICATION_CREDENTIALS") {
        config.provider.credentials_path = Some(PathBuf::from(path));
    }
    if config.provider.project.is_none() {
        config.provider.project = non_empty("GOOGLE_CLOUD_PROJECT");
    }
    if let Some(location) = non_empty("GOOGLE_CLOUD_LOCATION") {
        if config.provider.location == super::models::ProviderConfig::default().location {
            config.provider.location = location;
        }
    }

    if config.logging.endpoint.is_none() {
        config.logging.endpoint = non_empty("LOG_ENDPOINT_URL");
    }
    if let Some(key) = non_empty("LOG_ACCESS_KEY") {
        config.logging.access_key = Some(key);
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // GENRELAY__RATE_LIMIT__REQUESTS_PER_MINUTE -> rate_limit.requests_per_minute
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
max_payload_bytes = "512KB"
retention_days = 7

[logging]
endpoint = "https://logs.example.com/api/logs"
flush_threshold = 10
flush_interval = "2s"
component = "image-admin"

[provider]
project = "demo-project"
location = "europe-west4"
image_model = "imagen-3.0-generate-002"
deadline = "90s"

[rate_limit]
requests_per_minute = 1

[retry]
max_attempts = 3
base_delay = "500ms"
multiplier = 3.0
jitter = 0.0

[storage]
provider = "memory"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.max_payload_bytes.as_u64(), 512 * 1024);
        assert_eq!(config.server.retention_days, 7);
        assert_eq!(config.logging.flush_threshold, 10);
        assert_eq!(config.logging.flush_interval.as_duration(), Duration::from_secs(2));
        assert_eq!(config.logging.component.as_deref(), Some("image-admin"));
        assert_eq!(config.provider.project.as_deref(), Some("demo-project"));
        assert_eq!(config.provider.image_model, "imagen-3.0-generate-002");
        assert_eq!(
            config.provider.deadline.map(|d| d.as_duration()),
            Some(Duration::from_secs(90))
        );
        assert_eq!(config.rate_limit.requests_per_minute, 1);
        assert_eq!(config.retry.base_delay.as_duration(), Duration::from_millis(500));
        assert_eq!(config.storage.provider, super::super::models::StorageProvider::Memory);
    }

    #[test]
    fn test_secrets_from_environment() {
        let mut config = Config::default();
        apply_secrets(
            &mut config,
            lookup(&[
                ("GOOGLE_API_KEY", "fallback-key"),
                ("GOOGLE_CLOUD_PROJECT", "env-project"),
                ("GOOGLE_CLOUD_LOCATION", "asia-northeast1"),
                ("LOG_ENDPOINT_URL", "http://localhost:3000/api/logs"),
                ("LOG_ACCESS_KEY", "secret"),
            ]),
        );

        assert_eq!(config.provider.api_key.as_deref(), Some("fallback-key"));
        assert_eq!(config.provider.project.as_deref(), Some("env-project"));
        assert_eq!(config.provider.location, "asia-northeast1");
        assert_eq!(
            config.logging.endpoint.as_deref(),
            Some("http://localhost:3000/api/logs")
        );
        assert_eq!(config.logging.access_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_file_values_win_over_provider_env() {
        let mut config = Config::default();
        config.provider.project = Some("file-project".into());
        config.logging.endpoint = Some("http://file/api/logs".into());

        apply_secrets(
            &mut config,
            lookup(&[
                ("GEMINI_API_KEY", "primary"),
                ("GOOGLE_API_KEY", "fallback"),
                ("GOOGLE_CLOUD_PROJECT", "env-project"),
                ("LOG_ENDPOINT_URL", "http://env/api/logs"),
            ]),
        );

        assert_eq!(config.provider.api_key.as_deref(), Some("primary"));
        assert_eq!(config.provider.project.as_deref(), Some("file-project"));
        assert_eq!(config.logging.endpoint.as_deref(), Some("http://file/api/logs"));
    }

    #[test]
    fn test_blank_secrets_ignored() {
        let mut config = Config::default();
        apply_secrets(&mut config, lookup(&[("GEMINI_API_KEY", "  ")]));
        assert!(config.provider.api_key.is_none());
    }
}
