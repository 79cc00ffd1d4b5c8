use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("flush_threshold ({threshold}) must be between 1 and capacity ({capacity})")]
    InvalidFlushThreshold { threshold: usize, capacity: usize },

    #[error("logging.flush_interval must be greater than zero")]
    ZeroFlushInterval,

    #[error("Invalid log endpoint '{url}': {reason}")]
    InvalidLogEndpoint { url: String, reason: String },

    #[error("requests_per_minute must be positive")]
    ZeroRateLimit,

    #[error("rate limit burst must be positive")]
    ZeroBurst,

    #[error("Invalid retry setting {field} = {value}: {reason}")]
    InvalidRetry {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Missing required configuration {field} (set {env})")]
    ConfigurationMissing {
        field: &'static str,
        env: &'static str,
    },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_logging(config)?;
    validate_rate_limit(config)?;
    validate_retry(config)?;
    Ok(())
}

fn validate_logging(config: &Config) -> Result<(), ValidationError> {
    let logging = &config.logging;
    if logging.flush_threshold == 0 || logging.flush_threshold > logging.capacity {
        return Err(ValidationError::InvalidFlushThreshold {
            threshold: logging.flush_threshold,
            capacity: logging.capacity,
        });
    }

    if logging.flush_interval.as_duration().is_zero() {
        return Err(ValidationError::ZeroFlushInterval);
    }

    if let Some(url) = &logging.endpoint {
        let parsed = reqwest::Url::parse(url).map_err(|e| ValidationError::InvalidLogEndpoint {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidLogEndpoint {
                url: url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
    }

    Ok(())
}

fn validate_rate_limit(config: &Config) -> Result<(), ValidationError> {
    if config.rate_limit.requests_per_minute == 0 {
        return Err(ValidationError::ZeroRateLimit);
    }
    if config.rate_limit.burst == Some(0) {
        return Err(ValidationError::ZeroBurst);
    }
    Ok(())
}

fn validate_retry(config: &Config) -> Result<(), ValidationError> {
    let retry = &config.retry;

    if retry.max_attempts == 0 {
        return Err(ValidationError::InvalidRetry {
            field: "max_attempts",
            value: retry.max_attempts.to_string(),
            reason: "must be at least 1",
        });
    }
    if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
        return Err(ValidationError::InvalidRetry {
            field: "multiplier",
            value: retry.multiplier.to_string(),
            reason: "must be at least 1.0",
        });
    }
    if !(0.0..1.0).contains(&retry.jitter) {
        return Err(ValidationError::InvalidRetry {
            field: "jitter",
            value: retry.jitter.to_string(),
            reason: "must be in [0, 1)",
        });
    }
    if retry.max_delay < retry.base_delay {
        return Err(ValidationError::InvalidRetry {
            field: "max_delay",
            value: retry.max_delay.to_string(),
            reason: "must not be shorter than base_delay",
        });
    }

    Ok(())
}

/// Check that a generation client can be built.
///
/// Runs before any provider call. An API key is enough on its own; a service
/// account key file also needs a project for the Vertex endpoints.
pub fn validate_provider(config: &Config) -> Result<(), ValidationError> {
    let provider = &config.provider;

    if provider.api_key.is_some() {
        return Ok(());
    }

    if provider.credentials_path.is_none() {
        return Err(ValidationError::ConfigurationMissing {
            field: "provider credential",
            env: "GEMINI_API_KEY or GOOGLE_APPLICATION_CREDENTIALS",
        });
    }

    if provider.project.as_deref().is_none_or(str::is_empty) {
        return Err(ValidationError::ConfigurationMissing {
            field: "provider.project",
            env: "GOOGLE_CLOUD_PROJECT",
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::HumanDuration;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate(&Config::default()), Ok(()));
    }

    #[test]
    fn test_flush_threshold_bounds() {
        let mut config = Config::default();
        config.logging.flush_threshold = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidFlushThreshold { .. })
        ));

        config.logging.flush_threshold = 2000;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidFlushThreshold { threshold: 2000, capacity: 1000 })
        ));
    }

    #[test]
    fn test_zero_flush_interval_rejected() {
        let mut config = Config::default();
        config.logging.flush_interval = HumanDuration::from_millis(0);
        assert_eq!(validate(&config), Err(ValidationError::ZeroFlushInterval));

        config.logging.flush_interval = HumanDuration::from_millis(250);
        assert_eq!(validate(&config), Ok(()));
    }

    #[test]
    fn test_log_endpoint_must_be_http() {
        let mut config = Config::default();
        config.logging.endpoint = Some("not a url".into());
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLogEndpoint { .. })
        ));

        config.logging.endpoint = Some("ftp://logs.example.com".into());
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLogEndpoint { .. })
        ));

        config.logging.endpoint = Some("https://logs.example.com/api/logs".into());
        assert_eq!(validate(&config), Ok(()));
    }

    #[test]
    fn test_rate_limit_must_be_positive() {
        let mut config = Config::default();
        config.rate_limit.requests_per_minute = 0;
        assert_eq!(validate(&config), Err(ValidationError::ZeroRateLimit));

        config.rate_limit.requests_per_minute = 10;
        config.rate_limit.burst = Some(0);
        assert_eq!(validate(&config), Err(ValidationError::ZeroBurst));
    }

    #[test]
    fn test_retry_settings() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetry { field: "max_attempts", .. })
        ));

        let mut config = Config::default();
        config.retry.multiplier = 0.5;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetry { field: "multiplier", .. })
        ));

        let mut config = Config::default();
        config.retry.jitter = 1.0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetry { field: "jitter", .. })
        ));

        let mut config = Config::default();
        config.retry.max_delay = HumanDuration::from_millis(10);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetry { field: "max_delay", .. })
        ));
    }

    #[test]
    fn test_provider_requires_credential() {
        let config = Config::default();
        assert!(matches!(
            validate_provider(&config),
            Err(ValidationError::ConfigurationMissing { env, .. }) if env.contains("GEMINI_API_KEY")
        ));
    }

    #[test]
    fn test_provider_service_account_requires_project() {
        let mut config = Config::default();
        config.provider.credentials_path = Some(PathBuf::from("/run/secrets/service-account.json"));
        assert_eq!(
            validate_provider(&config),
            Err(ValidationError::ConfigurationMissing {
                field: "provider.project",
                env: "GOOGLE_CLOUD_PROJECT",
            })
        );

        config.provider.project = Some("demo".into());
        assert_eq!(validate_provider(&config), Ok(()));
    }

    #[test]
    fn test_api_key_is_enough() {
        let mut config = Config::default();
        config.provider.api_key = Some("key".into());
        assert_eq!(validate_provider(&config), Ok(()));
    }
}
