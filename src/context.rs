//! Process-wide dependencies, built once from configuration and handed down
//!
//! The logger, rate limiter and orchestrator are constructed here and passed
//! to whoever needs them. Nothing else in the crate reaches for globals.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ValidationError, validate_provider};
use crate::limiter::{LimiterError, RateLimit, TokenBucket};
use crate::logging::{BufferPolicy, HttpLogTransport, Logger, TransportError};
use crate::observability::Metrics;
use crate::orchestrator::{Models, Orchestrator};
use crate::provider::{GenerationProvider, ProviderError, VertexClient};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Log transport setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Rate limiter setup failed: {0}")]
    Limiter(#[from] LimiterError),

    #[error(transparent)]
    Configuration(#[from] ValidationError),

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),
}

pub struct AppContext {
    pub config: Config,
    pub metrics: Arc<Metrics>,
    pub logger: Logger,
    pub limiter: Arc<TokenBucket>,
    orchestrator: Option<Arc<Orchestrator>>,
}

impl AppContext {
    /// Build every dependency from `config`.
    ///
    /// A missing provider credential is not an error here; the context just
    /// has no orchestrator. Must run inside a tokio runtime when a log
    /// endpoint is configured.
    pub fn build(config: Config) -> Result<Self, ContextError> {
        Self::assemble(config, None)
    }

    /// Same as [`build`](Self::build) but with a caller-supplied provider.
    pub fn with_provider(
        config: Config,
        provider: Arc<dyn GenerationProvider>,
    ) -> Result<Self, ContextError> {
        Self::assemble(config, Some(provider))
    }

    fn assemble(
        config: Config,
        provider: Option<Arc<dyn GenerationProvider>>,
    ) -> Result<Self, ContextError> {
        let metrics = Arc::new(Metrics::new());
        let logger = build_logger(&config, Arc::clone(&metrics))?;

        let limit = RateLimit::per_minute(
            config.rate_limit.requests_per_minute,
            config.rate_limit.burst,
        )?;
        let limiter = Arc::new(TokenBucket::new(limit));

        let provider = match provider {
            Some(provider) => Some(provider),
            None => match validate_provider(&config) {
                Ok(()) => {
                    let client: Arc<dyn GenerationProvider> =
                        Arc::new(VertexClient::from_config(&config.provider)?);
                    Some(client)
                }
                Err(e) => {
                    warn!(error = %e, "Generation disabled");
                    None
                }
            },
        };

        let orchestrator = provider.map(|provider| {
            Arc::new(orchestrator_for(
                &config,
                provider,
                Arc::clone(&limiter),
                logger.clone(),
                Arc::clone(&metrics),
            ))
        });

        Ok(Self {
            config,
            metrics,
            logger,
            limiter,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> Option<Arc<Orchestrator>> {
        self.orchestrator.clone()
    }

    /// The orchestrator, or the configuration error explaining its absence.
    pub fn require_orchestrator(&self) -> Result<Arc<Orchestrator>, ContextError> {
        match &self.orchestrator {
            Some(orchestrator) => Ok(Arc::clone(orchestrator)),
            None => {
                validate_provider(&self.config)?;
                Err(ProviderError::Auth("provider client was not initialized".into()).into())
            }
        }
    }
}

fn build_logger(config: &Config, metrics: Arc<Metrics>) -> Result<Logger, ContextError> {
    let logger = match &config.logging.endpoint {
        Some(endpoint) => {
            let transport = HttpLogTransport::new(
                endpoint.clone(),
                config.logging.access_key.clone(),
                config.logging.request_timeout.as_duration(),
            )?;
            info!(endpoint = %endpoint, "Shipping logs to remote endpoint");
            Logger::spawn(
                BufferPolicy {
                    flush_threshold: config.logging.flush_threshold,
                    capacity: config.logging.capacity,
                },
                config.logging.flush_interval.as_duration(),
                Arc::new(transport),
                metrics,
            )
        }
        None => Logger::local(),
    };

    Ok(match &config.logging.component {
        Some(component) => logger.for_component(component.clone()),
        None => logger,
    })
}

fn orchestrator_for(
    config: &Config,
    provider: Arc<dyn GenerationProvider>,
    limiter: Arc<TokenBucket>,
    logger: Logger,
    metrics: Arc<Metrics>,
) -> Orchestrator {
    Orchestrator::new(provider, limiter, config.retry.policy(), logger, metrics)
        .with_models(Models {
            content: config.provider.content_model.clone(),
            image: config.provider.image_model.clone(),
        })
        .with_deadline(config.provider.deadline.map(|d| d.as_duration()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderResponse, Result as ProviderResult};
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl GenerationProvider for NeverCalled {
        async fn generate_content(&self, _: &str, _: &str) -> ProviderResult<ProviderResponse> {
            unreachable!("not called in these tests")
        }

        async fn generate_image(&self, _: &str, _: &str) -> ProviderResult<ProviderResponse> {
            unreachable!("not called in these tests")
        }
    }

    #[test]
    fn test_no_credentials_disables_generation() {
        let context = AppContext::build(Config::default()).unwrap();

        assert!(context.orchestrator().is_none());
        match context.require_orchestrator() {
            Err(ContextError::Configuration(ValidationError::ConfigurationMissing { env, .. })) => {
                assert!(env.contains("GEMINI_API_KEY"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a configuration error"),
        }
    }

    #[test]
    fn test_api_key_enables_generation() {
        let mut config = Config::default();
        config.provider.api_key = Some("test-key".into());
        config.rate_limit.requests_per_minute = 30;

        let context = AppContext::build(config).unwrap();

        assert!(context.require_orchestrator().is_ok());
        assert_eq!(context.limiter.limit().capacity, 30);
    }

    #[test]
    fn test_injected_provider() {
        let context = AppContext::with_provider(Config::default(), Arc::new(NeverCalled)).unwrap();
        assert!(context.orchestrator().is_some());
    }

    #[tokio::test]
    async fn test_remote_logger_from_endpoint() {
        let mut config = Config::default();
        config.logging.endpoint = Some("http://127.0.0.1:9/api/logs".into());
        config.logging.component = Some("cli".into());

        let context = AppContext::build(config).unwrap();
        context.logger.info("queued");
        assert_eq!(context.logger.pending(), 1);
    }
}
