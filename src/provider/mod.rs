//! External generation provider
//!
//! The provider is an opaque collaborator with two operations, text content
//! and image generation. Implementations return the raw [`ProviderResponse`];
//! the orchestrator normalizes it.

pub mod auth;
pub mod normalize;
pub mod types;
pub mod vertex;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{Classify, FailureClass};

pub use normalize::{NormalizeError, normalize};
pub use types::{GenerationKind, GenerationRequest, Payload, ProviderResponse};
pub use vertex::VertexClient;

/// Canonical status names the provider uses for quota and overload
const RETRYABLE_STATUS_NAMES: &[&str] = &["RESOURCE_EXHAUSTED", "UNAVAILABLE", "DEADLINE_EXCEEDED"];

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider unreachable: {0}")]
    Network(String),

    #[error("provider returned {status}: {message}")]
    Status {
        status: u16,
        /// Canonical error name from the body, e.g. `RESOURCE_EXHAUSTED`
        code: Option<String>,
        message: String,
    },

    #[error("provider authentication failed: {0}")]
    Auth(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl Classify for ProviderError {
    fn classify(&self) -> FailureClass {
        match self {
            ProviderError::Timeout | ProviderError::Network(_) => FailureClass::Retryable,
            ProviderError::Status { status, code, .. } => {
                let named_retryable = code
                    .as_deref()
                    .is_some_and(|c| RETRYABLE_STATUS_NAMES.contains(&c));
                if named_retryable || *status == 429 || *status == 408 || *status >= 500 {
                    FailureClass::Retryable
                } else {
                    FailureClass::Fatal
                }
            }
            ProviderError::Auth(_) | ProviderError::Malformed(_) => FailureClass::Fatal,
        }
    }
}

impl From<NormalizeError> for ProviderError {
    /// A structured error inside a 2xx body keeps its status so quota errors
    /// stay retryable. Anything else unusable is malformed.
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Provider(body) => ProviderError::Status {
                status: body.code.unwrap_or(500),
                code: body.status,
                message: body.message,
            },
            other => ProviderError::Malformed(other.to_string()),
        }
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate_content(&self, prompt: &str, model: &str) -> Result<ProviderResponse>;

    async fn generate_image(&self, prompt: &str, model: &str) -> Result<ProviderResponse>;
}
