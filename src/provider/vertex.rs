//! HTTP client for the Gemini and Imagen REST endpoints
//!
//! With an API key both operations go to the Generative Language API
//! (`/v1beta/models/{model}:generateContent` and `:predict`). With a service
//! account key they go to the project-scoped Vertex AI publisher endpoints,
//! authorized by access tokens from [`TokenSource`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::auth::{ServiceAccountKey, TokenSource};
use super::types::{ErrorBody, ProviderResponse};
use super::{GenerationProvider, ProviderError, Result};
use crate::config::ProviderConfig;
use crate::humanize::HumanDuration;

#[derive(Clone)]
enum Credential {
    ApiKey(String),
    ServiceAccount(Arc<TokenSource>),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(..)"),
            Credential::ServiceAccount(source) => f.debug_tuple("ServiceAccount").field(source).finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone)]
pub struct VertexClient {
    client: Client,
    credential: Credential,
    api_base_url: String,
    vertex_base_url: String,
    project: Option<String>,
    location: String,
    aspect_ratio: String,
}

impl VertexClient {
    /// Build a client from provider settings.
    ///
    /// Prefers the API key; otherwise loads the service account key file,
    /// which also requires a project.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout.as_duration())
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let (credential, project) = match (&config.api_key, &config.credentials_path) {
            (Some(key), _) => (Credential::ApiKey(key.clone()), config.project.clone()),
            (None, Some(path)) => {
                let Some(project) = config.project.clone().filter(|p| !p.is_empty()) else {
                    return Err(ProviderError::Auth(
                        "provider.project is required with a service account".to_string(),
                    ));
                };
                let key = ServiceAccountKey::from_file(path)?;
                let source = TokenSource::new(key, client.clone())?;
                info!(?source, %project, "Using service account credentials");
                (Credential::ServiceAccount(Arc::new(source)), Some(project))
            }
            (None, None) => {
                return Err(ProviderError::Auth("no API key or credentials configured".to_string()));
            }
        };

        Ok(Self {
            client,
            credential,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            vertex_base_url: config.vertex_base_url().trim_end_matches('/').to_string(),
            project,
            location: config.location.clone(),
            aspect_ratio: config.image_aspect_ratio.clone(),
        })
    }

    /// API key client against `base_url`, mainly for tests and local gateways.
    pub fn with_api_key(api_key: impl Into<String>, base_url: &str, timeout: Duration) -> Result<Self> {
        let config = ProviderConfig {
            api_key: Some(api_key.into()),
            api_base_url: base_url.to_string(),
            request_timeout: HumanDuration(timeout),
            ..ProviderConfig::default()
        };
        Self::from_config(&config)
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        match &self.credential {
            Credential::ApiKey(_) => {
                format!("{}/v1beta/models/{model}:{method}", self.api_base_url)
            }
            Credential::ServiceAccount(_) => format!(
                "{}/v1/projects/{}/locations/{}/publishers/google/models/{model}:{method}",
                self.vertex_base_url,
                self.project.as_deref().unwrap_or_default(),
                self.location,
            ),
        }
    }

    async fn post(&self, url: String, body: Value) -> Result<ProviderResponse> {
        debug!(%url, "Calling generation provider");

        let request = self.client.post(&url).json(&body);
        let request = match &self.credential {
            Credential::ApiKey(key) => request.header("x-goog-api-key", key),
            Credential::ServiceAccount(source) => request.bearer_auth(source.access_token().await?),
        };

        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await.map_err(map_request_error)?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| ProviderError::Malformed(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let error = status_error(status, &text);
        warn!(%url, status = status.as_u16(), error = %error, "Provider call failed");
        Err(error)
    }
}

#[async_trait]
impl GenerationProvider for VertexClient {
    async fn generate_content(&self, prompt: &str, model: &str) -> Result<ProviderResponse> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        self.post(self.endpoint(model, "generateContent"), body).await
    }

    async fn generate_image(&self, prompt: &str, model: &str) -> Result<ProviderResponse> {
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "sampleCount": 1, "aspectRatio": self.aspect_ratio }
        });
        self.post(self.endpoint(model, "predict"), body).await
    }
}

fn map_request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(e.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let message = parsed
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(512).collect());

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return ProviderError::Auth(message);
    }

    ProviderError::Status {
        status: status.as_u16(),
        code: parsed.and_then(|e| e.status),
        message,
    }
}
