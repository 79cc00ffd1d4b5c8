//! Service account credentials for the Vertex endpoints
//!
//! `GOOGLE_APPLICATION_CREDENTIALS` names a service account key file. The key
//! signs a short-lived RS256 assertion which the key's `token_uri` exchanges
//! for an OAuth access token. Tokens are cached and renewed shortly before
//! they expire.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ProviderError, Result};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens this close to expiry are renewed before use
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service account key file that matter here
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub project_id: Option<String>,
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Read and check a key file. Anything other than a `service_account`
    /// key is refused.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| ProviderError::Auth(format!("cannot read {}: {e}", path.display())))?;
        Self::from_slice(&raw)
            .map_err(|e| ProviderError::Auth(format!("{}: {e}", path.display())))
    }

    fn from_slice(raw: &[u8]) -> std::result::Result<Self, String> {
        // serde_json errors carry positions only, never the key material.
        let key: ServiceAccountKey = serde_json::from_slice(raw)
            .map_err(|e| format!("not a service account key file ({e})"))?;
        if key.key_type != "service_account" {
            return Err(format!(
                "credential type '{}' is not supported, expected 'service_account'",
                key.key_type
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Hands out access tokens for one service account
pub struct TokenSource {
    client: Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource").field("key", &self.key).finish_non_exhaustive()
    }
}

impl TokenSource {
    pub fn new(key: ServiceAccountKey, client: Client) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::Auth(format!("invalid service account private key: {e}")))?;
        Ok(Self {
            client,
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    /// A valid access token, exchanging a fresh assertion when needed
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(token.token.clone());
            }
        }

        let fetched = self.exchange().await?;
        let token = fetched.access_token.clone();
        *cached = Some(CachedToken {
            token: fetched.access_token,
            expires_at: Instant::now() + Duration::from_secs(fetched.expires_in),
        });
        Ok(token)
    }

    fn assertion(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            aud: self.key.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &claims, &self.signing_key)
            .map_err(|e| ProviderError::Auth(format!("cannot sign token request: {e}")))
    }

    async fn exchange(&self) -> Result<TokenResponse> {
        debug!(account = %self.key.client_email, "Requesting access token");

        let assertion = self.assertion()?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("token endpoint: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(|e| ProviderError::Malformed(format!("token response: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<TokenErrorBody>(&text) {
            Ok(body) => match body.error_description {
                Some(description) => format!("{}: {description}", body.error),
                None => body.error,
            },
            Err(_) => text.chars().take(512).collect(),
        };
        warn!(status = status.as_u16(), %message, "Access token request failed");

        if status.is_server_error() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                code: None,
                message,
            });
        }
        Err(ProviderError::Auth(message))
    }
}
