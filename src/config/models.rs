use crate::humanize::{ByteSize, HumanDuration};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Ingestion server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
    /// Stored logs older than this are pruned at startup; 0 keeps everything
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ledger_path: default_ledger_path(),
            max_payload_bytes: default_max_payload_bytes(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(1024 * 1024) // 1 MB
}

fn default_retention_days() -> u32 {
    30
}

/// Client-side log shipping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Ingestion endpoint; logs stay local when unset
    pub endpoint: Option<String>,
    /// Bearer token for the endpoint (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval: HumanDuration,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Tag attached to every record from this process
    pub component: Option<String>,
    #[serde(default = "default_log_request_timeout")]
    pub request_timeout: HumanDuration,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            flush_threshold: default_flush_threshold(),
            flush_interval: default_flush_interval(),
            capacity: default_capacity(),
            component: None,
            request_timeout: default_log_request_timeout(),
        }
    }
}

fn default_flush_threshold() -> usize {
    crate::logging::DEFAULT_FLUSH_THRESHOLD
}

fn default_flush_interval() -> HumanDuration {
    HumanDuration(crate::logging::DEFAULT_FLUSH_INTERVAL)
}

fn default_capacity() -> usize {
    crate::logging::DEFAULT_CAPACITY
}

fn default_log_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

/// Generation provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// API key (loaded from environment, not from config file)
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Service account key file (JSON) for the Vertex endpoints
    pub credentials_path: Option<PathBuf>,
    pub project: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_content_model")]
    pub content_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_aspect_ratio")]
    pub image_aspect_ratio: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Overrides `https://{location}-aiplatform.googleapis.com`
    pub vertex_base_url: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub request_timeout: HumanDuration,
    /// Budget for a whole invocation: limiter wait, calls and backoff
    pub deadline: Option<HumanDuration>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            credentials_path: None,
            project: None,
            location: default_location(),
            content_model: default_content_model(),
            image_model: default_image_model(),
            image_aspect_ratio: default_aspect_ratio(),
            api_base_url: default_api_base_url(),
            vertex_base_url: None,
            request_timeout: default_provider_timeout(),
            deadline: None,
        }
    }
}

impl ProviderConfig {
    pub fn vertex_base_url(&self) -> String {
        self.vertex_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", self.location))
    }
}

fn default_location() -> String {
    "us-central1".to_string()
}

fn default_content_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_image_model() -> String {
    "imagen-3.0-fast-generate-001".to_string()
}

fn default_aspect_ratio() -> String {
    "1:1".to_string()
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_provider_timeout() -> HumanDuration {
    HumanDuration::from_secs(60)
}

/// Outbound quota
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Bucket capacity; defaults to `requests_per_minute`
    pub burst: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst: None,
        }
    }
}

fn default_requests_per_minute() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay: HumanDuration,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay: HumanDuration,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay.into(),
            multiplier: self.multiplier,
            max_delay: self.max_delay.into(),
            jitter: self.jitter,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> HumanDuration {
    HumanDuration::from_secs(1)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_jitter() -> f64 {
    0.1
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    Memory,
}

/// Where batch runs write generated payloads
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/objects")
}
