//! Delivery of log batches to a remote ingestion endpoint
//!
//! A batch gets exactly one delivery attempt. When the endpoint is down or
//! rejects the batch, the records are written to the local console through
//! `tracing` and the failure is counted; nothing is re-sent.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::buffer::LogBatch;
use super::record::{LogLevel, LogRecord};
use crate::observability::Metrics;

const FALLBACK_TARGET: &str = "genrelay::fallback";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("log endpoint unreachable: {0}")]
    Network(String),

    #[error("log endpoint timed out")]
    Timeout,

    #[error("log endpoint rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid log endpoint configuration: {0}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Sink for drained batches
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Perform one remote call for the batch.
    async fn send(&self, batch: &LogBatch) -> Result<()>;
}

/// Result of handing a batch to [`deliver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    Delivered { records: usize },
    Failed { records: usize, error: String },
    Empty,
}

/// Send a batch once, falling back to the console on failure.
///
/// Never returns an error: log delivery failures must not reach callers.
pub async fn deliver(
    transport: &dyn LogTransport,
    batch: LogBatch,
    metrics: &Metrics,
) -> TransportOutcome {
    if batch.is_empty() {
        return TransportOutcome::Empty;
    }

    let records = batch.len();
    match transport.send(&batch).await {
        Ok(()) => {
            metrics.batch_delivered(records);
            debug!(records, "Log batch delivered");
            TransportOutcome::Delivered { records }
        }
        Err(e) => {
            warn!(records, error = %e, "Failed to send logs to server, writing to console");
            for record in batch.records() {
                emit_fallback(record);
            }
            metrics.transport_failed(records);
            TransportOutcome::Failed {
                records,
                error: e.to_string(),
            }
        }
    }
}

fn emit_fallback(record: &LogRecord) {
    let context = record
        .context()
        .map(|c| serde_json::Value::Object(c.clone()).to_string())
        .unwrap_or_default();
    let component = record.component().unwrap_or("-");
    let timestamp = record.timestamp().to_rfc3339();
    let message = record.message();

    match record.level() {
        LogLevel::Debug => {
            tracing::debug!(target: FALLBACK_TARGET, %timestamp, component, context, "{message}")
        }
        LogLevel::Info => {
            tracing::info!(target: FALLBACK_TARGET, %timestamp, component, context, "{message}")
        }
        LogLevel::Warn => {
            tracing::warn!(target: FALLBACK_TARGET, %timestamp, component, context, "{message}")
        }
        LogLevel::Error => {
            tracing::error!(target: FALLBACK_TARGET, %timestamp, component, context, "{message}")
        }
    }
}

/// HTTP `POST` transport for the `{ "logs": [...] }` ingestion endpoint
#[derive(Debug, Clone)]
pub struct HttpLogTransport {
    client: Client,
    endpoint: String,
    access_key: Option<String>,
}

impl HttpLogTransport {
    pub fn new(endpoint: impl Into<String>, access_key: Option<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        reqwest::Url::parse(&endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            access_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LogTransport for HttpLogTransport {
    async fn send(&self, batch: &LogBatch) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(batch);
        if let Some(key) = &self.access_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }
}
