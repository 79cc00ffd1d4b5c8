//! API models for the log ingestion, operator and generation endpoints.
//!
//! - `POST /api/logs` accepts a batch of client log records:
//!
//! ```json
//! {
//!   "logs": [
//!     {
//!       "level": "error",
//!       "message": "Upload failed",
//!       "context": { "status": 500 },
//!       "component": "ImageUploader",
//!       "route": "/admin/images",
//!       "timestamp": "2024-05-01T10:00:00Z"
//!     }
//!   ]
//! }
//! ```
//!
//! - `GET /operators/logs?limit=50` returns stored entries newest first
//! - `POST /api/generate` takes a [`GenerationRequest`](crate::provider::GenerationRequest)
//!   and returns a [`GenerationResult`](crate::orchestrator::GenerationResult)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ledger::StoredLog;
use crate::observability::MetricsSnapshot;

/// One entry of the `logs` array, before validation
#[derive(Debug, Deserialize, Clone)]
pub struct IncomingLog {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IngestResponse {
    pub success: bool,
    pub accepted: usize,
}

#[derive(Debug, Deserialize)]
pub struct RecentLogsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecentLogsResponse {
    pub count: usize,
    pub logs: Vec<StoredLog>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub version: String,
    pub metrics: MetricsSnapshot,
}
