use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::logging::{LogLevel, LogRecord};

pub const DEFAULT_SOURCE: &str = "client";
pub const DEFAULT_URL: &str = "server";

/// A log entry as persisted by the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLog {
    pub id: Uuid,
    pub level: LogLevel,
    pub message: String,
    /// Record context, `{}` when absent
    pub details: Value,
    /// Emitting component
    pub source: String,
    /// Route the record was emitted from
    pub url: String,
    /// When the ledger stored it
    pub created_at: DateTime<Utc>,
    /// When the client created the record
    pub logged_at: DateTime<Utc>,
}

impl StoredLog {
    pub fn from_record(record: &LogRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            level: record.level(),
            message: record.message().to_string(),
            details: record
                .context()
                .map(|c| Value::Object(c.clone()))
                .unwrap_or_else(|| Value::Object(Default::default())),
            source: record.component().unwrap_or(DEFAULT_SOURCE).to_string(),
            url: record.route().unwrap_or(DEFAULT_URL).to_string(),
            created_at,
            logged_at: record.timestamp(),
        }
    }
}
