use serde_json::Value;
use thiserror::Error;

use super::models::IncomingLog;
use crate::logging::{Context, LogRecord, record};

/// Upper bound on entries accepted in one request
pub const MAX_LOGS_PER_REQUEST: usize = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum LogValidationError {
    #[error("Invalid logs format")]
    InvalidFormat,
    #[error("too many logs in one request: {0} (max {MAX_LOGS_PER_REQUEST})")]
    TooManyLogs(usize),
    #[error("log {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error("log {index}: invalid log level '{level}'")]
    InvalidLevel { index: usize, level: String },
    #[error("log {index}: context must be an object")]
    InvalidContext { index: usize },
}

/// Validate a `{ "logs": [...] }` body and turn it into records.
///
/// The whole batch is rejected if any entry is invalid.
pub fn parse_log_batch(body: &Value) -> Result<Vec<LogRecord>, LogValidationError> {
    let entries = body
        .get("logs")
        .and_then(Value::as_array)
        .filter(|logs| !logs.is_empty())
        .ok_or(LogValidationError::InvalidFormat)?;

    if entries.len() > MAX_LOGS_PER_REQUEST {
        return Err(LogValidationError::TooManyLogs(entries.len()));
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_entry(index, entry))
        .collect()
}

fn parse_entry(index: usize, entry: &Value) -> Result<LogRecord, LogValidationError> {
    let incoming: IncomingLog =
        serde_json::from_value(entry.clone()).map_err(|e| LogValidationError::InvalidEntry {
            index,
            reason: e.to_string(),
        })?;

    let context: Option<Context> = match incoming.context {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => return Err(LogValidationError::InvalidContext { index }),
    };

    let mut log = record(&incoming.level, incoming.message, context).map_err(|_| {
        LogValidationError::InvalidLevel {
            index,
            level: incoming.level.clone(),
        }
    })?;

    if let Some(component) = incoming.component.filter(|c| !c.is_empty()) {
        log = log.with_component(component);
    }
    if let Some(route) = incoming.route.filter(|r| !r.is_empty()) {
        log = log.with_route(route);
    }
    if let Some(timestamp) = incoming.timestamp {
        log = log.with_timestamp(timestamp);
    }
    Ok(log)
}
