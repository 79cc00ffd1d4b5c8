use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tracing::{debug, error};

use super::{
    models::{HealthResponse, IngestResponse, RecentLogsQuery, RecentLogsResponse},
    state::AppState,
    utils,
    validation::parse_log_batch,
};
use crate::api::error::ApiError;
use crate::ledger::StoredLog;
use crate::logging::mirror;
use crate::orchestrator::ErrorKind;
use crate::provider::GenerationRequest;

/// Client log ingestion endpoint (POST /api/logs)
///
/// ## Flow:
/// 1. Require a JSON Content-Type (gzip bodies are already inflated by the
///    decompression layer)
/// 2. Read the body, enforcing `server.max_payload_bytes`
/// 3. Validate every entry; one bad entry rejects the batch
/// 4. Mirror each entry to the server console at its own level
/// 5. Append all entries to the ledger in one batch
/// 6. Return 200 with the number of accepted entries
pub async fn ingest_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    utils::require_json(&headers)?;

    let body_bytes = read_body(body, state.config.server.max_payload_bytes.as_usize()).await?;
    let body: Value = serde_json::from_slice(&body_bytes)?;
    let records = parse_log_batch(&body)?;

    let created_at = Utc::now();
    let entries: Vec<StoredLog> = records
        .iter()
        .map(|record| {
            mirror(record);
            StoredLog::from_record(record, created_at)
        })
        .collect();

    state.ledger.append(&entries).map_err(|e| {
        error!(error = %e, records = entries.len(), "Failed to store client logs");
        ApiError::Internal(format!("Failed to store logs: {e}"))
    })?;

    debug!(accepted = entries.len(), "Client logs stored");

    Ok((
        StatusCode::OK,
        Json(IngestResponse {
            success: true,
            accepted: entries.len(),
        }),
    ))
}

/// Reads request body and validates size
async fn read_body(body: axum::body::Body, max_size: usize) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::InvalidPayload(format!("failed to read body: {err}")))?
        .to_bytes()
        .to_vec();

    utils::validate_body_size(&data, max_size)?;

    Ok(data)
}

/// Recent stored logs, newest first (GET /operators/logs?limit=n)
pub async fn recent_logs(
    State(state): State<AppState>,
    Query(query): Query<RecentLogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = utils::clamp_limit(query.limit);

    let logs = state
        .ledger
        .recent(limit)
        .map_err(|e| ApiError::Internal(format!("Failed to read logs: {e}")))?;

    Ok(Json(RecentLogsResponse {
        count: logs.len(),
        logs,
    }))
}

/// Generation endpoint (POST /api/generate)
///
/// Answers with the normalized result in every case the provider was called:
/// 200 on success, 504 when the deadline passed and 502 for any other
/// provider failure.
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state
        .orchestrator
        .as_ref()
        .ok_or(ApiError::ProviderUnavailable)?;

    utils::require_json(&headers)?;
    let body_bytes = read_body(body, state.config.server.max_payload_bytes.as_usize()).await?;
    let request: GenerationRequest = serde_json::from_slice(&body_bytes)?;

    if request.prompt.trim().is_empty() {
        return Err(ApiError::InvalidPayload("prompt must not be empty".into()));
    }

    let result = orchestrator.invoke(&request).await;

    let status = match result.error_kind() {
        None => StatusCode::OK,
        Some(ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(_) => StatusCode::BAD_GATEWAY,
    };

    Ok((status, Json(result)))
}

/// Health check endpoint (GET /health, GET /operators/health)
///
/// Returns 503 if the ledger can't be read.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();

    components.insert("api".to_string(), "healthy".to_string());
    let ledger = match state.ledger.count() {
        Ok(_) => "healthy".to_string(),
        Err(e) => {
            error!(error = %e, "Ledger health check failed");
            "unhealthy".to_string()
        }
    };
    components.insert("ledger".to_string(), ledger);
    let provider = if state.orchestrator.is_some() {
        "configured"
    } else {
        "not_configured"
    };
    components.insert("provider".to_string(), provider.to_string());

    let all_healthy = components.values().all(|status| status != "unhealthy");
    let (status_code, overall_status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.metrics.snapshot(),
    };

    (status_code, Json(response))
}
