//! Execution tracker endpoints: statistics, status by key, key release.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use cronflow_core::workflow::tracker::TrackerError;
use cronflow_types::execution::{ExecutionStatus, WorkflowExecution};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct ClearedKey {
    pub key: String,
    pub cleared: bool,
}

/// GET /api/v1/executions/statistics - Count per status.
pub async fn statistics(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<BTreeMap<ExecutionStatus, u64>>>, AppError> {
    let start = Instant::now();
    let stats = state.tracker.get_statistics().await?;
    Ok(Json(ApiResponse::timed(stats, start)))
}

/// GET /api/v1/executions/status?key= - Execution holding an idempotency key.
pub async fn status_by_key(
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let start = Instant::now();
    let key = params.key;
    let execution = state
        .tracker
        .get_execution(&key)
        .await?
        .ok_or_else(|| TrackerError::NotFound(key.clone()))?;
    Ok(Json(ApiResponse::timed(execution, start)))
}

/// DELETE /api/v1/executions?key= - Release a key so it can run again.
pub async fn clear_key(
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
) -> Result<Json<ApiResponse<ClearedKey>>, AppError> {
    let start = Instant::now();
    let key = params.key;
    let cleared = state.tracker.clear_idempotency_key(&key).await?;
    if !cleared {
        return Err(TrackerError::NotFound(key).into());
    }
    Ok(Json(ApiResponse::timed(ClearedKey { key, cleared }, start)))
}
