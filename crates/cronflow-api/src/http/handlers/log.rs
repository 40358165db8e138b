//! Execution log queries. All endpoints take `page` (0-based) and `size`.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use cronflow_core::repository::execution::ExecutionRepository;
use cronflow_types::execution::{LogFilter, LogQuery, Page, WorkflowExecutionLog};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeParams {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

type LogPage = Json<ApiResponse<Page<WorkflowExecutionLog>>>;

async fn query(state: &AppState, filter: LogFilter, page: u32, size: u32) -> Result<LogPage, AppError> {
    let start = Instant::now();
    let logs = state
        .executions
        .query_logs(&LogQuery::new(filter, page, size))
        .await?;
    Ok(Json(ApiResponse::timed(logs, start)))
}

/// GET /api/v1/logs/executions/{id}
pub async fn logs_for_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<LogPage, AppError> {
    query(&state, LogFilter::Execution(id), params.page, params.size).await
}

/// GET /api/v1/logs/nodes/{id}
pub async fn logs_for_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<LogPage, AppError> {
    query(&state, LogFilter::Node(id), params.page, params.size).await
}

/// GET /api/v1/logs/templates/{id}
pub async fn logs_for_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<LogPage, AppError> {
    query(&state, LogFilter::NodeTemplate(id), params.page, params.size).await
}

/// GET /api/v1/logs?from=&to= - Logs in an inclusive time range.
pub async fn logs_in_range(
    State(state): State<AppState>,
    Query(params): Query<TimeRangeParams>,
) -> Result<LogPage, AppError> {
    if params.from > params.to {
        return Err(AppError::Validation("'from' must not be after 'to'".to_string()));
    }
    query(
        &state,
        LogFilter::TimeRange {
            from: params.from,
            to: params.to,
        },
        params.page,
        params.size,
    )
    .await
}
