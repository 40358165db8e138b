//! Workflow definition handlers.
//!
//! Definitions are immutable: `POST` creates, there is no update or delete.
//! The body is JSON, or YAML when the content type says so.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use uuid::Uuid;

use cronflow_core::repository::workflow::WorkflowRepository;
use cronflow_core::workflow::definition::{parse_workflow_yaml, validate_definition, WorkflowError};
use cronflow_types::workflow::WorkflowDefinition;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

fn parse_body(headers: &HeaderMap, body: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let is_yaml = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("yaml"));

    if is_yaml {
        return parse_workflow_yaml(body);
    }
    let def: WorkflowDefinition =
        serde_json::from_str(body).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// POST /api/v1/workflows - Store a new workflow definition.
pub async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let def = parse_body(&headers, &body)?;

    state.workflows.save_workflow(&def).await?;
    tracing::info!(workflow_id = %def.id, name = def.name.as_str(), "workflow created");

    let link = format!("/api/v1/workflows/{}", def.id);
    Ok(Json(ApiResponse::timed(def, start).with_link("self", &link)))
}

/// GET /api/v1/workflows - List workflow definitions, newest first.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowDefinition>>>, AppError> {
    let start = Instant::now();
    let defs = state.workflows.list_workflows().await?;
    Ok(Json(ApiResponse::timed(defs, start).with_link("self", "/api/v1/workflows")))
}

/// GET /api/v1/workflows/{id} - Get a workflow definition by ID.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let def = state
        .workflows
        .get_workflow(&id)
        .await?
        .ok_or(WorkflowError::NotFound(id))?;

    let link = format!("/api/v1/workflows/{}", def.id);
    Ok(Json(ApiResponse::timed(def, start).with_link("self", &link)))
}
