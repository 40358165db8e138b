//! Event trigger registration and event intake.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use cronflow_core::workflow::trigger::{TriggerEvent, TriggerFiring};
use cronflow_types::idempotency::IdempotencySettings;
use cronflow_types::workflow::{WorkflowStatus, WorkflowTrigger};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NewTrigger {
    pub workflow_id: Uuid,
    pub event_name: String,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
}

/// POST /api/v1/triggers - Bind an event name to a workflow.
pub async fn create_trigger(
    State(state): State<AppState>,
    Json(body): Json<NewTrigger>,
) -> Result<Json<ApiResponse<WorkflowTrigger>>, AppError> {
    let start = Instant::now();
    let trigger = state
        .triggers
        .register_trigger(WorkflowTrigger {
            id: Uuid::now_v7(),
            workflow_id: body.workflow_id,
            event_name: body.event_name,
            status: WorkflowStatus::Active,
            idempotency: body.idempotency,
        })
        .await?;
    Ok(Json(ApiResponse::timed(trigger, start)))
}

/// GET /api/v1/triggers
pub async fn list_triggers(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowTrigger>>>, AppError> {
    let start = Instant::now();
    let triggers = state.triggers.list_triggers().await?;
    Ok(Json(ApiResponse::timed(triggers, start)))
}

/// POST /api/v1/events/{event_name} - Deliver an event to its triggers.
///
/// Always 200 when the event was accepted; per-trigger outcomes (including
/// duplicate skips and configuration errors) are in the returned firings.
pub async fn receive_event(
    State(state): State<AppState>,
    Path(event_name): Path<String>,
    Json(event): Json<TriggerEvent>,
) -> Result<Json<ApiResponse<Vec<TriggerFiring>>>, AppError> {
    let start = Instant::now();
    let firings = state
        .triggers
        .dispatch_event(&event_name, event, Utc::now())
        .await?;
    Ok(Json(ApiResponse::timed(firings, start)))
}
