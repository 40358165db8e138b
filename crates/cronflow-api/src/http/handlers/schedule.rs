//! Schedule handlers: CRUD, due listing, deactivation and force-advance.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use cronflow_core::repository::schedule::ScheduleRepository;
use cronflow_core::workflow::scheduler::ScheduleError;
use cronflow_types::schedule::{NewSchedule, ScheduleUpdate, WorkflowSchedule, WorkflowScheduleRun};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

fn schedule_response(schedule: WorkflowSchedule, start: Instant) -> Json<ApiResponse<WorkflowSchedule>> {
    let link = format!("/api/v1/schedules/{}", schedule.id);
    let runs = format!("{link}/runs");
    Json(
        ApiResponse::timed(schedule, start)
            .with_link("self", &link)
            .with_link("runs", &runs),
    )
}

/// POST /api/v1/schedules - Create a schedule and compute its first run.
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(body): Json<NewSchedule>,
) -> Result<Json<ApiResponse<WorkflowSchedule>>, AppError> {
    let start = Instant::now();
    let schedule = state.schedules.create_schedule(body, Utc::now()).await?;
    Ok(schedule_response(schedule, start))
}

/// GET /api/v1/schedules - List all schedules.
pub async fn list_schedules(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowSchedule>>>, AppError> {
    let start = Instant::now();
    let schedules = state.schedules.list_schedules().await?;
    Ok(Json(ApiResponse::timed(schedules, start).with_link("self", "/api/v1/schedules")))
}

/// GET /api/v1/schedules/due - ACTIVE schedules due now.
pub async fn due_schedules(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowSchedule>>>, AppError> {
    let start = Instant::now();
    let due = state.schedules.get_due_schedules(Utc::now()).await?;
    Ok(Json(ApiResponse::timed(due, start)))
}

/// GET /api/v1/schedules/{id}
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowSchedule>>, AppError> {
    let start = Instant::now();
    let schedule = state
        .schedules
        .get_schedule(id)
        .await?
        .ok_or(ScheduleError::NotFound(id))?;
    Ok(schedule_response(schedule, start))
}

/// PUT /api/v1/schedules/{id} - Partial update; next run recomputed when
/// timing changes.
pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ScheduleUpdate>,
) -> Result<Json<ApiResponse<WorkflowSchedule>>, AppError> {
    let start = Instant::now();
    let schedule = state.schedules.update_schedule(id, body, Utc::now()).await?;
    Ok(schedule_response(schedule, start))
}

/// POST /api/v1/schedules/{id}/deactivate
pub async fn deactivate_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowSchedule>>, AppError> {
    let start = Instant::now();
    let schedule = state.schedules.deactivate_schedule(id, Utc::now()).await?;
    Ok(schedule_response(schedule, start))
}

/// POST /api/v1/schedules/{id}/force-advance - Skip the pending occurrence.
pub async fn force_advance_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowSchedule>>, AppError> {
    let start = Instant::now();
    let schedule = state.schedules.force_advance_schedule(id, Utc::now()).await?;
    Ok(schedule_response(schedule, start))
}

/// GET /api/v1/schedules/{id}/runs - Materialized runs, newest first.
pub async fn list_schedule_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<WorkflowScheduleRun>>>, AppError> {
    let start = Instant::now();
    if state.schedules.get_schedule(id).await?.is_none() {
        return Err(ScheduleError::NotFound(id).into());
    }
    let runs = state.schedules.repository().list_runs(&id).await?;
    Ok(Json(ApiResponse::timed(runs, start)))
}
