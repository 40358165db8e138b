//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use cronflow_core::workflow::definition::WorkflowError;
use cronflow_core::workflow::scheduler::ScheduleError;
use cronflow_core::workflow::tracker::TrackerError;
use cronflow_core::workflow::trigger::TriggerError;
use cronflow_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Workflow(WorkflowError),
    Schedule(ScheduleError),
    Trigger(TriggerError),
    Tracker(TrackerError),
    Repository(RepositoryError),
    /// Request validation outside the domain error types.
    Validation(String),
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        AppError::Workflow(e)
    }
}

impl From<ScheduleError> for AppError {
    fn from(e: ScheduleError) -> Self {
        AppError::Schedule(e)
    }
}

impl From<TriggerError> for AppError {
    fn from(e: TriggerError) -> Self {
        AppError::Trigger(e)
    }
}

impl From<TrackerError> for AppError {
    fn from(e: TrackerError) -> Self {
        AppError::Tracker(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl AppError {
    /// Status code, machine-readable code and message.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Workflow(WorkflowError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", self.message())
            }
            AppError::Workflow(
                WorkflowError::ParseError(_)
                | WorkflowError::ValidationError(_)
                | WorkflowError::CycleDetected(_)
                | WorkflowError::UnknownNode(_)
                | WorkflowError::InvalidContext(_),
            ) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", self.message()),
            AppError::Workflow(WorkflowError::Inactive(_)) => {
                (StatusCode::CONFLICT, "WORKFLOW_INACTIVE", self.message())
            }
            AppError::Workflow(WorkflowError::Repository(e)) => repository_parts(e),
            AppError::Schedule(ScheduleError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "SCHEDULE_NOT_FOUND", self.message())
            }
            AppError::Schedule(ScheduleError::WorkflowNotFound(_)) => {
                (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", self.message())
            }
            AppError::Schedule(
                ScheduleError::InvalidSchedule(_)
                | ScheduleError::InvalidTimezone(_)
                | ScheduleError::NoUpcomingRun(_),
            ) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", self.message()),
            AppError::Schedule(ScheduleError::Repository(e)) => repository_parts(e),
            AppError::Trigger(TriggerError::WorkflowNotFound(_)) => {
                (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", self.message())
            }
            AppError::Trigger(TriggerError::RegistrationFailed(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", self.message())
            }
            AppError::Trigger(TriggerError::Repository(e)) => repository_parts(e),
            AppError::Tracker(TrackerError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND", self.message())
            }
            AppError::Tracker(TrackerError::Duplicate(_)) => {
                (StatusCode::CONFLICT, "DUPLICATE_EXECUTION", self.message())
            }
            AppError::Tracker(TrackerError::Repository(e)) | AppError::Repository(e) => {
                repository_parts(e)
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Workflow(e) => e.to_string(),
            AppError::Schedule(e) => e.to_string(),
            AppError::Trigger(e) => e.to_string(),
            AppError::Tracker(e) => e.to_string(),
            AppError::Repository(e) => e.to_string(),
            AppError::Validation(msg) => msg.clone(),
        }
    }
}

fn repository_parts(e: &RepositoryError) -> (StatusCode, &'static str, String) {
    match e {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
        RepositoryError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", e.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", e.to_string()),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = message.as_str(), "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
