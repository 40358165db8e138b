//! Ad-hoc workflow run endpoint.
//!
//! `POST /workflow/run?workflowId=&context=` runs a workflow once, without
//! idempotency tracking, and answers with the final context or
//! `{"status": "error", "message": ...}`. It sits outside the `/api/v1`
//! envelope.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQuery {
    pub workflow_id: Uuid,
    /// Seed context as a JSON object string.
    #[serde(default)]
    pub context: Option<String>,
}

fn run_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "status": "error", "message": message.into() })),
    )
        .into_response()
}

/// POST /workflow/run - Run a workflow with a seed context.
pub async fn run_workflow(
    State(state): State<AppState>,
    query: Result<Query<RunQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => return run_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let seed = match query.context.as_deref().map(str::trim) {
        None | Some("") => json!({}),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => return run_error(StatusCode::BAD_REQUEST, "context must be a JSON object"),
            Err(e) => return run_error(StatusCode::BAD_REQUEST, format!("invalid context JSON: {e}")),
        },
    };

    match state.engine.run(query.workflow_id, seed).await {
        Ok(result) if result.is_completed() => (StatusCode::OK, Json(result.context)).into_response(),
        Ok(result) => run_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            result.error.unwrap_or_else(|| "execution failed".to_string()),
        ),
        Err(e) => {
            tracing::warn!(workflow_id = %query.workflow_id, error = %e, "ad-hoc run rejected");
            run_error(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}
