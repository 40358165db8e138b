//! Axum router configuration with middleware.
//!
//! Admin routes are under `/api/v1/`. `/workflow/run` and `/health` sit at
//! the root. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflow definitions
        .route(
            "/workflows",
            post(handlers::workflow::create_workflow).get(handlers::workflow::list_workflows),
        )
        .route("/workflows/{id}", get(handlers::workflow::get_workflow))
        // Schedules
        .route(
            "/schedules",
            post(handlers::schedule::create_schedule).get(handlers::schedule::list_schedules),
        )
        .route("/schedules/due", get(handlers::schedule::due_schedules))
        .route(
            "/schedules/{id}",
            get(handlers::schedule::get_schedule).put(handlers::schedule::update_schedule),
        )
        .route(
            "/schedules/{id}/deactivate",
            post(handlers::schedule::deactivate_schedule),
        )
        .route(
            "/schedules/{id}/force-advance",
            post(handlers::schedule::force_advance_schedule),
        )
        .route(
            "/schedules/{id}/runs",
            get(handlers::schedule::list_schedule_runs),
        )
        // Execution logs
        .route("/logs", get(handlers::log::logs_in_range))
        .route(
            "/logs/executions/{id}",
            get(handlers::log::logs_for_execution),
        )
        .route("/logs/nodes/{id}", get(handlers::log::logs_for_node))
        .route(
            "/logs/templates/{id}",
            get(handlers::log::logs_for_template),
        )
        // Execution tracker
        .route(
            "/executions",
            axum::routing::delete(handlers::execution::clear_key),
        )
        .route(
            "/executions/statistics",
            get(handlers::execution::statistics),
        )
        .route(
            "/executions/status",
            get(handlers::execution::status_by_key),
        )
        // Event triggers
        .route(
            "/triggers",
            post(handlers::trigger::create_trigger).get(handlers::trigger::list_triggers),
        )
        .route(
            "/events/{event_name}",
            post(handlers::trigger::receive_event),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/workflow/run", post(handlers::run::run_workflow))
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cronflow_infra::collaborators::build_collaborators;
    use cronflow_infra::sqlite::pool::DatabasePool;
    use cronflow_types::config::EngineConfig;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const GREETING_WORKFLOW: &str = r#"{
        "name": "greet",
        "nodes": [
            {
                "id": "start",
                "config": {"type": "TRIGGER"},
                "next": "hello"
            },
            {
                "id": "hello",
                "config": {
                    "type": "TRANSFORM",
                    "fields": [{"name": "greeting", "expression": "'Hello ' + name"}]
                }
            }
        ]
    }"#;

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("api.db").display());
        let data_dir = dir.path().to_path_buf();
        std::mem::forget(dir);

        let config = EngineConfig::default();
        let pool = DatabasePool::new(&url).await.unwrap();
        let collaborators = build_collaborators(&config).unwrap();
        AppState::wire(pool, data_dir, config, collaborators)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn create_workflow(app: &Router) -> String {
        let (status, body) = send(app, json_request("POST", "/api/v1/workflows", GREETING_WORKFLOW)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state().await);
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_workflow_create_and_get() {
        let app = build_router(test_state().await);
        let id = create_workflow(&app).await;

        let (status, body) = send(&app, get(&format!("/api/v1/workflows/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "greet");
        assert_eq!(body["_links"]["self"], format!("/api/v1/workflows/{id}"));

        let (_, body) = send(&app, get("/api/v1/workflows")).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_workflow_yaml_body() {
        let app = build_router(test_state().await);
        let yaml = "name: from-yaml\nnodes:\n  - id: start\n    config:\n      type: TRIGGER\n";
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/workflows")
            .header("content-type", "application/yaml")
            .body(Body::from(yaml))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["name"], "from-yaml");
    }

    #[tokio::test]
    async fn test_invalid_workflow_is_400() {
        let app = build_router(test_state().await);
        let body = r#"{"name": "bad", "nodes": []}"#;
        let (status, body) = send(&app, json_request("POST", "/api/v1/workflows", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_404() {
        let app = build_router(test_state().await);
        let uri = format!("/api/v1/workflows/{}", uuid::Uuid::now_v7());
        let (status, body) = send(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_run_returns_final_context() {
        let app = build_router(test_state().await);
        let id = create_workflow(&app).await;

        let context = urlencode(r#"{"name":"Ada"}"#);
        let uri = format!("/workflow/run?workflowId={id}&context={context}");
        let (status, body) = send(&app, json_request("POST", &uri, "")).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["greeting"], "Hello Ada");
        assert_eq!(body["name"], "Ada");
    }

    #[tokio::test]
    async fn test_run_unknown_workflow_reports_error() {
        let app = build_router(test_state().await);
        let uri = format!("/workflow/run?workflowId={}", uuid::Uuid::now_v7());
        let (status, body) = send(&app, json_request("POST", &uri, "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_run_bad_workflow_id_reports_error() {
        let app = build_router(test_state().await);
        for uri in ["/workflow/run?workflowId=not-a-uuid", "/workflow/run"] {
            let (status, body) = send(&app, json_request("POST", uri, "")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["status"], "error");
            assert!(body["message"].is_string());
        }
    }

    #[tokio::test]
    async fn test_run_rejects_non_object_context() {
        let app = build_router(test_state().await);
        let id = create_workflow(&app).await;
        let uri = format!("/workflow/run?workflowId={id}&context=%5B1%5D");
        let (status, body) = send(&app, json_request("POST", &uri, "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_schedule_lifecycle() {
        let app = build_router(test_state().await);
        let id = create_workflow(&app).await;

        let body = json!({
            "workflow_id": id,
            "cron_expression": "0 9 * * *",
            "timezone": "Asia/Kolkata",
        })
        .to_string();
        let (status, created) = send(&app, json_request("POST", "/api/v1/schedules", &body)).await;
        assert_eq!(status, StatusCode::OK, "{created}");
        assert_eq!(created["data"]["status"], "ACTIVE");
        assert!(created["data"]["next_run_at"].is_string());
        let schedule_id = created["data"]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/v1/schedules/{schedule_id}/deactivate");
        let (status, body) = send(&app, json_request("POST", &uri, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "INACTIVE");

        let (_, body) = send(&app, get("/api/v1/schedules/due")).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let (status, body) = send(&app, get(&format!("/api/v1/schedules/{schedule_id}/runs"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_bad_timezone_is_400() {
        let app = build_router(test_state().await);
        let id = create_workflow(&app).await;
        let body = json!({
            "workflow_id": id,
            "cron_expression": "0 9 * * *",
            "timezone": "Mars/Olympus",
        })
        .to_string();
        let (status, _) = send(&app, json_request("POST", "/api/v1/schedules", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_event_runs_trigger_once_per_event_id() {
        let app = build_router(test_state().await);
        let id = create_workflow(&app).await;

        let body = json!({
            "workflow_id": id,
            "event_name": "user.signed_up",
            "idempotency": {"strategy": "EVENT_BASED", "include_event_id": true},
        })
        .to_string();
        let (status, trigger) = send(&app, json_request("POST", "/api/v1/triggers", &body)).await;
        assert_eq!(status, StatusCode::OK, "{trigger}");

        let event = json!({"event_id": "evt-1", "payload": {"name": "Grace"}}).to_string();
        let (status, first) =
            send(&app, json_request("POST", "/api/v1/events/user.signed_up", &event)).await;
        assert_eq!(status, StatusCode::OK, "{first}");
        assert_eq!(first["data"][0]["status"], "COMPLETED");
        let key = first["data"][0]["idempotency_key"].as_str().unwrap().to_string();

        let (_, second) =
            send(&app, json_request("POST", "/api/v1/events/user.signed_up", &event)).await;
        assert_eq!(second["data"][0]["status"], "SKIPPED");

        let (status, execution) =
            send(&app, get(&format!("/api/v1/executions/status?key={}", urlencode(&key)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(execution["data"]["status"], "COMPLETED");

        let (_, stats) = send(&app, get("/api/v1/executions/statistics")).await;
        assert_eq!(stats["data"]["COMPLETED"], 1);

        let uri = format!("/api/v1/executions?key={}", urlencode(&key));
        let (status, cleared) = send(&app, json_request("DELETE", &uri, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["data"]["cleared"], true);

        let (status, _) = send(&app, json_request("DELETE", &uri, "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_logs_for_run_execution() {
        let app = build_router(test_state().await);
        let id = create_workflow(&app).await;
        let body = json!({
            "workflow_id": id,
            "event_name": "ping",
        })
        .to_string();
        send(&app, json_request("POST", "/api/v1/triggers", &body)).await;
        let (_, fired) = send(
            &app,
            json_request("POST", "/api/v1/events/ping", r#"{"payload": {"name": "Lin"}}"#),
        )
        .await;
        let execution_id = fired["data"][0]["execution_id"].as_str().unwrap().to_string();

        let uri = format!("/api/v1/logs/executions/{execution_id}?page=0&size=1");
        let (status, logs) = send(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::OK, "{logs}");
        assert_eq!(logs["data"]["total"], 2);
        assert_eq!(logs["data"]["items"].as_array().unwrap().len(), 1);
        assert_eq!(logs["data"]["items"][0]["node_id"], "start");

        let (_, by_node) = send(&app, get("/api/v1/logs/nodes/hello")).await;
        assert_eq!(by_node["data"]["total"], 1);
    }

    #[tokio::test]
    async fn test_log_range_must_be_ordered() {
        let app = build_router(test_state().await);
        let uri = "/api/v1/logs?from=2026-03-02T00:00:00Z&to=2026-03-01T00:00:00Z";
        let (status, _) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    fn urlencode(raw: &str) -> String {
        raw.bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    (b as char).to_string()
                }
                _ => format!("%{b:02X}"),
            })
            .collect()
    }
}
