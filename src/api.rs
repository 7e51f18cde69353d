//! REST endpoints for ingesting messages and driving unsubscribe runs.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::Error;
use crate::ingest;
use crate::unsubscribe::{Orchestrator, TriggerResult};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the Axum router with the message and unsubscribe routes.
pub fn routes(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/messages/{id}", post(ingest_message))
        .route("/api/unsubscribe", post(trigger).get(list_statuses))
        .route("/api/unsubscribe/{id}", get(get_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "unsub-engine"
    }))
}

// ── Messages ────────────────────────────────────────────────────────────

async fn ingest_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    match ingest::ingest(state.orchestrator.store().as_ref(), &id, &body).await {
        Ok(metadata) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"message_id": id, "metadata": metadata})),
        ),
        Err(Error::Ingest(e)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
        Err(e) => {
            warn!(message_id = %id, error = %e, "Failed to store message");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

// ── Unsubscribe ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TriggerRequest {
    message_ids: Vec<String>,
    #[serde(default)]
    force: bool,
}

async fn trigger(
    State(state): State<AppState>,
    Json(body): Json<TriggerRequest>,
) -> impl IntoResponse {
    if body.message_ids.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "message_ids must not be empty"})),
        );
    }

    let results = state
        .orchestrator
        .trigger_many(&body.message_ids, body.force)
        .await;

    let pick = |wanted: TriggerResult| -> Vec<&str> {
        results
            .iter()
            .filter(|(_, r)| *r == wanted)
            .map(|(id, _)| id.as_str())
            .collect()
    };
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "started": pick(TriggerResult::Started),
            "already_running": pick(TriggerResult::AlreadyRunning),
            "already_succeeded": pick(TriggerResult::AlreadySucceeded),
        })),
    )
}

async fn get_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.orchestrator.status(&id).await {
        Ok(record) => (StatusCode::OK, Json(serde_json::json!(record))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(default)]
    ids: String,
}

async fn list_statuses(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let ids: Vec<String> = query
        .ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    match state.orchestrator.statuses(&ids).await {
        Ok(records) => (
            StatusCode::OK,
            Json(serde_json::json!({"statuses": records})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::EngineConfig;
    use crate::store::LibSqlBackend;
    use crate::unsubscribe::transport::stub::StubTransport;

    async fn app() -> (Router, Arc<Orchestrator>) {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let orch = Orchestrator::new(
            &EngineConfig::default(),
            Arc::new(store),
            Arc::new(StubTransport::new()),
        );
        (routes(Arc::clone(&orch)), orch)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = app().await;
        let (status, body) = send(app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn ingest_stores_metadata() {
        let (app, orch) = app().await;
        let raw = "From: a@x.example\r\nList-Unsubscribe: <https://x.example/u>\r\n\r\nhi\r\n";
        let (status, body) = send(
            app,
            Request::post("/api/messages/m1").body(Body::from(raw)).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["metadata"]["list_unsubscribe"], "<https://x.example/u>");

        let stored = orch.store().get_message("m1").await.unwrap().unwrap();
        assert_eq!(stored.list_unsubscribe.as_deref(), Some("<https://x.example/u>"));
    }

    #[tokio::test]
    async fn ingest_rejects_empty_body() {
        let (app, _) = app().await;
        let (status, body) = send(
            app,
            Request::post("/api/messages/m1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn unknown_status_is_not_attempted() {
        let (app, _) = app().await;
        let (status, body) = send(
            app,
            Request::get("/api/unsubscribe/ghost").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "not_attempted");
        assert_eq!(body["method"], "none");
    }

    #[tokio::test]
    async fn trigger_reports_in_flight_ids() {
        let (app, orch) = app().await;
        let _held = orch.claim("busy");
        let req = Request::post("/api/unsubscribe")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message_ids":["busy"]}"#))
            .unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["already_running"][0], "busy");
        assert!(body["started"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trigger_rejects_empty_list() {
        let (app, _) = app().await;
        let req = Request::post("/api/unsubscribe")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message_ids":[]}"#))
            .unwrap();
        let (status, _) = send(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bulk_status_keeps_request_order() {
        let (app, _) = app().await;
        let (status, body) = send(
            app,
            Request::get("/api/unsubscribe?ids=b,a").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let statuses = body["statuses"].as_array().unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0]["message_id"], "b");
        assert_eq!(statuses[1]["status"], "not_attempted");
    }
}
