//! API route definitions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use super::state::AppState;
use crate::twamp::{RawTestParameters, StartError};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/nodes", get(list_nodes))
        .route("/twamp/start", post(start_run))
        .route("/twamp/stop", post(stop_run))
        .route("/twamp/status", get(run_status))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": { "status": "ok" },
        "meta": meta()
    }))
}

async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_nodes(State(state): State<AppState>) -> Json<Value> {
    let nodes = state.controller.registry().nodes();
    Json(json!({ "data": nodes, "meta": { "total": nodes.len() } }))
}

async fn start_run(
    State(state): State<AppState>,
    Json(raw): Json<RawTestParameters>,
) -> (StatusCode, Json<Value>) {
    match state.controller.start(&raw) {
        Ok(handle) => {
            info!(run_id = %handle.run_id, "run accepted via api");
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "data": {
                        "run_id": handle.run_id,
                        "state": state.controller.state(),
                        "commands": handle.commands,
                        "derived": handle.derived,
                    },
                    "meta": meta()
                })),
            )
        }
        Err(e) => {
            let status = match e {
                StartError::Validation(_) => StatusCode::BAD_REQUEST,
                StartError::Busy { .. } => StatusCode::CONFLICT,
            };
            (status, Json(json!({ "error": e.to_string() })))
        }
    }
}

async fn stop_run(State(state): State<AppState>) -> Json<Value> {
    let cancelled = state.controller.cancel();
    Json(json!({
        "data": {
            "cancelled": cancelled,
            "state": state.controller.state(),
        },
        "meta": meta()
    }))
}

async fn run_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "state": state.controller.state(),
            "last_outcome": state.controller.last_outcome(),
        },
        "meta": meta()
    }))
}
