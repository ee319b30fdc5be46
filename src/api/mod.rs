//! API layer -- axum routes, handlers, and middleware.

mod routes;
pub mod state;

use self::state::AppState;
use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the application router with all API routes.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .nest("/api/v1", routes::api_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        CommandGateway, ExecuteOutput, GatewayError, SessionStatus, StatusQuery, StatusReport,
    };
    use crate::registry::{Node, StaticRegistry};
    use crate::twamp::{ControllerSettings, RunController, RunState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt; // for `oneshot`

    /// Agent that starts everything and never finishes.
    struct IdleAgent;

    #[async_trait::async_trait]
    impl CommandGateway for IdleAgent {
        async fn execute(&self, _node_id: &str, command: &str) -> Result<ExecuteOutput, GatewayError> {
            let output = if command.contains(" sender ") {
                "Sender started successfully".to_string()
            } else {
                "ok".to_string()
            };
            Ok(ExecuteOutput { output })
        }

        async fn status(&self, _node_id: &str, _query: &StatusQuery) -> Result<StatusReport, GatewayError> {
            Ok(StatusReport {
                status: SessionStatus::Running,
                results: None,
                error: None,
            })
        }
    }

    fn app() -> (Router, RunController) {
        let registry = StaticRegistry::new([
            Node {
                id: "edge-a".into(),
                ip: "10.0.0.1".into(),
                port: 1050,
                tags: vec![],
            },
            Node {
                id: "edge-b".into(),
                ip: "10.0.0.2".into(),
                port: 1050,
                tags: vec![],
            },
        ]);
        let controller = RunController::new(
            Arc::new(IdleAgent),
            Arc::new(registry),
            ControllerSettings::default(),
        );
        let router = router(
            AppState {
                controller: controller.clone(),
            },
            &["http://localhost:5173".to_string()],
        );
        (router, controller)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_and_nodes() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");

        let (_, body) = call(&app, "GET", "/api/v1/nodes", None).await;
        assert_eq!(body["meta"]["total"], 2);
        assert_eq!(body["data"][0]["id"], "edge-a");
    }

    #[tokio::test]
    async fn test_start_validation_error() {
        let (app, controller) = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/twamp/start",
            Some(serde_json::json!({ "sender_node_id": "edge-a" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("responder"));
        assert_eq!(controller.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_start_busy_then_stop() {
        let (app, controller) = app();
        let params = serde_json::json!({
            "sender_node_id": "edge-a",
            "responder_node_id": "edge-b",
            "port": 5000,
            "count": 50,
            "interval_ms": 200,
            "do_not_fragment": true
        });

        let (status, body) = call(&app, "POST", "/api/v1/twamp/start", Some(params.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["derived"]["max_wait_ms"], 12_000);
        assert!(body["data"]["commands"]["start_sender"]
            .as_str()
            .unwrap()
            .ends_with("tos 0 do-not-fragment"));

        let (status, _) = call(&app, "POST", "/api/v1/twamp/start", Some(params)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = call(&app, "POST", "/api/v1/twamp/stop", None).await;
        assert_eq!(body["data"]["cancelled"], true);
        assert_eq!(body["data"]["state"], "stopped");
        assert_eq!(controller.state(), RunState::Stopped);

        let (_, body) = call(&app, "POST", "/api/v1/twamp/stop", None).await;
        assert_eq!(body["data"]["cancelled"], false);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
