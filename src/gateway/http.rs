//! HTTP binding to vMark node agents.
//!
//! Every request is a JSON `POST` carrying the controller's `vmark_id`, the
//! same credential the agents check on registration and heartbeat.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{CommandGateway, ExecuteOutput, GatewayError, StatusQuery, StatusReport};
use crate::config::GatewayConfig;
use crate::registry::NodeRegistry;

pub const EXECUTE_PATH: &str = "/api/execute";
pub const STATUS_PATH: &str = "/api/twamp/status";

/// [`CommandGateway`] that talks to node agents over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    registry: Arc<dyn NodeRegistry>,
    vmark_id: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig, registry: Arc<dyn NodeRegistry>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            registry,
            vmark_id: config.vmark_id.clone(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        node_id: &str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let node = self
            .registry
            .lookup(node_id)
            .ok_or_else(|| GatewayError::UnknownNode {
                node_id: node_id.to_string(),
            })?;
        let url = format!("{}{}", node.base_url(), path);
        debug!(%url, node_id, "calling node agent");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status_code: status.as_u16(),
                detail: error_detail(&text),
            });
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

/// Agents answer errors as `{"detail": "..."}`; fall back to the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait::async_trait]
impl CommandGateway for HttpGateway {
    async fn execute(&self, node_id: &str, command: &str) -> Result<ExecuteOutput, GatewayError> {
        self.post(
            node_id,
            EXECUTE_PATH,
            json!({ "vmark_id": self.vmark_id, "command": command }),
        )
        .await
    }

    async fn status(&self, node_id: &str, query: &StatusQuery) -> Result<StatusReport, GatewayError> {
        self.post(
            node_id,
            STATUS_PATH,
            json!({
                "vmark_id": self.vmark_id,
                "ip_version": query.ip_version,
                "destination_ip": query.dest_ip,
                "port": query.port,
            }),
        )
        .await
    }
}
