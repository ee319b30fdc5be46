//! Remote command gateway -- the only way the controller reaches endpoints.
//!
//! Calls are plain futures: dropping one aborts the request, which is how the
//! controller cancels in-flight work. Timeouts are imposed by the caller.

pub mod http;

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::twamp::{IpVersion, RunResult};

pub use self::http::HttpGateway;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("node '{node_id}' is not registered")]
    UnknownNode { node_id: String },

    #[error("agent returned HTTP {status_code}: {detail}")]
    Status { status_code: u16, detail: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed agent response: {0}")]
    Decode(String),
}

/// Output of a command executed on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOutput {
    #[serde(default)]
    pub output: String,
}

/// Identifies the TWAMP session whose status is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusQuery {
    pub ip_version: IpVersion,
    pub dest_ip: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    /// Also covers any status string this controller does not recognise.
    #[serde(other)]
    Unknown,
}

/// Asynchronous run status as reported by the sender node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: SessionStatus,
    #[serde(default, deserialize_with = "crate::twamp::report::lenient_object")]
    pub results: Option<RunResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Executes commands on, and reads TWAMP status from, managed nodes.
#[async_trait::async_trait]
pub trait CommandGateway: Send + Sync {
    /// Run `command` on `node_id` and return its output.
    async fn execute(&self, node_id: &str, command: &str) -> Result<ExecuteOutput, GatewayError>;

    /// Report the status of the TWAMP sender session on `node_id`.
    async fn status(&self, node_id: &str, query: &StatusQuery) -> Result<StatusReport, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognised_status_is_unknown() {
        let r: StatusReport = serde_json::from_str(r#"{"status": "crashed"}"#).unwrap();
        assert_eq!(r.status, SessionStatus::Unknown);

        let r: StatusReport =
            serde_json::from_str(r#"{"status": "completed", "results": {"packets_received": 10}}"#)
                .unwrap();
        assert_eq!(r.status, SessionStatus::Completed);
        assert_eq!(r.results.unwrap().packets_received, Some(10.0));
    }

    #[test]
    fn test_completed_status_with_malformed_results_decodes() {
        let r: StatusReport = serde_json::from_str(
            r#"{"status": "completed", "results": {"outbound": "n/a", "packets_received": 10}}"#,
        )
        .unwrap();
        assert_eq!(r.status, SessionStatus::Completed);
        let results = r.results.unwrap();
        assert!(results.outbound.is_none());
        assert_eq!(results.packets_received, Some(10.0));

        let r: StatusReport =
            serde_json::from_str(r#"{"status": "completed", "results": "pending"}"#).unwrap();
        assert!(r.results.is_none());
    }

    #[test]
    fn test_gateway_error_display() {
        let e = GatewayError::Status {
            status_code: 503,
            detail: "busy".into(),
        };
        assert_eq!(e.to_string(), "agent returned HTTP 503: busy");
    }
}
