//! Ad-hoc TWAMP benchmark orchestration.
//!
//! A run coordinates two remote endpoints: a passive *responder* that is
//! started first and stopped last, and an active *sender* that transmits probe
//! packets and exits on its own once the test is done. This module holds the
//! shared data model; the lifecycle itself lives in [`controller`].

pub mod command;
pub mod controller;
pub mod report;
pub mod validate;

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::command::CommandSet;
pub use self::controller::{ControllerSettings, RunController, RunHandle, RunOutcome};
pub use self::report::{CleanupFailure, CleanupOutcome, RunResult};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// IP family used by both TWAMP endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    #[default]
    V4,
    V6,
}

impl IpVersion {
    /// Size of the network-layer header in bytes.
    pub fn header_bytes(self) -> u32 {
        match self {
            IpVersion::V4 => 20,
            IpVersion::V6 => 40,
        }
    }

    /// Whether `ip` belongs to this family.
    pub fn matches(self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (IpVersion::V4, IpAddr::V4(_)) | (IpVersion::V6, IpAddr::V6(_))
        )
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "v4"),
            IpVersion::V6 => write!(f, "v6"),
        }
    }
}

/// Unvalidated test parameters as supplied by a caller.
///
/// Numeric fields are signed and optional so that anything a user types can be
/// clamped into range instead of being rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTestParameters {
    pub ip_version: IpVersion,
    pub port: Option<i64>,
    pub count: Option<i64>,
    pub interval_ms: Option<i64>,
    pub padding_bytes: Option<i64>,
    pub ttl: Option<i64>,
    pub tos: Option<i64>,
    pub do_not_fragment: bool,
    pub sender_node_id: String,
    pub responder_node_id: String,
}

/// Validated, immutable parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRunParameters {
    pub ip_version: IpVersion,
    pub port: u16,
    pub count: u32,
    pub interval_ms: u32,
    pub padding_bytes: u32,
    pub ttl: u8,
    pub tos: u8,
    pub do_not_fragment: bool,
    pub sender_node_id: String,
    pub responder_node_id: String,
    /// Address of the responder endpoint, looked up from the node registry.
    pub responder_ip: IpAddr,
}

/// Values computed from [`TestRunParameters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DerivedConfig {
    /// Upper bound on how long the sender may run before the run times out.
    pub max_wait_ms: u64,
    /// Per-packet size including UDP and IP headers. Reporting only.
    pub on_the_wire_bytes: u32,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`RunController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    StartingResponder,
    StartingSender,
    Running,
    Completed,
    Stopped,
    Errored,
}

impl RunState {
    /// A run is in flight and may be cancelled.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunState::StartingResponder | RunState::StartingSender | RunState::Running
        )
    }

    /// A new run may be started from this state.
    pub fn accepts_start(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::StartingResponder => "starting_responder",
            RunState::StartingSender => "starting_sender",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Stopped => "stopped",
            RunState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Why a run reached its terminal state. Drives which stop commands cleanup
/// sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Completed,
    Error,
    Timeout,
    Stopped,
}

impl TerminalReason {
    /// The terminal [`RunState`] this reason maps to.
    pub fn state(self) -> RunState {
        match self {
            TerminalReason::Completed => RunState::Completed,
            TerminalReason::Error | TerminalReason::Timeout => RunState::Errored,
            TerminalReason::Stopped => RunState::Stopped,
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalReason::Completed => "completed",
            TerminalReason::Error => "error",
            TerminalReason::Timeout => "timeout",
            TerminalReason::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Which side of the test a node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejected before any state transition or remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{role} node id is required")]
    MissingNode { role: Role },

    #[error("{role} node '{node_id}' is not registered")]
    UnknownNode { role: Role, node_id: String },

    #[error("responder node '{node_id}' has no usable address ('{address}')")]
    UnresolvableAddress { node_id: String, address: String },

    #[error("responder node '{node_id}' address {address} is not an IP{ip_version} address")]
    AddressFamilyMismatch {
        node_id: String,
        address: IpAddr,
        ip_version: IpVersion,
    },
}

/// Reasons [`RunController::start`] refuses to begin a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("a run is already in progress (state: {state})")]
    Busy { state: RunState },
}

/// Primary failure that ended a run in a non-`Completed` state.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("failed to start {role} on '{node_id}': {detail}")]
    StartFailure {
        role: Role,
        node_id: String,
        detail: String,
    },

    #[error("status poll failed: {detail}")]
    PollError { detail: String },

    #[error("no result after waiting {max_wait_ms} ms")]
    Timeout { max_wait_ms: u64 },

    #[error("run cancelled by user")]
    UserCancelled,
}

impl RunFailure {
    /// The terminal reason this failure maps to.
    pub fn reason(&self) -> TerminalReason {
        match self {
            RunFailure::StartFailure { .. } | RunFailure::PollError { .. } => TerminalReason::Error,
            RunFailure::Timeout { .. } => TerminalReason::Timeout,
            RunFailure::UserCancelled => TerminalReason::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states_reject_start() {
        for state in [
            RunState::StartingResponder,
            RunState::StartingSender,
            RunState::Running,
        ] {
            assert!(state.is_active());
            assert!(!state.accepts_start());
        }
        for state in [
            RunState::Idle,
            RunState::Completed,
            RunState::Stopped,
            RunState::Errored,
        ] {
            assert!(state.accepts_start(), "{state} should accept a new run");
        }
    }

    #[test]
    fn test_reason_maps_to_terminal_state() {
        assert_eq!(TerminalReason::Completed.state(), RunState::Completed);
        assert_eq!(TerminalReason::Timeout.state(), RunState::Errored);
        assert_eq!(TerminalReason::Error.state(), RunState::Errored);
        assert_eq!(TerminalReason::Stopped.state(), RunState::Stopped);
        assert_eq!(
            RunFailure::Timeout { max_wait_ms: 1 }.reason(),
            TerminalReason::Timeout
        );
    }

    #[test]
    fn test_ip_version_serde_and_family() {
        let v: IpVersion = serde_json::from_str("\"v6\"").unwrap();
        assert_eq!(v, IpVersion::V6);
        assert!(IpVersion::V4.matches(&"10.0.0.2".parse().unwrap()));
        assert!(!IpVersion::V4.matches(&"fd00::2".parse().unwrap()));
    }

    #[test]
    fn test_raw_parameters_accept_partial_json() {
        let raw: RawTestParameters = serde_json::from_str(
            r#"{"sender_node_id": "a", "responder_node_id": "b", "count": 20000}"#,
        )
        .unwrap();
        assert_eq!(raw.ip_version, IpVersion::V4);
        assert_eq!(raw.count, Some(20000));
        assert!(raw.port.is_none());
        assert!(!raw.do_not_fragment);
    }
}
