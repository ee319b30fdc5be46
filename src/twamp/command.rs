//! TWAMP command strings understood by node agents.
//!
//! Grammar (tokens are space-joined, keyword is lowercase `twamp`):
//!
//! ```text
//! twamp <v4|v6> responder port <port>
//! twamp <v4|v6> sender destination-ip <ip> port <port> count <n> interval <ms> padding <bytes> ttl <ttl> tos <tos> [do-not-fragment]
//! twamp <v4|v6> stop responder port <port>
//! twamp <v4|v6> stop sender destination-ip <ip> port <port>
//! ```

use serde::Serialize;

use super::{IpVersion, TestRunParameters};

/// Output marker a node agent prints once the sender is up.
pub const SENDER_STARTED_MARKER: &str = "started successfully";
/// Any output containing this marker is a failed start, even if it also
/// contains [`SENDER_STARTED_MARKER`].
pub const ERROR_MARKER: &str = "error";

pub fn start_responder(p: &TestRunParameters) -> String {
    format!("twamp {} responder port {}", p.ip_version, p.port)
}

pub fn start_sender(p: &TestRunParameters) -> String {
    let mut cmd = format!(
        "twamp {} sender destination-ip {} port {} count {} interval {} padding {} ttl {} tos {}",
        p.ip_version,
        p.responder_ip,
        p.port,
        p.count,
        p.interval_ms,
        p.padding_bytes,
        p.ttl,
        p.tos,
    );
    if p.do_not_fragment && p.ip_version == IpVersion::V4 {
        cmd.push_str(" do-not-fragment");
    }
    cmd
}

pub fn stop_responder(p: &TestRunParameters) -> String {
    format!("twamp {} stop responder port {}", p.ip_version, p.port)
}

pub fn stop_sender(p: &TestRunParameters) -> String {
    format!(
        "twamp {} stop sender destination-ip {} port {}",
        p.ip_version, p.responder_ip, p.port
    )
}

/// Whether sender-start output reports a successful start.
pub fn sender_started(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains(SENDER_STARTED_MARKER) && !lower.contains(ERROR_MARKER)
}

/// The four commands of one run, echoed to the caller as sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSet {
    pub start_responder: String,
    pub start_sender: String,
    pub stop_responder: String,
    pub stop_sender: String,
}

impl CommandSet {
    pub fn build(p: &TestRunParameters) -> Self {
        Self {
            start_responder: start_responder(p),
            start_sender: start_sender(p),
            stop_responder: stop_responder(p),
            stop_sender: stop_sender(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TestRunParameters {
        TestRunParameters {
            ip_version: IpVersion::V4,
            port: 5000,
            count: 50,
            interval_ms: 200,
            padding_bytes: 0,
            ttl: 64,
            tos: 0,
            do_not_fragment: true,
            sender_node_id: "edge-a".into(),
            responder_node_id: "edge-b".into(),
            responder_ip: "10.0.0.2".parse().unwrap(),
        }
    }

    #[test]
    fn test_start_sender_with_do_not_fragment() {
        assert_eq!(
            start_sender(&params()),
            "twamp v4 sender destination-ip 10.0.0.2 port 5000 count 50 interval 200 padding 0 ttl 64 tos 0 do-not-fragment"
        );
    }

    #[test]
    fn test_fragment_flag_omitted() {
        let mut p = params();
        p.do_not_fragment = false;
        assert!(start_sender(&p).ends_with("tos 0"));

        let mut p = params();
        p.ip_version = IpVersion::V6;
        p.responder_ip = "fd00::2".parse().unwrap();
        let cmd = start_sender(&p);
        assert!(cmd.starts_with("twamp v6 sender destination-ip fd00::2 "));
        assert!(!cmd.contains("do-not-fragment"));
    }

    #[test]
    fn test_responder_and_stop_commands() {
        let set = CommandSet::build(&params());
        assert_eq!(set.start_responder, "twamp v4 responder port 5000");
        assert_eq!(set.stop_responder, "twamp v4 stop responder port 5000");
        assert_eq!(
            set.stop_sender,
            "twamp v4 stop sender destination-ip 10.0.0.2 port 5000"
        );
    }

    #[test]
    fn test_sender_started_markers() {
        assert!(sender_started("TWAMP sender Started Successfully"));
        assert!(!sender_started("sender started successfully with error"));
        assert!(!sender_started("ERROR: port in use"));
        assert!(!sender_started(""));
        assert!(!sender_started("sender launching"));
    }
}
