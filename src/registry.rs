//! Node registry -- maps node ids to the address of their agent.
//!
//! Registration, edits and heartbeats are handled elsewhere; the orchestrator
//! only needs read access. [`StaticRegistry`] serves the `[[nodes]]` table of
//! the configuration file.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Agent port used when a node entry does not specify one.
pub const DEFAULT_AGENT_PORT: u16 = 1050;

/// A managed endpoint reachable through its agent API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Address as registered. Usually an IP literal, kept as text because
    /// registration does not validate it.
    pub ip: String,
    #[serde(default = "default_agent_port")]
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

impl Node {
    /// Parse the registered address, if it is an IP literal.
    pub fn ip_addr(&self) -> Option<IpAddr> {
        self.ip.trim().parse().ok()
    }

    /// Base URL of the node agent. IPv6 literals are bracketed.
    pub fn base_url(&self) -> String {
        let host = self.ip.trim();
        if host.contains(':') {
            format!("http://[{}]:{}", host, self.port)
        } else {
            format!("http://{}:{}", host, self.port)
        }
    }
}

/// Read-only lookup of registered nodes.
pub trait NodeRegistry: Send + Sync {
    /// Find a node by id.
    fn lookup(&self, node_id: &str) -> Option<Node>;

    /// All registered nodes, ordered by id.
    fn nodes(&self) -> Vec<Node>;
}

/// Registry backed by a fixed list of nodes.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    nodes: BTreeMap<String, Node>,
}

impl StaticRegistry {
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeRegistry for StaticRegistry {
    fn lookup(&self, node_id: &str) -> Option<Node> {
        self.nodes.get(node_id).cloned()
    }

    fn nodes(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, ip: &str) -> Node {
        Node {
            id: id.to_string(),
            ip: ip.to_string(),
            port: DEFAULT_AGENT_PORT,
            tags: vec![],
        }
    }

    #[test]
    fn test_base_url_brackets_ipv6() {
        assert_eq!(node("a", "10.0.0.1").base_url(), "http://10.0.0.1:1050");
        assert_eq!(node("b", "fd00::1").base_url(), "http://[fd00::1]:1050");
    }

    #[test]
    fn test_ip_addr_rejects_hostnames() {
        assert!(node("a", " 10.0.0.1 ").ip_addr().is_some());
        assert!(node("a", "edge-1.lab").ip_addr().is_none());
    }

    #[test]
    fn test_static_registry_lookup() {
        let reg = StaticRegistry::new([node("b", "10.0.0.2"), node("a", "10.0.0.1")]);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.lookup("a").unwrap().ip, "10.0.0.1");
        assert!(reg.lookup("missing").is_none());

        let ids: Vec<_> = reg.nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_node_port_defaults_when_absent() {
        let n: Node = serde_json::from_str(r#"{"id": "x", "ip": "10.0.0.9"}"#).unwrap();
        assert_eq!(n.port, DEFAULT_AGENT_PORT);
        assert!(n.tags.is_empty());
    }
}
