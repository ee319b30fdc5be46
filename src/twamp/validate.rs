//! Parameter validation -- clamps raw input into a bounded configuration.
//!
//! Numeric fields never fail: anything out of range is pulled to the nearest
//! bound. Only node identity can reject a request, and it does so before any
//! remote call is made.

use crate::registry::NodeRegistry;

use super::{
    DerivedConfig, RawTestParameters, Role, TestRunParameters, ValidationError,
};

pub const PORT_RANGE: (i64, i64) = (1, 65_535);
pub const COUNT_RANGE: (i64, i64) = (1, 10_000);
pub const INTERVAL_MS_RANGE: (i64, i64) = (10, 10_000);
pub const PADDING_RANGE: (i64, i64) = (0, 9_000);
pub const TTL_RANGE: (i64, i64) = (1, 255);
pub const TOS_RANGE: (i64, i64) = (0, 255);

/// TWAMP well-known port.
pub const DEFAULT_PORT: i64 = 862;
pub const DEFAULT_COUNT: i64 = 100;
pub const DEFAULT_INTERVAL_MS: i64 = 100;
pub const DEFAULT_PADDING: i64 = 0;
pub const DEFAULT_TTL: i64 = 64;
pub const DEFAULT_TOS: i64 = 0;

/// Slack added on top of `count * interval` before a run is declared timed out.
pub const DEFAULT_WAIT_BUFFER_MS: u64 = 2_000;

pub const SEQUENCE_FIELD_BYTES: u32 = 4;
pub const UDP_HEADER_BYTES: u32 = 8;

fn clamp(value: Option<i64>, default: i64, (lo, hi): (i64, i64)) -> i64 {
    value.unwrap_or(default).clamp(lo, hi)
}

/// Validate `raw` against `registry` and derive the run configuration.
pub fn validate(
    raw: &RawTestParameters,
    registry: &dyn NodeRegistry,
    wait_buffer_ms: u64,
) -> Result<(TestRunParameters, DerivedConfig), ValidationError> {
    let sender_node_id = raw.sender_node_id.trim();
    let responder_node_id = raw.responder_node_id.trim();

    if sender_node_id.is_empty() {
        return Err(ValidationError::MissingNode { role: Role::Sender });
    }
    if responder_node_id.is_empty() {
        return Err(ValidationError::MissingNode {
            role: Role::Responder,
        });
    }

    if registry.lookup(sender_node_id).is_none() {
        return Err(ValidationError::UnknownNode {
            role: Role::Sender,
            node_id: sender_node_id.to_string(),
        });
    }
    let responder = registry
        .lookup(responder_node_id)
        .ok_or_else(|| ValidationError::UnknownNode {
            role: Role::Responder,
            node_id: responder_node_id.to_string(),
        })?;

    let responder_ip = responder
        .ip_addr()
        .ok_or_else(|| ValidationError::UnresolvableAddress {
            node_id: responder.id.clone(),
            address: responder.ip.clone(),
        })?;
    if !raw.ip_version.matches(&responder_ip) {
        return Err(ValidationError::AddressFamilyMismatch {
            node_id: responder.id.clone(),
            address: responder_ip,
            ip_version: raw.ip_version,
        });
    }

    // Ranges above all fit their target types, so the casts cannot truncate.
    let params = TestRunParameters {
        ip_version: raw.ip_version,
        port: clamp(raw.port, DEFAULT_PORT, PORT_RANGE) as u16,
        count: clamp(raw.count, DEFAULT_COUNT, COUNT_RANGE) as u32,
        interval_ms: clamp(raw.interval_ms, DEFAULT_INTERVAL_MS, INTERVAL_MS_RANGE) as u32,
        padding_bytes: clamp(raw.padding_bytes, DEFAULT_PADDING, PADDING_RANGE) as u32,
        ttl: clamp(raw.ttl, DEFAULT_TTL, TTL_RANGE) as u8,
        tos: clamp(raw.tos, DEFAULT_TOS, TOS_RANGE) as u8,
        do_not_fragment: raw.do_not_fragment,
        sender_node_id: sender_node_id.to_string(),
        responder_node_id: responder_node_id.to_string(),
        responder_ip,
    };

    let derived = derive(&params, wait_buffer_ms);
    Ok((params, derived))
}

/// Compute the timeout budget and on-the-wire packet size.
pub fn derive(params: &TestRunParameters, wait_buffer_ms: u64) -> DerivedConfig {
    DerivedConfig {
        max_wait_ms: u64::from(params.count) * u64::from(params.interval_ms) + wait_buffer_ms,
        on_the_wire_bytes: SEQUENCE_FIELD_BYTES
            + params.padding_bytes
            + UDP_HEADER_BYTES
            + params.ip_version.header_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Node, StaticRegistry};
    use crate::twamp::IpVersion;

    fn registry() -> StaticRegistry {
        StaticRegistry::new([
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
            Node {
                id: "edge-v6".into(),
                ip: "fd00::2".into(),
                port: 1050,
                tags: vec![],
            },
            Node {
                id: "edge-dns".into(),
                ip: "edge.lab.local".into(),
                port: 1050,
                tags: vec![],
            },
        ])
    }

    fn raw() -> RawTestParameters {
        RawTestParameters {
            sender_node_id: "edge-a".into(),
            responder_node_id: "edge-b".into(),
            ..Default::default()
        }
    }

    fn run(raw: &RawTestParameters) -> Result<(TestRunParameters, DerivedConfig), ValidationError> {
        validate(raw, &registry(), DEFAULT_WAIT_BUFFER_MS)
    }

    #[test]
    fn test_defaults_applied() {
        let (p, d) = run(&raw()).unwrap();
        assert_eq!(p.port, 862);
        assert_eq!(p.count, 100);
        assert_eq!(p.interval_ms, 100);
        assert_eq!(p.padding_bytes, 0);
        assert_eq!(p.ttl, 64);
        assert_eq!(p.tos, 0);
        assert_eq!(p.responder_ip.to_string(), "10.0.0.2");
        assert_eq!(d.max_wait_ms, 12_000);
    }

    #[test]
    fn test_count_and_interval_clamped() {
        for (count, want) in [(10_001, 10_000), (1_000_000, 10_000), (0, 1), (-5, 1)] {
            let mut r = raw();
            r.count = Some(count);
            assert_eq!(run(&r).unwrap().0.count, want, "count {count}");
        }
        for (interval, want) in [(10_001, 10_000), (9, 10), (-1, 10), (250, 250)] {
            let mut r = raw();
            r.interval_ms = Some(interval);
            assert_eq!(run(&r).unwrap().0.interval_ms, want, "interval {interval}");
        }
    }

    #[test]
    fn test_byte_fields_clamped() {
        let mut r = raw();
        r.port = Some(70_000);
        r.ttl = Some(0);
        r.tos = Some(300);
        r.padding_bytes = Some(-20);
        let (p, _) = run(&r).unwrap();
        assert_eq!(p.port, 65_535);
        assert_eq!(p.ttl, 1);
        assert_eq!(p.tos, 255);
        assert_eq!(p.padding_bytes, 0);
    }

    #[test]
    fn test_derive_on_the_wire_bytes() {
        let mut r = raw();
        r.padding_bytes = Some(100);
        let (_, d) = run(&r).unwrap();
        assert_eq!(d.on_the_wire_bytes, 4 + 100 + 8 + 20);

        let mut r = raw();
        r.ip_version = IpVersion::V6;
        r.responder_node_id = "edge-v6".into();
        let (_, d) = run(&r).unwrap();
        assert_eq!(d.on_the_wire_bytes, 4 + 8 + 40);
    }

    #[test]
    fn test_missing_nodes_rejected() {
        let mut r = raw();
        r.sender_node_id = "  ".into();
        assert_eq!(
            run(&r).unwrap_err(),
            ValidationError::MissingNode { role: Role::Sender }
        );

        let mut r = raw();
        r.responder_node_id = String::new();
        assert_eq!(
            run(&r).unwrap_err(),
            ValidationError::MissingNode {
                role: Role::Responder
            }
        );
    }

    #[test]
    fn test_unknown_and_unresolvable_nodes_rejected() {
        let mut r = raw();
        r.sender_node_id = "ghost".into();
        assert!(matches!(
            run(&r).unwrap_err(),
            ValidationError::UnknownNode { role: Role::Sender, .. }
        ));

        let mut r = raw();
        r.responder_node_id = "edge-dns".into();
        assert!(matches!(
            run(&r).unwrap_err(),
            ValidationError::UnresolvableAddress { .. }
        ));
    }

    #[test]
    fn test_family_mismatch_rejected() {
        let mut r = raw();
        r.ip_version = IpVersion::V6;
        assert!(matches!(
            run(&r).unwrap_err(),
            ValidationError::AddressFamilyMismatch { .. }
        ));
    }
}
