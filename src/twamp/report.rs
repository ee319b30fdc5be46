//! TWAMP result payloads and their human-readable rendering.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::controller::RunOutcome;

/// Placeholder for values the sender did not report.
pub const NOT_AVAILABLE: &str = "N/A";

/// Latency statistics for one direction. Values are in microseconds, as
/// reported by the sender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionStats {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub avg: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub jitter: Option<f64>,
}

/// Result payload of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireRunResult")]
pub struct RunResult {
    pub outbound: Option<DirectionStats>,
    pub inbound: Option<DirectionStats>,
    pub roundtrip: Option<DirectionStats>,
    pub packets_transmitted: Option<f64>,
    pub packets_received: Option<f64>,
    pub loss_percentage: Option<f64>,
    pub error: Option<String>,
}

/// Result payload as senders emit it. Older agents spell the round-trip key
/// `round_trip`; `roundtrip` wins when both are present.
#[derive(Deserialize)]
struct WireRunResult {
    #[serde(default, deserialize_with = "lenient_object")]
    outbound: Option<DirectionStats>,
    #[serde(default, deserialize_with = "lenient_object")]
    inbound: Option<DirectionStats>,
    #[serde(default, deserialize_with = "lenient_object")]
    roundtrip: Option<DirectionStats>,
    #[serde(default, deserialize_with = "lenient_object")]
    round_trip: Option<DirectionStats>,
    #[serde(default, deserialize_with = "lenient_f64")]
    packets_transmitted: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    packets_received: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    loss_percentage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    error: Option<String>,
}

impl From<WireRunResult> for RunResult {
    fn from(w: WireRunResult) -> Self {
        Self {
            outbound: w.outbound,
            inbound: w.inbound,
            roundtrip: w.roundtrip.or(w.round_trip),
            packets_transmitted: w.packets_transmitted,
            packets_received: w.packets_received,
            loss_percentage: w.loss_percentage,
            error: w.error,
        }
    }
}

/// Accept numbers, numeric strings or null. Anything else reads as absent.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|f| f.is_finite()))
}

/// Decode a nested object, treating anything that does not fit `T` as absent.
pub(crate) fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .filter(Value::is_object)
        .and_then(|v| serde_json::from_value(v).ok()))
}

/// Strings verbatim; other non-null values as their JSON text.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }))
}

fn ms(us: Option<f64>) -> String {
    match us {
        Some(v) => format!("{:.2} ms", v / 1000.0),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn direction_line(label: &str, stats: Option<&DirectionStats>) -> String {
    let empty = DirectionStats::default();
    let s = stats.unwrap_or(&empty);
    format!(
        "{:<11} min {} | max {} | avg {} | jitter {}",
        label,
        ms(s.min),
        ms(s.max),
        ms(s.avg),
        ms(s.jitter)
    )
}

/// Render a result payload. Missing values become `N/A`; never fails.
pub fn format_report(result: &RunResult) -> String {
    let count = |v: Option<f64>| match v {
        Some(n) if n.fract() == 0.0 => format!("{:.0}", n),
        Some(n) => n.to_string(),
        None => NOT_AVAILABLE.to_string(),
    };
    let loss = result
        .loss_percentage
        .map(|v| format!("{:.2}%", v))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let mut lines = vec![
        direction_line("Outbound:", result.outbound.as_ref()),
        direction_line("Inbound:", result.inbound.as_ref()),
        direction_line("Round-trip:", result.roundtrip.as_ref()),
        format!("Packets transmitted: {}", count(result.packets_transmitted)),
        format!("Packets received:    {}", count(result.packets_received)),
        format!("Packet loss:         {}", loss),
    ];
    if let Some(err) = &result.error {
        lines.push(format!("Error: {}", err));
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// A stop command that failed or timed out during cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("'{command}' on '{node_id}' failed: {detail}")]
pub struct CleanupFailure {
    pub node_id: String,
    pub command: String,
    pub detail: String,
}

/// Accumulated cleanup errors. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    /// Stop commands that were issued.
    pub sent: Vec<String>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line trailer describing how cleanup went.
    pub fn summary(&self) -> String {
        if self.is_clean() {
            return format!("Cleanup complete ({} stop command(s) sent)", self.sent.len());
        }
        let details: Vec<String> = self.failures.iter().map(|f| f.to_string()).collect();
        format!(
            "Cleanup finished with {} error(s): {}",
            self.failures.len(),
            details.join("; ")
        )
    }
}

/// Render the terminal summary of a run.
pub fn format_outcome(outcome: &RunOutcome) -> String {
    let mut out = format!(
        "TWAMP run {}: {} ({})\n{}\n",
        outcome.run_id, outcome.state, outcome.reason, outcome.cause
    );
    if let Some(report) = &outcome.report {
        out.push_str(report);
        out.push('\n');
    }
    out.push_str(&outcome.cleanup.summary());
    out
}
