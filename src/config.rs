//! TOML configuration for the vMark controller.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working controller with an empty node registry.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::registry::Node;
use crate::twamp::validate::DEFAULT_WAIT_BUFFER_MS;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "VMARK_CONFIG";
/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/vmark/vmark.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmarkConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Registered nodes served by the static registry.
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl VmarkConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), nodes = config.nodes.len(), "loaded vmark configuration");
        Ok(config)
    }

    /// Resolve configuration: an explicit path must load; otherwise try
    /// `VMARK_CONFIG`, then the system path, then defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "VMARK_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Timing knobs of the run controller. All values in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Pause between a successful responder start and the sender start.
    pub grace_period_ms: u64,
    /// Cadence of status polls while the sender runs.
    pub poll_interval_ms: u64,
    /// Bound on each start command and status poll.
    pub call_timeout_ms: u64,
    /// Bound on each stop command during cleanup.
    pub cleanup_timeout_ms: u64,
    /// Added to `count * interval` to get the run timeout.
    pub wait_buffer_ms: u64,
    /// Send sender-stop even after a normal completion.
    pub stop_sender_on_completion: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 500,
            poll_interval_ms: 2_000,
            call_timeout_ms: 10_000,
            cleanup_timeout_ms: 5_000,
            wait_buffer_ms: DEFAULT_WAIT_BUFFER_MS,
            stop_sender_on_completion: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Controller credential presented to node agents.
    pub vmark_id: String,
    pub connect_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            vmark_id: String::new(),
            connect_timeout_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// Origins allowed to call the API from a browser.
    pub allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
