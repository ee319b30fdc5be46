//! vMark controller -- orchestrates ad-hoc TWAMP benchmarks between managed
//! network nodes.
//!
//! The crate validates test parameters, builds the agent command strings,
//! drives the responder/sender lifecycle through a [`gateway::CommandGateway`],
//! and always cleans up the remote processes afterwards.

pub mod api;
pub mod config;
pub mod gateway;
pub mod registry;
pub mod twamp;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::VmarkConfig;
use crate::gateway::HttpGateway;
use crate::registry::{NodeRegistry, StaticRegistry};
use crate::twamp::{ControllerSettings, RunController};

/// Build a controller that reaches nodes over HTTP, using the configured
/// static registry.
pub fn build_controller(config: &VmarkConfig) -> Result<RunController> {
    let registry: Arc<dyn NodeRegistry> = Arc::new(StaticRegistry::new(config.nodes.clone()));
    let gateway = HttpGateway::new(&config.gateway, registry.clone())
        .context("failed to build node agent client")?;
    Ok(RunController::new(
        Arc::new(gateway),
        registry,
        ControllerSettings::from(&config.controller),
    ))
}

/// Start the controller API server.
pub async fn serve(config: &VmarkConfig) -> Result<()> {
    let controller = build_controller(config)?;
    let app = api::router(
        api::state::AppState { controller },
        &config.api.allowed_origins,
    );

    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.api.bind))?;

    tracing::info!(%addr, nodes = config.nodes.len(), "vmark controller listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
