//! pdu-control - PDU outlet state synchronization & control
//!
//! Keeps a coherent view of outlet states fed by an SNMP agent's HTTP API and
//! a change-notifying store, dispatches toggle/cycle commands, serves
//! telemetry history, and exposes it all as JSON for dashboard consumers.

mod agent;
mod api;
mod config;
mod connection;
mod db;
mod error;
mod history;
mod models;
mod outlets;
mod state;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::{Core, ExternalStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdu_control=info,tower_http=info".into()),
        )
        .init();

    tracing::info!("Starting pdu-control...");

    // Load configuration
    let config = config::Config::load()?;
    tracing::info!("Configuration loaded");

    // External store (MongoDB or in-process fallback)
    let store = ExternalStore::connect(&config).await;

    // Settings, initial fetch, change feed
    let core = Core::activate(&config, store).await?;
    tracing::info!(
        "Core active, agent at {}",
        core.state.connection.agent_base_url()
    );

    // Build application router
    let cors = CorsLayer::permissive();

    let app = api::routes().with_state(core.state.clone()).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, releasing change feed");
    core.deactivate().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
