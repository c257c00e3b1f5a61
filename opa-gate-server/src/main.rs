//! OPA Gate HTTP Server binary

use anyhow::Context;
use opa_gate_core::{GateConfig, PolicyClient};
use opa_gate_server::{build_router, metrics, telemetry, EnforcementGate};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GateConfig::load().context("Failed to load configuration")?;

    telemetry::init_tracing_stack(&config)?;
    if config.otel_enabled {
        info!(endpoint = %config.otlp_endpoint, "OpenTelemetry tracing enabled");
    }

    info!(
        "Starting {} (opa-gate v{})",
        config.app_name,
        env!("CARGO_PKG_VERSION")
    );

    let metrics_addr = config
        .metrics_address
        .as_deref()
        .map(str::parse::<SocketAddr>)
        .transpose()
        .context("Invalid METRICS_ADDRESS")?;
    match metrics_addr {
        Some(addr) => {
            metrics::init_prometheus(addr)?;
            metrics::init_metrics();
            info!("Prometheus metrics on http://{}/metrics", addr);
        }
        None => info!("Metrics disabled (set METRICS_ADDRESS to expose them)"),
    }

    // One client, one connection pool, shared by every request
    let client = PolicyClient::new(config.policy_client())?;
    info!(
        endpoint = client.endpoint(),
        timeout_ms = config.policy_timeout_ms,
        missing_allow = ?config.missing_allow,
        "Policy engine configured"
    );

    let gate = EnforcementGate::new(Arc::new(client))
        .with_role_header(&config.role_header)
        .context("Invalid ROLE_HEADER")?;

    let app = build_router(Arc::new(gate));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    if config.otel_enabled {
        info!("Flushing OpenTelemetry traces...");
        telemetry::shutdown_telemetry();
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, shutting down gracefully...");
}
