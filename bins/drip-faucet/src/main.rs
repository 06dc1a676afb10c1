//! drip-faucet — testnet token faucet with multi-key admission control.
//!
//! Serves a REST API at `/api/faucet` that dispenses a fixed amount of
//! testnet currency per request, limited per client IP, per destination
//! wallet and globally. Bots and dashboards are ordinary HTTP clients and
//! go through the same limits.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

mod admission;
mod config;
mod dispense;
mod routes;

use config::Config;
use dispense::{Dispenser, RpcDispenser};
use drip_limiter::{spawn_sweeper, AdmissionEngine};

/// Shared application state passed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Admission control for every inbound request.
    pub engine: Arc<AdmissionEngine>,
    /// Sends funds to approved addresses.
    pub dispenser: Arc<dyn Dispenser>,
    /// Faucet configuration.
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load faucet configuration")?;

    info!(
        rpc = %config.rpc_endpoint,
        bind = %config.bind_addr,
        amount = config.amount,
        admin_api = config.admin_token.is_some(),
        api_keys = config.api_keys.len(),
        trusted_proxies = config.trusted_proxies.len(),
        "Starting drip-faucet"
    );

    let engine = AdmissionEngine::new(config.limits.clone())
        .context("Invalid rate limit configuration")?;
    let engine = Arc::new(engine);
    let _sweeper = spawn_sweeper(&engine);

    let dispenser = RpcDispenser::new(&config.rpc_endpoint, &config.rpc_method)?;

    let state = AppState {
        engine,
        dispenser: Arc::new(dispenser),
        config: Arc::new(config.clone()),
    };

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("Listening on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await
    .context("HTTP server error")?;

    Ok(())
}
