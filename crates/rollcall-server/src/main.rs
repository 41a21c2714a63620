//! # rollcall-server
//!
//! HTTP server for the rollcall BLE attendance system.
//!
//! This binary provides:
//! - REST API to run the broadcaster (student) or collector (teacher) role
//! - Recent role events and an OpenAPI document
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, in-memory radio
//! cargo run --package rollcall-server
//!
//! # On a Linux device with BlueZ
//! cargo run --package rollcall-server --features bluetooth
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use rollcall_core::{BeaconConfig, RadioPort};
use rollcall_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rollcall-server");

    let config = load_config()?;
    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_address))?;

    let radio = build_radio().await?;
    let state = AppState::new(config, radio);

    let app = api::create_router(state.clone()).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.controller().await.stop().await;
    info!("Shutdown complete");

    Ok(())
}

/// `ROLLCALL_CONFIG` names an explicit file; otherwise the platform default
/// is used if present.
fn load_config() -> anyhow::Result<BeaconConfig> {
    let config = match std::env::var_os("ROLLCALL_CONFIG") {
        Some(path) => BeaconConfig::load_from(&PathBuf::from(path)),
        None => BeaconConfig::load(),
    }
    .context("Failed to load configuration")?;
    Ok(config)
}

#[cfg(feature = "bluetooth")]
async fn build_radio() -> anyhow::Result<Arc<dyn RadioPort>> {
    let radio = rollcall_core::BluerRadio::new()
        .await
        .context("Bluetooth radio unavailable")?;
    Ok(Arc::new(radio))
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn build_radio() -> anyhow::Result<Arc<dyn RadioPort>> {
    warn!("Built without the bluetooth feature, using the in-memory radio");
    Ok(Arc::new(rollcall_core::MockRadio::new()))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, initiating shutdown..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "Cannot install signal handlers, falling back to Ctrl+C");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
        Err(err) => {
            warn!(error = %err, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
