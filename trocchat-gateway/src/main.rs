//! Troc messaging gateway -- real-time chat server for the marketplace.
//!
//! An axum server exposing a WebSocket endpoint for live messaging events
//! and REST routes for conversation and history snapshots.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin trocchat-gateway -- --jwt-secret change-me
//!
//! # Run on custom address
//! cargo run --bin trocchat-gateway -- --bind 127.0.0.1:8080 --jwt-secret change-me
//!
//! # Or via environment variables
//! GATEWAY_ADDR=127.0.0.1:8080 GATEWAY_JWT_SECRET=change-me cargo run --bin trocchat-gateway
//! ```

use std::sync::Arc;

use clap::Parser;
use trocchat_gateway::config::{GatewayCliArgs, GatewayConfig};
use trocchat_gateway::gateway::{self, GatewayState};

#[tokio::main]
async fn main() {
    let cli = GatewayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match GatewayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting trocchat gateway");

    let state = Arc::new(GatewayState::new(&config));

    match gateway::start_server(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "gateway listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "gateway server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start gateway");
            std::process::exit(1);
        }
    }
}
