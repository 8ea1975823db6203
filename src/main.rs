//! # Gateway Relay
//!
//! A resilient gateway client that relays guild member and presence data
//! into Redis.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Redis client
//! - Gateway session

use anyhow::Result;
use tracing::info;

use gateway_relay::config::Settings;
use gateway_relay::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    gateway_relay::telemetry::init_tracing();

    info!("Starting Gateway Relay...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        api = %settings.gateway.api_base_url,
        version = settings.gateway.version,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;
    application.run_until_stopped().await?;

    info!("Gateway Relay stopped");
    Ok(())
}
