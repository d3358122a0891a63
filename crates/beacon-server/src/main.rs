//! # Beacon Server
//!
//! Presence and message fanout server for chat applications.
//!
//! ## Usage
//!
//! ```bash
//! # Run with beacon.toml from the working directory
//! BEACON_AUTH__JWT_SECRET=change-me beacon
//!
//! # Run with a specific config file
//! beacon --config /path/to/beacon.toml
//!
//! # Override settings with environment variables
//! BEACON_PORT=9000 BEACON_LIMITS__MAX_CONTENT_CHARS=2000 beacon
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.iter().position(|arg| arg == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
            config::Config::from_file(path)?
        }
        None => config::Config::load()?,
    };

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
