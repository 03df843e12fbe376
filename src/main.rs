//! X32 Bridge - Rust implementation
//!
//! Connects to a Behringer X32 digital mixer over OSC/UDP, keeps the
//! session alive, and republishes fader, mute, and meter updates for
//! front-end subscribers.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use x32_bridge::config::BridgeConfig;
use x32_bridge::connection::X32Connection;
use x32_bridge::events::Update;

/// X32 Bridge - control a Behringer X32 mixer from a web surface
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting X32 Bridge...");
    info!("Configuration file: {}", args.config);

    let config = BridgeConfig::load(&args.config).await?;
    let channels = config
        .channel_map()
        .context("Invalid channel mapping in config")?;
    info!(
        "Configuration loaded: console {}:{}, {} mapped channels",
        config.console.host,
        config.console.port,
        config.channels.len()
    );

    let conn = X32Connection::bind(&config.console, channels, config.timing.clone())
        .await
        .context("Failed to bind local OSC socket")?;

    conn.connect()
        .await
        .with_context(|| format!("Could not connect to console at {}", config.console.host))?;

    // Prime the cache and give early subscribers a full picture
    if let Err(e) = conn.request_snapshot().await {
        warn!("Initial snapshot failed: {}", e);
    }

    // Drain the update bus; this is where the front end attaches
    let mut updates = conn.subscribe();

    loop {
        tokio::select! {
            result = updates.recv() => {
                match result {
                    Ok(Update::Fader { channel, value }) => {
                        info!("Fader {} -> {:.3}", channel, value);
                    }
                    Ok(Update::Mute { channel, on }) => {
                        info!("Mute {} -> {}", channel, if on { "on" } else { "muted" });
                    }
                    Ok(Update::Meter { left_db, right_db, .. }) => {
                        debug!("Meters L {:.1} dB / R {:.1} dB", left_db, right_db);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Update consumer lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    conn.shutdown();
    info!("X32 Bridge shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
