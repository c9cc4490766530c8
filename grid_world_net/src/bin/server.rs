use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use grid_world_core::config::GameConfig;
use grid_world_net::{init_tracing, session::serve};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Grid world game server", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: PathBuf,

    /// Disable the per-step delay configured by `speed`
    #[arg(short, long)]
    test_speed: bool,

    /// Address to bind, overrides the config
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides the config
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    // Configuration errors are fatal before any session starts.
    let config = GameConfig::from_file(&args.config)
        .with_context(|| format!("Invalid configuration {}", args.config.display()))?;

    let host = args.host.clone().unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);
    let step_delay = if args.test_speed {
        Duration::ZERO
    } else {
        config.step_delay()
    };

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    info!(
        addr = %listener.local_addr()?,
        world = %format!("{}x{}", config.world.size_x, config.world.size_y),
        max_steps = config.max_steps,
        ?step_delay,
        "Serving"
    );

    tokio::select! {
        result = serve(listener, Arc::new(config), step_delay) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
