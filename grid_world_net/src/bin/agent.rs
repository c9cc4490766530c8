use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use grid_world_core::{
    agent::{GreedyAgent, QLearningAgent},
    checkpoint::{Checkpointer, load_tables},
    config::GameConfig,
};
use grid_world_net::{client::run_agent, init_tracing};
use tokio::{io::BufReader, net::TcpStream, sync::watch};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Q-learning agent for the grid world server", long_about = None)]
struct Args {
    /// Game server address
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Game server port
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Configuration file holding the agent hyperparameters
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: PathBuf,

    /// Pre-trained tables to replay greedily; disables exploration and learning
    #[arg(long, value_name = "TABLES_FILE")]
    policy: Option<PathBuf>,

    /// Stop after this many episodes
    #[arg(short, long)]
    episodes: Option<u64>,

    /// Seed for exploration
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for table checkpoints
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = GameConfig::from_file(&args.config)
        .with_context(|| format!("Invalid configuration {}", args.config.display()))?;

    let stream = TcpStream::connect((args.server.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to connect to {}:{}", args.server, args.port))?;
    info!(peer = %stream.peer_addr()?, "Connected");
    let (read, write) = stream.into_split();

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });

    let result = match &args.policy {
        Some(path) => {
            let tables = load_tables(path)
                .with_context(|| format!("Failed to load tables from {}", path.display()))?;
            if tables.num_states() != config.num_states() {
                warn!(
                    tables = tables.num_states(),
                    world = config.num_states(),
                    "Loaded tables do not match the configured world"
                );
            }
            info!(levels = tables.len(), "Replaying pre-trained tables");
            let mut agent = GreedyAgent::new(tables);
            run_agent(BufReader::new(read), write, &mut agent, args.episodes, stop_rx).await
        }
        None => {
            let checkpointer = Checkpointer::new(&args.checkpoint_dir, config.world.size_x);
            let mut agent = QLearningAgent::new(&config.agent, config.num_states(), args.seed)
                .with_checkpointer(checkpointer);
            run_agent(BufReader::new(read), write, &mut agent, args.episodes, stop_rx).await
        }
    };

    match result {
        Ok(summary) => info!(
            episodes = summary.episodes,
            steps = summary.steps,
            "Agent finished"
        ),
        // I/O failures end the control loop but are not a crash.
        Err(err) => error!("Agent loop ended: {err:#}"),
    }
    Ok(())
}
