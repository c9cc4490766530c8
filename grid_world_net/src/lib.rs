//! Network front-end of the grid world: the per-connection session server and
//! the agent-side control loop.

use tracing_subscriber::EnvFilter;

pub mod client;
pub mod session;

/// Installs the fmt subscriber, honoring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
