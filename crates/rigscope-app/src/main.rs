use std::path::PathBuf;

use anyhow::{Context, Result};
use rigscope_core::RigConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=debug for per-chunk detail
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("RigScope Receiver v{}", env!("CARGO_PKG_VERSION"));

    // First argument wins over RIGSCOPE_CONFIG
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = RigConfig::load(path.as_deref()).context("loading rig configuration")?;

    match app::run(config).await {
        Ok(()) => {
            info!("RigScope Receiver exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}
