//! Maintain Command
//!
//! Runs pattern retention on a fixed interval until Ctrl-C.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::{error, info};

use super::Context;
use crate::output::print_info;

#[derive(Args)]
pub struct MaintainArgs {
    /// Seconds between cleanup passes; defaults to the configured value
    #[arg(long)]
    pub interval: Option<u64>,
}

pub async fn execute(args: MaintainArgs, ctx: &Context) -> Result<()> {
    let coordinator = ctx.coordinator()?;
    let secs = args
        .interval
        .unwrap_or(coordinator.config().cleanup_interval_secs)
        .max(1);

    print_info(&format!(
        "Pruning patterns older than {} day(s) every {}s, Ctrl-C to stop",
        coordinator.config().retention_days,
        secs
    ));

    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let worker = coordinator.clone();
                match tokio::task::spawn_blocking(move || worker.run_cleanup()).await? {
                    Ok(removed) => info!("Cleanup pass removed {} pattern(s)", removed),
                    Err(e) => error!("Cleanup pass failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
