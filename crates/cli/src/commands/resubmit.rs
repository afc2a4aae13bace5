//! Resubmit Command

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use locheal_engine::ResubmitRequest;

use super::{queue::print_item_details, Context};

#[derive(Args)]
pub struct ResubmitArgs {
    /// Item ID
    pub id: String,

    /// Fresher DOM snapshot (HTML file)
    #[arg(long, value_name = "FILE")]
    pub dom: Option<PathBuf>,

    /// Replacement locator chosen by a reviewer
    #[arg(long = "override", value_name = "LOCATOR")]
    pub manual_locator: Option<String>,
}

pub async fn execute(args: ResubmitArgs, ctx: &Context) -> Result<()> {
    let coordinator = ctx.coordinator()?;

    let dom_snapshot = match &args.dom {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };
    let request = ResubmitRequest {
        dom_snapshot,
        manual_locator: args.manual_locator,
    };

    let id = args.id;
    let worker = coordinator.clone();
    let item = tokio::task::spawn_blocking(move || worker.resubmit(&id, request)).await??;

    print_item_details(&item, coordinator.config().max_attempts, ctx.format);
    Ok(())
}
