//! Submit Command

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use locheal_common::{FailureReport, HealingStatus};
use tracing::debug;

use super::{queue::print_items, Context};
use crate::output::{print_error, print_success, print_warning, OutputFormat};

#[derive(Args)]
pub struct SubmitArgs {
    /// Failure report JSON files
    #[arg(required = true)]
    pub reports: Vec<PathBuf>,

    /// Replacement locator to apply instead of searching
    #[arg(long = "override", value_name = "LOCATOR")]
    pub manual_locator: Option<String>,
}

fn load_report(path: &Path) -> Result<FailureReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub async fn execute(args: SubmitArgs, ctx: &Context) -> Result<()> {
    let coordinator = ctx.coordinator()?;

    let mut tasks = Vec::with_capacity(args.reports.len());
    for path in args.reports {
        let coordinator = coordinator.clone();
        let manual = args.manual_locator.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let report = load_report(&path)?;
            debug!("Submitting {} ({})", path.display(), report.test_id);
            let item = match manual {
                Some(locator) => coordinator.submit_with_override(report, &locator)?,
                None => coordinator.submit_failure(report)?,
            };
            Ok::<_, anyhow::Error>(item)
        }));
    }

    let mut items = Vec::new();
    let mut errors = 0;
    for task in tasks {
        match task.await? {
            Ok(item) => items.push(item),
            Err(e) => {
                errors += 1;
                print_error(&format!("{:#}", e));
            }
        }
    }

    if matches!(ctx.format, OutputFormat::Table) {
        let healed = items
            .iter()
            .filter(|i| i.status == HealingStatus::Healed)
            .count();
        if healed > 0 {
            print_success(&format!("Healed {} of {} failure(s)", healed, items.len()));
        }
        for item in items.iter().filter(|i| i.status == HealingStatus::Failed) {
            print_warning(&format!(
                "{} not healed: {}",
                item.test_name,
                item.last_error.as_deref().unwrap_or("no reason recorded")
            ));
        }
    }
    print_items(&items, ctx.format);

    if errors > 0 {
        anyhow::bail!("{} report(s) could not be processed", errors);
    }
    Ok(())
}
