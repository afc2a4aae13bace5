//! Pattern Commands

use anyhow::Result;
use clap::Subcommand;
use locheal_common::HealingPattern;
use serde::Serialize;

use super::Context;
use crate::output::{
    format_confidence, format_timestamp, print_details, print_list, print_success, OutputFormat,
    TableDisplay,
};

#[derive(Subcommand)]
pub enum PatternCommands {
    /// List learned patterns
    List,

    /// Aggregate pattern statistics
    Stats,

    /// Delete patterns unused for a number of days
    Cleanup {
        /// Retention window; defaults to the configured value
        #[arg(short, long)]
        days: Option<u32>,
    },
}

/// Pattern display wrapper for serialization
#[derive(Serialize)]
pub struct PatternDisplay {
    pub test_kind: String,
    pub page_context: String,
    pub original_locator: String,
    pub healed_locator: String,
    pub confidence: f64,
    pub success_count: i64,
    pub last_used: i64,
}

impl From<&HealingPattern> for PatternDisplay {
    fn from(p: &HealingPattern) -> Self {
        Self {
            test_kind: p.test_kind.clone(),
            page_context: p.page_context.clone(),
            original_locator: p.original_locator.clone(),
            healed_locator: p.healed_locator.clone(),
            confidence: p.confidence,
            success_count: p.success_count,
            last_used: p.last_used,
        }
    }
}

impl TableDisplay for PatternDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Kind", "Page", "Original", "Healed", "Conf", "Successes", "Last Used"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.test_kind.clone(),
            self.page_context.clone(),
            self.original_locator.clone(),
            self.healed_locator.clone(),
            format_confidence(self.confidence),
            self.success_count.to_string(),
            format_timestamp(self.last_used),
        ]
    }
}

pub async fn execute(cmd: PatternCommands, ctx: &Context) -> Result<()> {
    let coordinator = ctx.coordinator()?;
    let patterns = coordinator.patterns();

    match cmd {
        PatternCommands::List => {
            let displays: Vec<PatternDisplay> =
                patterns.list()?.iter().map(PatternDisplay::from).collect();
            print_list(&displays, ctx.format);
        }

        PatternCommands::Stats => {
            let stats = patterns.stats()?;
            let rows = [
                ("Patterns", stats.patterns.to_string()),
                (
                    "Mean confidence",
                    stats
                        .mean_confidence
                        .map(format_confidence)
                        .unwrap_or_else(|| "-".to_string()),
                ),
                ("Total successes", stats.total_successes.to_string()),
            ];
            print_details(&stats, &rows, ctx.format);
        }

        PatternCommands::Cleanup { days } => {
            let days = days.unwrap_or(coordinator.config().retention_days);
            let removed = patterns.cleanup(days)?;
            match ctx.format {
                OutputFormat::Json => println!(r#"{{"removed": {}}}"#, removed),
                OutputFormat::Table => print_success(&format!(
                    "Removed {} pattern(s) unused for {} day(s)",
                    removed, days
                )),
            }
        }
    }

    Ok(())
}
