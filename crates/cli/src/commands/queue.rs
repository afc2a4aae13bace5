//! Queue Commands

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use locheal_common::{HealingQueueItem, HealingStatus, LocatorCandidate, QueueSummary};
use serde::Serialize;

use super::Context;
use crate::output::{
    format_confidence, format_timestamp, print_details, print_list, status_label, OutputFormat,
    TableDisplay,
};

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queue items
    List {
        /// Only items in this status
        #[arg(short, long)]
        status: Option<StatusArg>,
    },

    /// Show one item with its candidates
    Show {
        /// Item ID
        id: String,
    },

    /// Count items per status
    Summary,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Pending,
    Analyzing,
    Healed,
    Failed,
    BugConfirmed,
}

impl From<StatusArg> for HealingStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => HealingStatus::Pending,
            StatusArg::Analyzing => HealingStatus::Analyzing,
            StatusArg::Healed => HealingStatus::Healed,
            StatusArg::Failed => HealingStatus::Failed,
            StatusArg::BugConfirmed => HealingStatus::BugConfirmed,
        }
    }
}

/// Queue item row
#[derive(Serialize)]
pub struct ItemDisplay {
    pub id: String,
    pub test: String,
    pub status: HealingStatus,
    pub classification: String,
    pub failing_locator: Option<String>,
    pub chosen_locator: Option<String>,
    pub confidence: f64,
    pub attempts: u32,
}

impl From<&HealingQueueItem> for ItemDisplay {
    fn from(item: &HealingQueueItem) -> Self {
        Self {
            id: item.id.clone(),
            test: item.test_name.clone(),
            status: item.status,
            classification: item
                .classification
                .as_ref()
                .map(|c| c.label())
                .unwrap_or_default(),
            failing_locator: item.failing_locator.clone(),
            chosen_locator: item.chosen_locator.clone(),
            confidence: item.confidence,
            attempts: item.attempts,
        }
    }
}

impl TableDisplay for ItemDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "ID", "Test", "Status", "Class", "Locator", "Healed To", "Conf", "Tries",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.test.clone(),
            status_label(self.status),
            self.classification.clone(),
            self.failing_locator.clone().unwrap_or_else(|| "-".to_string()),
            self.chosen_locator.clone().unwrap_or_else(|| "-".to_string()),
            format_confidence(self.confidence),
            self.attempts.to_string(),
        ]
    }
}

#[derive(Serialize)]
struct CandidateDisplay {
    locator: String,
    confidence: f64,
    heuristic: String,
}

impl From<&LocatorCandidate> for CandidateDisplay {
    fn from(candidate: &LocatorCandidate) -> Self {
        Self {
            locator: candidate.locator.clone(),
            confidence: candidate.confidence,
            heuristic: candidate.heuristic.to_string(),
        }
    }
}

impl TableDisplay for CandidateDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Candidate", "Conf", "Heuristic"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.locator.clone(),
            format_confidence(self.confidence),
            self.heuristic.clone(),
        ]
    }
}

pub fn print_items(items: &[HealingQueueItem], format: OutputFormat) {
    let displays: Vec<ItemDisplay> = items.iter().map(ItemDisplay::from).collect();
    print_list(&displays, format);
}

/// Full view of one item
pub fn print_item_details(item: &HealingQueueItem, max_attempts: u32, format: OutputFormat) {
    let optional = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let rows = [
        ("ID", item.id.clone()),
        ("Test", format!("{} ({})", item.test_name, item.test_id)),
        ("Kind", item.test_kind.clone()),
        ("Page", item.page_context.clone()),
        ("Status", status_label(item.status)),
        (
            "Classification",
            item.classification
                .as_ref()
                .map(|c| format!("{}: {}", c.label(), c.description))
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("Failing locator", optional(&item.failing_locator)),
        ("Chosen locator", optional(&item.chosen_locator)),
        (
            "Source",
            item.heal_source
                .map(|s| format!("{:?}", s))
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("Confidence", format_confidence(item.confidence)),
        (
            "Attempts",
            format!("{} ({} left)", item.attempts, item.retries_left(max_attempts)),
        ),
        ("Last error", optional(&item.last_error)),
        ("Created", format_timestamp(item.created_at)),
        ("Updated", format_timestamp(item.updated_at)),
    ];
    print_details(item, &rows, format);

    if matches!(format, OutputFormat::Table) && !item.candidates.is_empty() {
        let candidates: Vec<CandidateDisplay> =
            item.candidates.iter().map(CandidateDisplay::from).collect();
        print_list(&candidates, format);
    }
}

fn print_summary(summary: &QueueSummary, format: OutputFormat) {
    let rows = [
        ("Total", summary.total.to_string()),
        ("Pending", summary.pending.to_string()),
        ("Analyzing", summary.analyzing.to_string()),
        ("Healed", summary.healed.to_string()),
        ("Failed", summary.failed.to_string()),
        ("Bug confirmed", summary.bug_confirmed.to_string()),
        (
            "Mean healed confidence",
            summary
                .mean_healed_confidence
                .map(format_confidence)
                .unwrap_or_else(|| "-".to_string()),
        ),
    ];
    print_details(summary, &rows, format);
}

pub async fn execute(cmd: QueueCommands, ctx: &Context) -> Result<()> {
    let coordinator = ctx.coordinator()?;

    match cmd {
        QueueCommands::List { status } => {
            let items = coordinator.list_items(status.map(HealingStatus::from))?;
            print_items(&items, ctx.format);
        }

        QueueCommands::Show { id } => {
            let item = coordinator.get_item(&id)?;
            print_item_details(&item, coordinator.config().max_attempts, ctx.format);
        }

        QueueCommands::Summary => {
            print_summary(&coordinator.queue_summary()?, ctx.format);
        }
    }

    Ok(())
}
