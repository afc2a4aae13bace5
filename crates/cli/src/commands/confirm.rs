//! Confirm Command

use anyhow::Result;
use clap::{ArgGroup, Args};

use super::{patterns::PatternDisplay, Context};
use crate::output::{print_info, print_item, OutputFormat};

#[derive(Args)]
#[command(group(ArgGroup::new("outcome").required(true).args(["success", "failure"])))]
pub struct ConfirmArgs {
    /// Item ID
    pub id: String,

    /// The healed locator worked on re-run
    #[arg(long)]
    pub success: bool,

    /// The healed locator did not work on re-run
    #[arg(long)]
    pub failure: bool,
}

pub async fn execute(args: ConfirmArgs, ctx: &Context) -> Result<()> {
    let coordinator = ctx.coordinator()?;

    match coordinator.confirm_outcome(&args.id, args.success)? {
        Some(pattern) => print_item(&PatternDisplay::from(&pattern), ctx.format),
        None if matches!(ctx.format, OutputFormat::Json) => println!("null"),
        None => print_info("No stored pattern matches this item any more"),
    }
    Ok(())
}
