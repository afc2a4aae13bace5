//! locheal CLI - Main Entry Point
//!
//! Submits failure reports to the healing engine and inspects the queue
//! and the learned patterns kept in the local record store.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{config, confirm, maintain, patterns, queue, resubmit, submit, Context};

/// locheal - self-healing locator recovery for UI tests
#[derive(Parser)]
#[command(name = "locheal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Record store database
    #[arg(long, env = "LOCHEAL_DB", global = true)]
    db: Option<PathBuf>,

    /// Configuration file
    #[arg(long, env = "LOCHEAL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit failure reports for healing
    Submit(submit::SubmitArgs),

    /// Send a failed or interrupted item through analysis again
    Resubmit(resubmit::ResubmitArgs),

    /// Report whether a healed locator worked on re-run
    Confirm(confirm::ConfirmArgs),

    /// Inspect the healing queue
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Inspect and prune learned patterns
    #[command(subcommand)]
    Patterns(patterns::PatternCommands),

    /// Run the pattern retention loop until interrupted
    Maintain(maintain::MaintainArgs),

    /// Show or create the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let ctx = Context::new(
        cli.db.unwrap_or_else(locheal_common::default_db_path),
        cli.config.unwrap_or_else(locheal_common::default_config_path),
        cli.format,
    );

    match cli.command {
        Commands::Submit(args) => submit::execute(args, &ctx).await?,
        Commands::Resubmit(args) => resubmit::execute(args, &ctx).await?,
        Commands::Confirm(args) => confirm::execute(args, &ctx).await?,
        Commands::Queue(cmd) => queue::execute(cmd, &ctx).await?,
        Commands::Patterns(cmd) => patterns::execute(cmd, &ctx).await?,
        Commands::Maintain(args) => maintain::execute(args, &ctx).await?,
        Commands::Config(cmd) => config::execute(cmd, &ctx)?,
        Commands::Version => {
            println!("locheal v{}", locheal_common::VERSION);
        }
    }

    Ok(())
}
