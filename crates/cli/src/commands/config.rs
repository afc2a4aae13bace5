//! Config Commands

use anyhow::Result;
use clap::Subcommand;
use locheal_engine::HealingConfig;

use super::Context;
use crate::output::{print_json, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub fn execute(cmd: ConfigCommands, ctx: &Context) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = ctx.config()?;
            match ctx.format {
                OutputFormat::Json => print_json(&config),
                OutputFormat::Table => {
                    println!("# {}", ctx.config_path.display());
                    print!("{}", toml_string(&config)?);
                }
            }
        }

        ConfigCommands::Init { force } => {
            if ctx.config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to overwrite",
                    ctx.config_path.display()
                );
            }
            HealingConfig::default().save(&ctx.config_path)?;
            print_success(&format!("Wrote {}", ctx.config_path.display()));
        }
    }

    Ok(())
}

fn toml_string(config: &HealingConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
