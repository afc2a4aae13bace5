//! CLI Commands

pub mod config;
pub mod confirm;
pub mod maintain;
pub mod patterns;
pub mod queue;
pub mod resubmit;
pub mod submit;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use locheal_common::SqliteStore;
use locheal_engine::{HealingConfig, HealingCoordinator};
use tracing::debug;

use crate::output::OutputFormat;

/// Paths and settings shared by every command
pub struct Context {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub format: OutputFormat,
}

impl Context {
    pub fn new(db_path: PathBuf, config_path: PathBuf, format: OutputFormat) -> Self {
        Self {
            db_path,
            config_path,
            format,
        }
    }

    pub fn config(&self) -> Result<HealingConfig> {
        HealingConfig::load(&self.config_path)
            .with_context(|| format!("loading config from {}", self.config_path.display()))
    }

    /// Open the record store and build a coordinator over it
    pub fn coordinator(&self) -> Result<Arc<HealingCoordinator>> {
        let config = self.config()?;
        let store = SqliteStore::open(&self.db_path)
            .with_context(|| format!("opening record store {}", self.db_path.display()))?;
        debug!("Using record store {}", self.db_path.display());
        Ok(Arc::new(HealingCoordinator::new(Arc::new(store), config)))
    }
}
