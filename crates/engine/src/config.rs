//! Engine configuration

use locheal_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::scorer::ScoringWeights;

/// Healing engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Minimum score for applying a candidate without a human
    pub auto_apply_threshold: f64,

    /// Analysis passes an item gets before it stays failed
    pub max_attempts: u32,

    /// Candidates kept after merging
    pub max_candidates: usize,

    /// Candidates under this confidence are suggestions only
    pub viable_candidate_floor: f64,

    /// Confidence recorded for a manually chosen locator
    pub manual_override_confidence: f64,

    /// Patterns unused for this many days are purged
    pub retention_days: u32,

    /// Interval of the background retention loop
    pub cleanup_interval_secs: u64,

    /// Snapshots larger than this are treated as unparsable
    pub max_snapshot_bytes: usize,

    pub scoring: ScoringWeights,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            auto_apply_threshold: 0.7,
            max_attempts: 3,
            max_candidates: 5,
            viable_candidate_floor: 0.4,
            manual_override_confidence: 0.95,
            retention_days: 30,
            cleanup_interval_secs: 3600,
            max_snapshot_bytes: 5 * 1024 * 1024,
            scoring: ScoringWeights::default(),
        }
    }
}

impl HealingConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("auto_apply_threshold", self.auto_apply_threshold),
            ("viable_candidate_floor", self.viable_candidate_floor),
            ("manual_override_confidence", self.manual_override_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.max_candidates == 0 {
            return Err(Error::InvalidConfig("max_candidates must be at least 1".into()));
        }
        if self.max_snapshot_bytes == 0 {
            return Err(Error::InvalidConfig("max_snapshot_bytes must be non-zero".into()));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(Error::InvalidConfig("cleanup_interval_secs must be non-zero".into()));
        }

        self.scoring.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HealingConfig::default();
        config.validate().unwrap();
        assert_eq!(config.auto_apply_threshold, 0.7);
        assert_eq!(config.max_candidates, 5);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HealingConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, HealingConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.toml");

        let config = HealingConfig {
            max_attempts: 5,
            auto_apply_threshold: 0.8,
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(HealingConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_attempts = 7\n\n[scoring]\nbase = 0.25\n").unwrap();

        let config = HealingConfig::load(&path).unwrap();
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.scoring.base, 0.25);
        assert_eq!(config.max_candidates, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = HealingConfig {
            auto_apply_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = HealingConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_attempts = \"many\"").unwrap();
        assert!(matches!(HealingConfig::load(&path), Err(Error::InvalidConfig(_))));
    }
}
