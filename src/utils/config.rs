//! Configuration management
//!
//! Unified configuration file for the `maml` binary: learner, training run
//! and sine task family.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::maml::config::{FitConfig, MAMLConfig};
use crate::model::sine::SineConfig;
use crate::optim::OptimizerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Meta-learner configuration
    pub maml: MAMLConfig,
    /// Meta-training run configuration
    pub fit: FitConfig,
    /// Task family configuration
    #[serde(default)]
    pub task: SineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maml: MAMLConfig::default()
                .with_inner_learning_rate(0.01)
                .with_meta_batch_size(10)
                .with_optimizer(OptimizerConfig::adam(0.001))
                .with_checkpoint_dir("checkpoints"),
            fit: FitConfig::new(1000),
            task: SineConfig::default(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration, choosing the format from the file extension
    /// (`.json` for JSON, anything else for TOML)
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = if is_json(path) {
            Self::from_json(path)?
        } else {
            Self::from_toml(path)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration, choosing the format from the file extension
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if is_json(path) {
            self.save_json(path)
        } else {
            self.save_toml(path)
        }
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.maml.validate()?;
        self.fit.validate()?;
        self.task.validate()?;

        if self.fit.steps == 0 {
            anyhow::bail!("fit.steps must be > 0");
        }

        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::device::DeviceChoice;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.maml.inner_learning_rate, 0.01);
        assert_eq!(config.fit.steps, 1000);
        assert_eq!(config.task.hidden_size, 40);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.maml.device = DeviceChoice::Cpu;
        config.maml.inner_steps = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.maml, config.maml);
        assert_eq!(loaded.fit, config.fit);
        assert_eq!(loaded.task.seed, config.task.seed);
    }

    #[test]
    fn test_save_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::default();
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.trim_start().starts_with('{'));

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.maml, config.maml);
        assert_eq!(loaded.fit, config.fit);
    }

    #[test]
    fn test_minimal_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("minimal.toml");
        std::fs::write(
            &path,
            r#"
[maml]
inner_learning_rate = 0.05
inner_steps = 2
meta_batch_size = 4

[fit]
steps = 10
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.maml.inner_steps, 2);
        assert_eq!(config.maml.optimizer, OptimizerConfig::adam(0.001));
        assert_eq!(config.fit.max_checkpoints_to_keep, 5);
        assert_eq!(config.task.batch_size, 10);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");

        let mut config = Config::default();
        config.fit.steps = 0;
        config.save(&path).unwrap();

        assert!(Config::load(&path).is_err());
    }
}
