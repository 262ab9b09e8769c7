//! MAML configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::checkpoint::MAX_CHECKPOINT_SLOTS;
use crate::optim::OptimizerConfig;
use crate::utils::device::DeviceChoice;
use crate::{MAMLError, Result};

/// Configuration of a `MetaLearner`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MAMLConfig {
    /// Step size of the per-task gradient descent (not the meta-learning rate)
    pub inner_learning_rate: f64,
    /// Meta-learn the inner step size together with the model parameters
    #[serde(default)]
    pub learnable_inner_lr: bool,
    /// Gradient steps performed on each task
    pub inner_steps: usize,
    /// Tasks per meta-update
    pub meta_batch_size: usize,
    /// Checkpoint directory; a temporary directory removed on drop when unset
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Compute device
    #[serde(default)]
    pub device: DeviceChoice,
    /// Outer (meta) optimizer
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl Default for MAMLConfig {
    fn default() -> Self {
        Self {
            inner_learning_rate: 0.001,
            learnable_inner_lr: false,
            inner_steps: 1,
            meta_batch_size: 10,
            checkpoint_dir: None,
            device: DeviceChoice::Auto,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl MAMLConfig {
    pub fn with_inner_learning_rate(mut self, rate: f64) -> Self {
        self.inner_learning_rate = rate;
        self
    }

    pub fn with_learnable_inner_lr(mut self, learnable: bool) -> Self {
        self.learnable_inner_lr = learnable;
        self
    }

    pub fn with_inner_steps(mut self, steps: usize) -> Self {
        self.inner_steps = steps;
        self
    }

    pub fn with_meta_batch_size(mut self, size: usize) -> Self {
        self.meta_batch_size = size;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_device(mut self, device: DeviceChoice) -> Self {
        self.device = device;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.inner_learning_rate.is_finite() {
            return Err(MAMLError::InvalidParameter(format!(
                "inner_learning_rate must be finite, got {}",
                self.inner_learning_rate
            )));
        }
        if self.inner_steps == 0 {
            return Err(MAMLError::InvalidParameter("inner_steps must be >= 1".into()));
        }
        if self.meta_batch_size == 0 {
            return Err(MAMLError::InvalidParameter("meta_batch_size must be >= 1".into()));
        }
        self.optimizer.validate()
    }
}

/// Arguments of `MetaLearner::fit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Meta-learning steps to perform
    pub steps: usize,
    /// Checkpoint files kept in the rotating ring
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints_to_keep: usize,
    /// Seconds between periodic checkpoints
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: f64,
    /// Restore the most recent checkpoint before training
    #[serde(default)]
    pub restore: bool,
}

fn default_max_checkpoints() -> usize {
    5
}

fn default_checkpoint_interval() -> f64 {
    600.0
}

impl FitConfig {
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            max_checkpoints_to_keep: default_max_checkpoints(),
            checkpoint_interval_secs: default_checkpoint_interval(),
            restore: false,
        }
    }

    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints_to_keep = max;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval_secs = interval.as_secs_f64();
        self
    }

    pub fn with_restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// Interval between periodic checkpoints; values beyond `Duration::MAX` saturate
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.checkpoint_interval_secs).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        validate_max_checkpoints(self.max_checkpoints_to_keep)?;
        if !self.checkpoint_interval_secs.is_finite() || self.checkpoint_interval_secs < 0.0 {
            return Err(MAMLError::InvalidParameter(format!(
                "checkpoint_interval_secs must be >= 0, got {}",
                self.checkpoint_interval_secs
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_max_checkpoints(max: usize) -> Result<()> {
    if max == 0 || max > MAX_CHECKPOINT_SLOTS {
        return Err(MAMLError::InvalidParameter(format!(
            "max_checkpoints_to_keep must be in 1..={}, got {}",
            MAX_CHECKPOINT_SLOTS, max
        )));
    }
    Ok(())
}
