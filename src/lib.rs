//! # MAML Meta-Learning
//!
//! This crate implements the Model-Agnostic Meta-Learning (MAML) algorithm
//! (Finn et al., 2017). MAML learns an initialization for a model's parameters
//! such that a few gradient steps on a new task produce a low loss on that task.
//!
//! ## Features
//!
//! - Full second-order MAML: the meta-gradient flows through the inner-loop updates
//! - Optionally learnable inner learning rate
//! - Pluggable outer optimizers (Adam, gradient descent) with learning rate schedules
//! - Rotating on-disk checkpoints with complete optimizer state
//! - Automatic CUDA / MPS / CPU device selection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use maml_meta::prelude::*;
//!
//! fn main() -> maml_meta::Result<()> {
//!     let learner = SineRegression::new(SineConfig::default())?;
//!     let config = MAMLConfig::default().with_inner_learning_rate(0.01);
//!     let mut maml = MetaLearner::new(learner, config)?;
//!
//!     maml.fit(&FitConfig::new(1000))?;
//!
//!     maml.task_model_mut().set_task(2.0, 0.5);
//!     maml.train_on_current_task(5, false)?;
//!     Ok(())
//! }
//! ```

pub mod maml;
pub mod model;
pub mod optim;
pub mod utils;

pub use maml::algorithm::{FitReport, MetaBatch, MetaLearner, MetaLoss};
pub use maml::checkpoint::{get_checkpoints, CheckpointRecord};
pub use maml::config::{FitConfig, MAMLConfig};
pub use model::sine::{SineConfig, SineRegression};
pub use model::task::{LearnerState, TaskModel};
pub use optim::{LearningRate, LearningRateSchedule, Optimizer, OptimizerConfig, OptimizerState};
pub use utils::config::Config;
pub use utils::device::{select_device, DeviceChoice};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::maml::algorithm::{FitReport, MetaLearner};
    pub use crate::maml::config::{FitConfig, MAMLConfig};
    pub use crate::model::sine::{SineConfig, SineRegression};
    pub use crate::model::task::{LearnerState, TaskModel};
    pub use crate::optim::{LearningRate, LearningRateSchedule, OptimizerConfig};
    pub use crate::utils::device::DeviceChoice;
}

use std::path::PathBuf;

/// Error types for the crate
#[derive(thiserror::Error, Debug)]
pub enum MAMLError {
    #[error("No checkpoint found in {}", .0.display())]
    NoCheckpoint(PathBuf),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tensor error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MAMLError>;
