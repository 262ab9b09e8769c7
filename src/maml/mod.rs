//! MAML meta-learning: the learner, its configuration and checkpoint storage

pub mod algorithm;
pub mod checkpoint;
pub mod config;

pub use algorithm::{FitReport, MetaBatch, MetaLearner, MetaLoss};
pub use checkpoint::{get_checkpoints, latest_checkpoint, CheckpointRecord, MAX_CHECKPOINT_SLOTS};
pub use config::{FitConfig, MAMLConfig};
