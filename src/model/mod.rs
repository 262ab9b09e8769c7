//! Task models.
//!
//! - `task`: the `TaskModel` trait `MetaLearner` trains through
//! - `sine`: few-shot sine-wave regression

pub mod sine;
pub mod task;

pub use sine::{SineConfig, SineRegression};
pub use task::{assign, LearnerState, TaskModel};
