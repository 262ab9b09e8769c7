//! Learning rate schedules.
//!
//! Every optimizer owns its own schedule and evaluates it at its own step
//! count, so the outer and task optimizers never share schedule state.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::{MAMLError, Result};

/// A learning rate that varies with the optimizer step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningRateSchedule {
    /// `initial_rate * decay_rate ^ (step / decay_steps)`
    ExponentialDecay {
        initial_rate: f64,
        decay_rate: f64,
        decay_steps: u64,
        /// Decay in discrete intervals instead of continuously
        #[serde(default)]
        staircase: bool,
    },
    /// Polynomial interpolation from `initial_rate` to `final_rate` over `decay_steps`
    PolynomialDecay {
        initial_rate: f64,
        final_rate: f64,
        decay_steps: u64,
        #[serde(default = "default_power")]
        power: f64,
    },
    /// Linear decay multiplied by a cosine with `num_periods` periods
    LinearCosineDecay {
        initial_rate: f64,
        decay_steps: u64,
        #[serde(default)]
        alpha: f64,
        #[serde(default = "default_beta")]
        beta: f64,
        #[serde(default = "default_num_periods")]
        num_periods: f64,
    },
    /// `initial_rate` until `boundaries[0]`, then `values[i]` from `boundaries[i]` on
    PiecewiseConstant {
        initial_rate: f64,
        boundaries: Vec<u64>,
        values: Vec<f64>,
    },
}

fn default_power() -> f64 {
    1.0
}

fn default_beta() -> f64 {
    0.001
}

fn default_num_periods() -> f64 {
    0.5
}

impl LearningRateSchedule {
    /// Learning rate to use for the update with index `step` (0-based)
    pub fn rate(&self, step: i64) -> f64 {
        let step = step.max(0) as f64;
        match self {
            Self::ExponentialDecay {
                initial_rate,
                decay_rate,
                decay_steps,
                staircase,
            } => {
                let mut exponent = step / *decay_steps as f64;
                if *staircase {
                    exponent = exponent.floor();
                }
                initial_rate * decay_rate.powf(exponent)
            }
            Self::PolynomialDecay {
                initial_rate,
                final_rate,
                decay_steps,
                power,
            } => {
                let decay_steps = *decay_steps as f64;
                let fraction = 1.0 - step.min(decay_steps) / decay_steps;
                (initial_rate - final_rate) * fraction.powf(*power) + final_rate
            }
            Self::LinearCosineDecay {
                initial_rate,
                decay_steps,
                alpha,
                beta,
                num_periods,
            } => {
                let decay_steps = *decay_steps as f64;
                let step = step.min(decay_steps);
                let linear = (decay_steps - step) / decay_steps;
                let cosine = 0.5 * (1.0 + (PI * 2.0 * num_periods * step / decay_steps).cos());
                initial_rate * ((alpha + linear) * cosine + beta)
            }
            Self::PiecewiseConstant {
                initial_rate,
                boundaries,
                values,
            } => boundaries
                .iter()
                .zip(values)
                .take_while(|(boundary, _)| step >= **boundary as f64)
                .last()
                .map(|(_, value)| *value)
                .unwrap_or(*initial_rate),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ExponentialDecay { decay_steps, .. }
            | Self::PolynomialDecay { decay_steps, .. }
            | Self::LinearCosineDecay { decay_steps, .. } => {
                if *decay_steps == 0 {
                    return Err(MAMLError::InvalidParameter(
                        "decay_steps must be > 0".into(),
                    ));
                }
            }
            Self::PiecewiseConstant {
                boundaries, values, ..
            } => {
                if boundaries.len() != values.len() {
                    return Err(MAMLError::InvalidParameter(format!(
                        "piecewise schedule has {} boundaries but {} values",
                        boundaries.len(),
                        values.len()
                    )));
                }
                if boundaries.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(MAMLError::InvalidParameter(
                        "piecewise boundaries must be strictly increasing".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
