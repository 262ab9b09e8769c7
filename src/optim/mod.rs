//! Optimizers used by `MetaLearner`.
//!
//! An optimizer is built from an [`OptimizerConfig`] and bound to a list of
//! parameter tensors. It updates them in place from explicitly supplied
//! gradients, so the caller decides how gradients are accumulated. Undefined
//! gradients (parameters the loss does not depend on) are skipped.

pub mod adam;
pub mod schedule;
pub mod sgd;

use serde::{Deserialize, Serialize};
use tch::Tensor;

use crate::{MAMLError, Result};

pub use adam::Adam;
pub use schedule::LearningRateSchedule;
pub use sgd::GradientDescent;

/// A parameter update rule bound to a fixed list of parameters
pub trait Optimizer {
    /// Apply one update using one gradient per bound parameter
    fn step(&mut self, grads: &[Tensor]) -> Result<()>;

    /// Learning rate the next step will use
    fn learning_rate(&self) -> f64;

    /// Number of steps taken so far
    fn num_steps(&self) -> i64;

    /// Snapshot of the internal state (step count, moment buffers, ...)
    fn state(&self) -> OptimizerState;

    /// Check that `state` fits this optimizer without modifying anything
    fn check_state(&self, state: &OptimizerState) -> Result<()>;

    /// Restore a snapshot produced by [`Optimizer::state`]
    fn load_state(&mut self, state: &OptimizerState) -> Result<()>;
}

/// Internal state of an optimizer
#[derive(Debug)]
pub struct OptimizerState {
    /// Steps taken
    pub step: i64,
    /// Named state tensors
    pub tensors: Vec<(String, Tensor)>,
}

impl OptimizerState {
    pub fn new(step: i64) -> Self {
        Self {
            step,
            tensors: Vec::new(),
        }
    }

    pub fn tensor(&self, name: &str) -> Result<&Tensor> {
        self.tensors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
            .ok_or_else(|| MAMLError::Checkpoint(format!("missing optimizer tensor '{}'", name)))
    }
}

/// Constant learning rate or a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LearningRate {
    Constant(f64),
    Schedule(LearningRateSchedule),
}

impl LearningRate {
    /// Rate for the update with index `step`
    pub fn at(&self, step: i64) -> f64 {
        match self {
            Self::Constant(rate) => *rate,
            Self::Schedule(schedule) => schedule.rate(step),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Constant(rate) if !rate.is_finite() || *rate < 0.0 => Err(
                MAMLError::InvalidParameter(format!("learning rate must be >= 0, got {}", rate)),
            ),
            Self::Constant(_) => Ok(()),
            Self::Schedule(schedule) => schedule.validate(),
        }
    }
}

impl From<f64> for LearningRate {
    fn from(rate: f64) -> Self {
        Self::Constant(rate)
    }
}

impl From<LearningRateSchedule> for LearningRate {
    fn from(schedule: LearningRateSchedule) -> Self {
        Self::Schedule(schedule)
    }
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam {
        learning_rate: LearningRate,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    },
    GradientDescent {
        learning_rate: LearningRate,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::adam(0.001)
    }
}

impl OptimizerConfig {
    /// Adam with the usual moment decay rates
    pub fn adam(learning_rate: impl Into<LearningRate>) -> Self {
        Self::Adam {
            learning_rate: learning_rate.into(),
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    /// Plain gradient descent
    pub fn gradient_descent(learning_rate: impl Into<LearningRate>) -> Self {
        Self::GradientDescent {
            learning_rate: learning_rate.into(),
        }
    }

    pub fn learning_rate(&self) -> &LearningRate {
        match self {
            Self::Adam { learning_rate, .. } | Self::GradientDescent { learning_rate } => {
                learning_rate
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.learning_rate().validate()?;
        if let Self::Adam {
            beta1,
            beta2,
            epsilon,
            ..
        } = self
        {
            for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
                if !(0.0..1.0).contains(beta) {
                    return Err(MAMLError::InvalidParameter(format!(
                        "{} must be in [0, 1), got {}",
                        name, beta
                    )));
                }
            }
            if *epsilon <= 0.0 {
                return Err(MAMLError::InvalidParameter("epsilon must be > 0".into()));
            }
        }
        Ok(())
    }

    /// Build an optimizer bound to `params`
    pub fn build(&self, params: Vec<Tensor>) -> Result<Box<dyn Optimizer>> {
        self.validate()?;
        Ok(match self {
            Self::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(
                params,
                learning_rate.clone(),
                *beta1,
                *beta2,
                *epsilon,
            )),
            Self::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(params, learning_rate.clone()))
            }
        })
    }
}

pub(crate) fn check_gradients(params: &[Tensor], grads: &[Tensor]) -> Result<()> {
    if params.len() != grads.len() {
        return Err(MAMLError::InvalidParameter(format!(
            "expected {} gradients, got {}",
            params.len(),
            grads.len()
        )));
    }
    for (i, (p, g)) in params.iter().zip(grads).enumerate() {
        if g.defined() && p.size() != g.size() {
            return Err(MAMLError::InvalidParameter(format!(
                "gradient {} has shape {:?}, parameter has {:?}",
                i,
                g.size(),
                p.size()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn test_learning_rate_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            optimizer: OptimizerConfig,
        }

        let constant: Wrapper = toml::from_str(
            "[optimizer]\ntype = \"gradient_descent\"\nlearning_rate = 0.5\n",
        )
        .unwrap();
        assert_eq!(constant.optimizer, OptimizerConfig::gradient_descent(0.5));

        let scheduled: Wrapper = toml::from_str(
            "[optimizer]\ntype = \"adam\"\nbeta1 = 0.9\nbeta2 = 0.999\nepsilon = 1e-8\n\
             [optimizer.learning_rate]\ntype = \"exponential_decay\"\ninitial_rate = 0.01\n\
             decay_rate = 0.9\ndecay_steps = 100\n",
        )
        .unwrap();
        assert!(matches!(
            scheduled.optimizer.learning_rate(),
            LearningRate::Schedule(LearningRateSchedule::ExponentialDecay { .. })
        ));
    }

    #[test]
    fn test_validate() {
        assert!(OptimizerConfig::default().validate().is_ok());
        assert!(OptimizerConfig::gradient_descent(-1.0).validate().is_err());
        let bad = OptimizerConfig::Adam {
            learning_rate: 0.1.into(),
            beta1: 1.0,
            beta2: 0.999,
            epsilon: 1e-8,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_check_gradients() {
        let params = vec![Tensor::zeros([2, 3], (Kind::Float, Device::Cpu))];
        assert!(check_gradients(&params, &[Tensor::ones([2, 3], (Kind::Float, Device::Cpu))]).is_ok());
        assert!(check_gradients(&params, &[Tensor::ones([3], (Kind::Float, Device::Cpu))]).is_err());
        assert!(check_gradients(&params, &[]).is_err());
    }
}
