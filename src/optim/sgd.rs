//! Plain gradient descent: `p -= lr * g`.

use tch::Tensor;

use super::{check_gradients, LearningRate, Optimizer, OptimizerState};
use crate::{MAMLError, Result};

/// Gradient descent bound to a fixed parameter list
#[derive(Debug)]
pub struct GradientDescent {
    params: Vec<Tensor>,
    learning_rate: LearningRate,
    step: i64,
}

impl GradientDescent {
    pub fn new(params: Vec<Tensor>, learning_rate: LearningRate) -> Self {
        Self {
            params,
            learning_rate,
            step: 0,
        }
    }

    pub fn set_learning_rate(&mut self, learning_rate: LearningRate) {
        self.learning_rate = learning_rate;
    }
}

impl Optimizer for GradientDescent {
    fn step(&mut self, grads: &[Tensor]) -> Result<()> {
        check_gradients(&self.params, grads)?;

        let lr = self.learning_rate();
        self.step += 1;
        tch::no_grad(|| {
            for (param, grad) in self.params.iter_mut().zip(grads) {
                if grad.defined() {
                    *param -= grad.detach() * lr;
                }
            }
        });
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate.at(self.step)
    }

    fn num_steps(&self) -> i64 {
        self.step
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::new(self.step)
    }

    fn check_state(&self, state: &OptimizerState) -> Result<()> {
        if !state.tensors.is_empty() {
            return Err(MAMLError::Checkpoint(format!(
                "gradient descent state has no tensors, got {}",
                state.tensors.len()
            )));
        }
        Ok(())
    }

    fn load_state(&mut self, state: &OptimizerState) -> Result<()> {
        self.check_state(state)?;
        self.step = state.step;
        Ok(())
    }
}
