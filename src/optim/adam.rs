//! Adam optimizer (Kingma & Ba, 2015) with bias correction.

use tch::Tensor;

use super::{check_gradients, LearningRate, Optimizer, OptimizerState};
use crate::model::task::assign;
use crate::{MAMLError, Result};

/// Adam bound to a fixed parameter list
#[derive(Debug)]
pub struct Adam {
    params: Vec<Tensor>,
    learning_rate: LearningRate,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    /// First moment estimates
    m: Vec<Tensor>,
    /// Second moment estimates
    v: Vec<Tensor>,
    step: i64,
}

impl Adam {
    pub fn new(
        params: Vec<Tensor>,
        learning_rate: LearningRate,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    ) -> Self {
        let m = params.iter().map(|p| p.detach().zeros_like()).collect();
        let v = params.iter().map(|p| p.detach().zeros_like()).collect();
        Self {
            params,
            learning_rate,
            beta1,
            beta2,
            epsilon,
            m,
            v,
            step: 0,
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, grads: &[Tensor]) -> Result<()> {
        check_gradients(&self.params, grads)?;

        let lr = self.learning_rate();
        self.step += 1;
        let bias1 = 1.0 - self.beta1.powf(self.step as f64);
        let bias2 = 1.0 - self.beta2.powf(self.step as f64);

        tch::no_grad(|| {
            for (i, grad) in grads.iter().enumerate() {
                if !grad.defined() {
                    continue;
                }
                let grad = grad.detach();
                self.m[i] *= self.beta1;
                self.m[i] += &grad * (1.0 - self.beta1);
                self.v[i] *= self.beta2;
                self.v[i] += grad.square() * (1.0 - self.beta2);

                let denom = (&self.v[i] / bias2).sqrt() + self.epsilon;
                let update = (&self.m[i] / bias1) / denom * lr;
                self.params[i] -= update;
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
        let mut state = OptimizerState::new(self.step);
        for (i, (m, v)) in self.m.iter().zip(&self.v).enumerate() {
            state.tensors.push((format!("m.{}", i), m.copy()));
            state.tensors.push((format!("v.{}", i), v.copy()));
        }
        state
    }

    fn check_state(&self, state: &OptimizerState) -> Result<()> {
        self.moments(state).map(|_| ())
    }

    fn load_state(&mut self, state: &OptimizerState) -> Result<()> {
        let pairs = self.moments(state)?;
        for (dst, src) in pairs {
            assign(dst, src)?;
        }
        self.step = state.step;
        Ok(())
    }
}

impl Adam {
    /// Pair every moment buffer with its stored value, checking count and shapes
    fn moments<'a>(&'a self, state: &'a OptimizerState) -> Result<Vec<(&'a Tensor, &'a Tensor)>> {
        let expected = 2 * self.params.len();
        if state.tensors.len() != expected {
            return Err(MAMLError::Checkpoint(format!(
                "Adam state has {} tensors, expected {}",
                state.tensors.len(),
                expected
            )));
        }
        let m = (0..self.params.len())
            .map(|i| state.tensor(&format!("m.{}", i)))
            .collect::<Result<Vec<_>>>()?;
        let v = (0..self.params.len())
            .map(|i| state.tensor(&format!("v.{}", i)))
            .collect::<Result<Vec<_>>>()?;

        let pairs: Vec<(&Tensor, &Tensor)> = self.m.iter().zip(m).chain(self.v.iter().zip(v)).collect();
        if let Some((dst, src)) = pairs.iter().find(|(dst, src)| dst.size() != src.size()) {
            return Err(MAMLError::Checkpoint(format!(
                "Adam moment has shape {:?}, expected {:?}",
                src.size(),
                dst.size()
            )));
        }
        Ok(pairs)
    }
}
