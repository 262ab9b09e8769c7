//! Task model capability trait.
//!
//! A `TaskModel` bundles a model whose loss can be evaluated against arbitrary
//! parameter values with a source of tasks and batches. `MetaLearner` drives
//! meta-training entirely through this trait.

use serde::de::DeserializeOwned;
use tch::{Device, Tensor};

use crate::{MAMLError, Result};

/// Model and data to which MAML can be applied
pub trait TaskModel {
    /// Compute `(loss, outputs)` for a batch of inputs using the given parameter values.
    ///
    /// `parameters` is either the model's own parameter set or the result of one or
    /// more differentiable gradient steps on it, so the loss must be built from
    /// `parameters` and never from the model's stored tensors.
    fn evaluate(
        &self,
        inputs: &[Tensor],
        parameters: &[Tensor],
        training: bool,
    ) -> Result<(Tensor, Vec<Tensor>)>;

    /// Trainable parameters, as shallow clones sharing storage with the model
    fn parameters(&self) -> Vec<Tensor>;

    /// Select a new task to train on
    fn select_task(&mut self);

    /// Draw one batch of inputs for the current task
    fn sample_batch(&mut self) -> Result<Vec<Tensor>>;

    /// Move every tensor owned by the model to `device`
    fn to_device(&mut self, device: Device);

    /// Snapshot of everything needed to rebuild the model
    fn state(&self) -> Result<LearnerState>;

    /// Check that `state` can be loaded without modifying anything.
    ///
    /// The default compares every tensor of the current snapshot with the
    /// tensor of the same name in `state`.
    fn check_state(&self, state: &LearnerState) -> Result<()> {
        for (name, current) in self.state()?.tensors() {
            let stored = state.tensor(name)?;
            if stored.size() != current.size() {
                return Err(MAMLError::Checkpoint(format!(
                    "tensor '{}' has shape {:?}, expected {:?}",
                    name,
                    stored.size(),
                    current.size()
                )));
            }
        }
        Ok(())
    }

    /// Restore a snapshot produced by [`TaskModel::state`].
    ///
    /// Parameter values are copied into the existing storage so that optimizers
    /// bound to [`TaskModel::parameters`] keep working.
    fn load_state(&mut self, state: &LearnerState) -> Result<()>;
}

impl<M: TaskModel + ?Sized> TaskModel for Box<M> {
    fn evaluate(
        &self,
        inputs: &[Tensor],
        parameters: &[Tensor],
        training: bool,
    ) -> Result<(Tensor, Vec<Tensor>)> {
        (**self).evaluate(inputs, parameters, training)
    }

    fn parameters(&self) -> Vec<Tensor> {
        (**self).parameters()
    }

    fn select_task(&mut self) {
        (**self).select_task()
    }

    fn sample_batch(&mut self) -> Result<Vec<Tensor>> {
        (**self).sample_batch()
    }

    fn to_device(&mut self, device: Device) {
        (**self).to_device(device)
    }

    fn state(&self) -> Result<LearnerState> {
        (**self).state()
    }

    fn check_state(&self, state: &LearnerState) -> Result<()> {
        (**self).check_state(state)
    }

    fn load_state(&mut self, state: &LearnerState) -> Result<()> {
        (**self).load_state(state)
    }
}

/// Serializable state of a task model: named tensors plus JSON metadata
#[derive(Debug)]
pub struct LearnerState {
    tensors: Vec<(String, Tensor)>,
    metadata: serde_json::Value,
}

impl LearnerState {
    /// Create an empty state carrying `metadata`
    pub fn new(metadata: serde_json::Value) -> Self {
        Self {
            tensors: Vec::new(),
            metadata,
        }
    }

    /// Record a detached copy of `tensor` under `name`
    pub fn push(&mut self, name: impl Into<String>, tensor: &Tensor) {
        self.tensors.push((name.into(), tensor.detach().copy()));
    }

    /// Builder form of [`LearnerState::push`]
    pub fn with_tensor(mut self, name: impl Into<String>, tensor: &Tensor) -> Self {
        self.push(name, tensor);
        self
    }

    /// Look up a tensor by name
    pub fn tensor(&self, name: &str) -> Result<&Tensor> {
        self.tensors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
            .ok_or_else(|| MAMLError::Checkpoint(format!("missing model tensor '{}'", name)))
    }

    /// All named tensors in insertion order
    pub fn tensors(&self) -> &[(String, Tensor)] {
        &self.tensors
    }

    /// The JSON metadata
    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    /// Decode one metadata field
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .metadata
            .get(key)
            .ok_or_else(|| MAMLError::Checkpoint(format!("missing model field '{}'", key)))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub(crate) fn from_parts(tensors: Vec<(String, Tensor)>, metadata: serde_json::Value) -> Self {
        Self { tensors, metadata }
    }
}

/// Copy the values of `src` into the storage of `dst` without recording a graph.
///
/// `dst` keeps its device and `requires_grad` flag; shapes must match.
pub fn assign(dst: &Tensor, src: &Tensor) -> Result<()> {
    if dst.size() != src.size() {
        return Err(MAMLError::Model(format!(
            "shape mismatch: expected {:?}, got {:?}",
            dst.size(),
            src.size()
        )));
    }
    let mut dst = dst.shallow_clone();
    tch::no_grad(|| dst.f_copy_(src))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tch::Kind;

    #[test]
    fn test_learner_state_lookup() {
        let state = LearnerState::new(json!({ "seed": 7 }))
            .with_tensor("w", &Tensor::from_slice(&[1.0f32, 2.0]));

        assert_eq!(state.tensor("w").unwrap().size(), vec![2]);
        assert!(state.tensor("missing").is_err());
        assert_eq!(state.field::<u64>("seed").unwrap(), 7);
        assert!(state.field::<u64>("draws").is_err());
    }

    #[test]
    fn test_learner_state_copies_are_detached() {
        let w = Tensor::from_slice(&[1.0f32, 2.0]).set_requires_grad(true);
        let state = LearnerState::new(json!({})).with_tensor("w", &w);

        assert!(!state.tensor("w").unwrap().requires_grad());
        assert!(w.requires_grad());
    }

    #[test]
    fn test_assign_keeps_storage() {
        let w = Tensor::zeros([3], (Kind::Float, Device::Cpu)).set_requires_grad(true);
        let alias = w.shallow_clone();

        assign(&w, &Tensor::from_slice(&[1.0f32, 2.0, 3.0])).unwrap();

        assert_eq!(Vec::<f32>::try_from(&alias.detach()).unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(alias.requires_grad());
    }

    #[test]
    fn test_assign_rejects_shape_mismatch() {
        let w = Tensor::zeros([3], (Kind::Float, Device::Cpu));
        assert!(assign(&w, &Tensor::zeros([2], (Kind::Float, Device::Cpu))).is_err());
    }
}
