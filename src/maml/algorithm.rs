//! MAML meta-learning algorithm.
//!
//! Model-Agnostic Meta-Learning (MAML) learns an initialization for a model's
//! parameters that enables fast adaptation to new tasks with only a few
//! gradient steps. Each meta-step samples a batch of tasks, adapts the
//! parameters to each task with a few differentiable gradient descent steps,
//! measures the loss of the adapted parameters on fresh data, and updates the
//! initialization with the gradient of that loss taken through the adaptation.
//!
//! Reference: Finn, C., Abbeel, P., & Levine, S. (2017).
//! "Model-Agnostic Meta-Learning for Fast Adaptation of Deep Networks." ICML.

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tch::{Device, Kind, Tensor};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::checkpoint::{self, CheckpointRecord};
use super::config::{validate_max_checkpoints, FitConfig, MAMLConfig};
use crate::model::task::{assign, TaskModel};
use crate::optim::{GradientDescent, LearningRate, Optimizer};
use crate::utils::device::select_device;
use crate::{MAMLError, Result};

/// Meta-loss of one task and its gradient with respect to the meta-parameters
#[derive(Debug)]
pub struct MetaLoss {
    /// Loss of the adapted parameters on the second batch
    pub loss: f64,
    /// One gradient per meta-parameter, zeros where the loss does not depend on it
    pub gradients: Vec<Tensor>,
}

/// Result of one meta-batch
#[derive(Debug)]
pub struct MetaBatch {
    /// Meta-loss averaged over the tasks
    pub mean_loss: f64,
    /// Meta-gradients summed over the tasks
    pub gradients: Vec<Tensor>,
}

/// Summary of a `fit` call
#[derive(Debug, Clone, Default)]
pub struct FitReport {
    /// Meta-steps performed by this call
    pub steps: usize,
    /// Global step after the call
    pub global_step: i64,
    /// Mean meta-loss of every step
    pub meta_losses: Vec<f64>,
    /// Checkpoints written by this call
    pub checkpoints_written: usize,
}

impl FitReport {
    pub fn final_meta_loss(&self) -> Option<f64> {
        self.meta_losses.last().copied()
    }
}

/// Performs MAML on a [`TaskModel`]
///
/// Two optimizers are kept: the outer optimizer applies meta-gradients to the
/// initialization, and a fixed-step gradient descent task optimizer is used by
/// [`MetaLearner::train_on_current_task`] to fine tune on a single task. The
/// inner loop of meta-training does not use either of them: its updates are
/// plain tensor arithmetic so that they stay part of the autograd graph.
pub struct MetaLearner<M: TaskModel> {
    task_model: M,
    config: MAMLConfig,
    /// 0-dim step size of the inner loop; requires grad when learnable
    inner_lr: Tensor,
    outer_optimizer: Box<dyn Optimizer>,
    task_optimizer: GradientDescent,
    device: Device,
    checkpoint_dir: PathBuf,
    global_step: i64,
    // Declared last so the directory outlives everything that may write to it
    _temp_dir: Option<TempDir>,
}

impl<M: TaskModel> MetaLearner<M> {
    /// Create a meta-learner
    ///
    /// Creates the checkpoint directory (or a temporary one), moves the task
    /// model to the selected device and binds both optimizers to its parameters.
    pub fn new(mut task_model: M, config: MAMLConfig) -> Result<Self> {
        config.validate()?;

        let (checkpoint_dir, temp_dir) = match &config.checkpoint_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let temp = tempfile::Builder::new().prefix("maml-").tempdir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let device = select_device(config.device);
        task_model.to_device(device);

        let parameters = task_model.parameters();
        if parameters.is_empty() {
            return Err(MAMLError::Model("task model has no parameters".into()));
        }
        if let Some(i) = parameters.iter().position(|p| !p.requires_grad()) {
            return Err(MAMLError::Model(format!(
                "parameter {} does not require grad",
                i
            )));
        }

        let kind = parameters[0].kind();
        let inner_lr = Tensor::scalar_tensor(config.inner_learning_rate, (kind, device))
            .set_requires_grad(config.learnable_inner_lr);

        let mut meta_parameters: Vec<Tensor> = parameters.iter().map(|p| p.shallow_clone()).collect();
        if config.learnable_inner_lr {
            meta_parameters.push(inner_lr.shallow_clone());
        }
        let outer_optimizer = config.optimizer.build(meta_parameters)?;
        let task_optimizer =
            GradientDescent::new(parameters, LearningRate::Constant(config.inner_learning_rate));

        info!(
            "Created MAML learner on {:?} (inner_lr={}, inner_steps={}, meta_batch_size={}, checkpoints in {})",
            device,
            config.inner_learning_rate,
            config.inner_steps,
            config.meta_batch_size,
            checkpoint_dir.display()
        );

        Ok(Self {
            task_model,
            config,
            inner_lr,
            outer_optimizer,
            task_optimizer,
            device,
            checkpoint_dir,
            global_step: 0,
            _temp_dir: temp_dir,
        })
    }

    /// Perform meta-learning
    ///
    /// Each step sums the meta-gradients of `meta_batch_size` tasks and applies
    /// one outer optimizer step. A checkpoint is written after the last step and
    /// whenever `checkpoint_interval` has elapsed since the previous one.
    pub fn fit(&mut self, fit: &FitConfig) -> Result<FitReport> {
        fit.validate()?;
        if fit.restore {
            self.restore()?;
        }

        let interval = fit.checkpoint_interval();
        let mut checkpoint_time = Instant::now();
        let mut report = FitReport {
            steps: fit.steps,
            ..FitReport::default()
        };

        info!(
            "Starting meta-training for {} steps from global step {}",
            fit.steps, self.global_step
        );

        for i in 0..fit.steps {
            let batch = self.accumulate_meta_batch()?;
            self.outer_optimizer.step(&batch.gradients)?;
            self.global_step += 1;

            if !batch.mean_loss.is_finite() {
                warn!("Non-finite meta-loss at global step {}", self.global_step);
            }
            debug!(
                "Step {}: meta_loss={:.6}, outer_lr={:.6}",
                self.global_step,
                batch.mean_loss,
                self.outer_optimizer.learning_rate()
            );
            report.meta_losses.push(batch.mean_loss);

            if i == fit.steps - 1 || checkpoint_time.elapsed() >= interval {
                self.save_checkpoint(fit.max_checkpoints_to_keep)?;
                report.checkpoints_written += 1;
                checkpoint_time = Instant::now();
            }
        }

        report.global_step = self.global_step;
        if let Some(loss) = report.final_meta_loss() {
            info!(
                "Finished meta-training at global step {}: meta_loss={:.6}",
                self.global_step, loss
            );
        }
        Ok(report)
    }

    /// Sample `meta_batch_size` tasks and sum their meta-gradients
    pub fn accumulate_meta_batch(&mut self) -> Result<MetaBatch> {
        let mut summed: Vec<Tensor> = self
            .meta_parameters(&self.task_model.parameters())
            .iter()
            .map(|p| p.detach().zeros_like())
            .collect();
        let mut total_loss = 0.0;

        for _ in 0..self.config.meta_batch_size {
            self.task_model.select_task();
            let inputs = self.task_model.sample_batch()?;
            let inputs2 = self.task_model.sample_batch()?;
            let meta = self.compute_meta_loss(&inputs, &inputs2)?;

            total_loss += meta.loss;
            for (sum, grad) in summed.iter_mut().zip(&meta.gradients) {
                *sum += grad;
            }
        }

        Ok(MetaBatch {
            mean_loss: total_loss / self.config.meta_batch_size as f64,
            gradients: summed,
        })
    }

    /// Loss after adapting on `inputs`, measured on `inputs2`, and its gradient
    /// with respect to the original parameters (plus the inner learning rate
    /// when it is learnable)
    pub fn compute_meta_loss(&self, inputs: &[Tensor], inputs2: &[Tensor]) -> Result<MetaLoss> {
        let parameters = self.task_model.parameters();
        let adapted = self.adapt(inputs, &parameters)?;
        let (meta_loss, _) = self.task_model.evaluate(inputs2, &adapted, true)?;

        let targets = self.meta_parameters(&parameters);
        let grads = Tensor::f_run_backward(&[&meta_loss], &targets, false, false)?;
        let gradients = grads
            .into_iter()
            .zip(&targets)
            .map(|(g, p)| if g.defined() { g } else { p.detach().zeros_like() })
            .collect();

        Ok(MetaLoss {
            loss: meta_loss.f_double_value(&[])?,
            gradients,
        })
    }

    /// Run the inner loop from `parameters` on one batch
    ///
    /// The returned tensors stay connected to `parameters` through every
    /// update, so gradients of a loss computed from them reach `parameters`
    /// with second-order terms included. Entries without a gradient are
    /// passed through unchanged.
    pub fn adapt(&self, inputs: &[Tensor], parameters: &[Tensor]) -> Result<Vec<Tensor>> {
        let mut adapted: Vec<Tensor> = parameters.iter().map(|p| p.shallow_clone()).collect();

        for _ in 0..self.config.inner_steps {
            let (loss, _) = self.task_model.evaluate(inputs, &adapted, true)?;
            let grads = Tensor::f_run_backward(&[&loss], &adapted, true, true)?;
            adapted = adapted
                .iter()
                .zip(grads)
                .map(|(a, g)| {
                    if g.defined() {
                        a - &self.inner_lr * g
                    } else {
                        a.shallow_clone()
                    }
                })
                .collect();
        }
        Ok(adapted)
    }

    /// Fine tune the model on the current task with the task optimizer
    ///
    /// Each step draws a fresh batch. Returns the loss measured before each
    /// update.
    pub fn train_on_current_task(&mut self, optimization_steps: usize, restore: bool) -> Result<Vec<f64>> {
        if restore {
            self.restore()?;
        }
        if self.config.learnable_inner_lr {
            self.task_optimizer
                .set_learning_rate(LearningRate::Constant(self.inner_learning_rate()?));
        }

        let variables = self.task_model.parameters();
        let mut losses = Vec::with_capacity(optimization_steps);
        for _ in 0..optimization_steps {
            let inputs = self.task_model.sample_batch()?;
            let (loss, _) = self.task_model.evaluate(&inputs, &variables, true)?;
            let grads = Tensor::f_run_backward(&[&loss], &variables, false, false)?;
            self.task_optimizer.step(&grads)?;
            losses.push(loss.f_double_value(&[])?);
        }
        debug!("Fine tuned on current task for {} steps: {:?}", optimization_steps, losses);
        Ok(losses)
    }

    /// Evaluate the model at its current parameters without adaptation
    pub fn predict_on_batch(&self, inputs: &[Tensor]) -> Result<(f64, Vec<Tensor>)> {
        let parameters = self.task_model.parameters();
        let (loss, outputs) = tch::no_grad(|| self.task_model.evaluate(inputs, &parameters, false))?;
        Ok((loss.f_double_value(&[])?, outputs))
    }

    /// Write a checkpoint into the learner's checkpoint directory
    pub fn save_checkpoint(&self, max_checkpoints_to_keep: usize) -> Result<PathBuf> {
        self.save_checkpoint_to(&self.checkpoint_dir, max_checkpoints_to_keep)
    }

    /// Write a checkpoint into `dir`, keeping at most `max_checkpoints_to_keep` files
    pub fn save_checkpoint_to(&self, dir: &Path, max_checkpoints_to_keep: usize) -> Result<PathBuf> {
        validate_max_checkpoints(max_checkpoints_to_keep)?;
        let record = CheckpointRecord {
            model_state: self.task_model.state()?,
            outer_optimizer_state: self.outer_optimizer.state(),
            task_optimizer_state: self.task_optimizer.state(),
            inner_learning_rate: self.inner_learning_rate()?,
            global_step: self.global_step,
            created_at: Utc::now(),
        };
        let path = checkpoint::write_rotating(dir, max_checkpoints_to_keep, &record)?;
        info!("Saved checkpoint at global step {} to {}", self.global_step, path.display());
        Ok(path)
    }

    /// Checkpoint files in `dir`, sorted by name (most recent first)
    pub fn get_checkpoints(&self, dir: Option<&Path>) -> Result<Vec<PathBuf>> {
        checkpoint::get_checkpoints(dir.unwrap_or(self.checkpoint_dir.as_path()))
    }

    /// Reload everything from the most recent checkpoint
    pub fn restore(&mut self) -> Result<()> {
        let path = checkpoint::latest_checkpoint(&self.checkpoint_dir)?;
        self.restore_from(&path)
    }

    /// Reload everything from a specific checkpoint file
    pub fn restore_from(&mut self, path: &Path) -> Result<()> {
        let record = CheckpointRecord::load(path, self.device)?;

        // Nothing is modified unless every part of the record fits this learner
        self.task_model.check_state(&record.model_state)?;
        self.outer_optimizer.check_state(&record.outer_optimizer_state)?;
        self.task_optimizer.check_state(&record.task_optimizer_state)?;

        self.task_model.load_state(&record.model_state)?;
        self.outer_optimizer.load_state(&record.outer_optimizer_state)?;
        self.task_optimizer.load_state(&record.task_optimizer_state)?;
        assign(
            &self.inner_lr,
            &Tensor::scalar_tensor(record.inner_learning_rate, (Kind::Double, self.device)),
        )?;
        self.global_step = record.global_step;

        info!(
            "Restored checkpoint {} (global step {}, saved {})",
            path.display(),
            self.global_step,
            record.created_at.to_rfc3339()
        );
        Ok(())
    }

    /// The model parameters followed by the inner learning rate when it is learnable
    fn meta_parameters(&self, parameters: &[Tensor]) -> Vec<Tensor> {
        let mut targets: Vec<Tensor> = parameters.iter().map(|p| p.shallow_clone()).collect();
        if self.config.learnable_inner_lr {
            targets.push(self.inner_lr.shallow_clone());
        }
        targets
    }

    pub fn task_model(&self) -> &M {
        &self.task_model
    }

    pub fn task_model_mut(&mut self) -> &mut M {
        &mut self.task_model
    }

    /// Consume the learner, returning the task model
    ///
    /// A temporary checkpoint directory is removed at this point.
    pub fn into_task_model(self) -> M {
        self.task_model
    }

    pub fn config(&self) -> &MAMLConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn global_step(&self) -> i64 {
        self.global_step
    }

    /// Current inner learning rate
    pub fn inner_learning_rate(&self) -> Result<f64> {
        Ok(self.inner_lr.f_double_value(&[])?)
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn outer_optimizer(&self) -> &dyn Optimizer {
        self.outer_optimizer.as_ref()
    }

    pub fn task_optimizer(&self) -> &dyn Optimizer {
        &self.task_optimizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::LearnerState;
    use crate::optim::OptimizerConfig;
    use crate::utils::device::DeviceChoice;
    use approx::assert_relative_eq;
    use serde_json::json;

    /// loss = (p - target)^2 with per-task targets; an optional second
    /// parameter is never used by the loss
    struct Quadratic {
        params: Vec<Tensor>,
        targets: Vec<f64>,
        next_task: usize,
        target: f64,
    }

    impl Quadratic {
        fn new(initial: f64, targets: &[f64], unused: bool) -> Self {
            let mut params = vec![Tensor::from_slice(&[initial]).set_requires_grad(true)];
            if unused {
                params.push(Tensor::from_slice(&[5.0, 6.0]).set_requires_grad(true));
            }
            Self {
                params,
                targets: targets.to_vec(),
                next_task: 0,
                target: targets[0],
            }
        }

        fn p(&self) -> f64 {
            self.params[0].double_value(&[0])
        }
    }

    impl TaskModel for Quadratic {
        fn evaluate(
            &self,
            inputs: &[Tensor],
            parameters: &[Tensor],
            _training: bool,
        ) -> Result<(Tensor, Vec<Tensor>)> {
            let diff = &parameters[0] - &inputs[0];
            Ok((diff.square().sum(Kind::Double), vec![&parameters[0] * 1.0]))
        }

        fn parameters(&self) -> Vec<Tensor> {
            self.params.iter().map(|p| p.shallow_clone()).collect()
        }

        fn select_task(&mut self) {
            self.target = self.targets[self.next_task % self.targets.len()];
            self.next_task += 1;
        }

        fn sample_batch(&mut self) -> Result<Vec<Tensor>> {
            Ok(vec![Tensor::from_slice(&[self.target])])
        }

        fn to_device(&mut self, _device: Device) {}

        fn state(&self) -> Result<LearnerState> {
            let mut state = LearnerState::new(json!({
                "next_task": self.next_task,
                "target": self.target,
            }));
            for (i, p) in self.params.iter().enumerate() {
                state.push(format!("p{}", i), p);
            }
            Ok(state)
        }

        fn load_state(&mut self, state: &LearnerState) -> Result<()> {
            for (i, p) in self.params.iter().enumerate() {
                assign(p, state.tensor(&format!("p{}", i))?)?;
            }
            self.next_task = state.field("next_task")?;
            self.target = state.field("target")?;
            Ok(())
        }
    }

    fn config() -> MAMLConfig {
        MAMLConfig::default()
            .with_inner_learning_rate(0.1)
            .with_inner_steps(1)
            .with_meta_batch_size(3)
            .with_optimizer(OptimizerConfig::gradient_descent(1.0))
            .with_device(DeviceChoice::Cpu)
    }

    fn scalar(t: &Tensor) -> f64 {
        t.double_value(&[0])
    }

    #[test]
    fn test_meta_gradient_is_summed_over_tasks() {
        // p' = p - 0.1 * 2(p - t) = 0.8p + 0.2t, meta-loss 0.64(p - t)^2,
        // d/dp = 1.28(p - t); at p = 0 the sum over t = 1, 2, 3 is -7.68
        let mut maml = MetaLearner::new(Quadratic::new(0.0, &[1.0, 2.0, 3.0], false), config()).unwrap();

        let batch = maml.accumulate_meta_batch().unwrap();

        assert_eq!(batch.gradients.len(), 1);
        assert_relative_eq!(scalar(&batch.gradients[0]), -7.68, epsilon = 1e-10);
        assert_relative_eq!(batch.mean_loss, 0.64 * 14.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_fit_applies_summed_gradient() {
        let mut maml = MetaLearner::new(Quadratic::new(0.0, &[1.0, 2.0, 3.0], false), config()).unwrap();

        let report = maml.fit(&FitConfig::new(1)).unwrap();

        // Outer gradient descent with rate 1 moves p by the summed gradient
        assert_relative_eq!(maml.task_model().p(), 7.68, epsilon = 1e-10);
        assert_eq!(report.global_step, 1);
        assert_eq!(report.checkpoints_written, 1);
        assert_eq!(maml.global_step(), 1);
    }

    #[test]
    fn test_fit_with_unbounded_checkpoint_interval() {
        let mut maml = MetaLearner::new(Quadratic::new(0.0, &[1.0, 2.0, 3.0], false), config()).unwrap();
        let fit = FitConfig {
            checkpoint_interval_secs: 1e30,
            ..FitConfig::new(3)
        };

        let report = maml.fit(&fit).unwrap();

        // Only the final checkpoint is written
        assert_eq!(report.checkpoints_written, 1);
        assert_eq!(report.global_step, 3);
    }

    #[test]
    fn test_meta_gradient_is_second_order() {
        // Treating the adapted parameter as a constant would give 1.6(p - t)
        let maml = MetaLearner::new(Quadratic::new(0.0, &[1.0], false), config()).unwrap();
        let batch = vec![Tensor::from_slice(&[1.0])];

        let meta = maml.compute_meta_loss(&batch, &batch).unwrap();

        assert_relative_eq!(scalar(&meta.gradients[0]), -1.28, epsilon = 1e-10);
        assert_relative_eq!(meta.loss, 0.64, epsilon = 1e-10);
    }

    #[test]
    fn test_missing_gradient_passes_through() {
        let maml = MetaLearner::new(Quadratic::new(0.0, &[1.0], true), config().with_inner_steps(3)).unwrap();
        let parameters = maml.task_model().parameters();
        let batch = vec![Tensor::from_slice(&[1.0])];

        let adapted = maml.adapt(&batch, &parameters).unwrap();
        assert_eq!(adapted.len(), 2);
        assert!(adapted[1].detach().equal(&parameters[1].detach()));
        assert!(!adapted[0].detach().equal(&parameters[0].detach()));

        let meta = maml.compute_meta_loss(&batch, &batch).unwrap();
        assert_eq!(meta.gradients[1].size(), vec![2]);
        assert_eq!(Vec::<f64>::try_from(&meta.gradients[1]).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_learnable_inner_learning_rate() {
        // meta-loss = (1 - 2a)^2 (p - t)^2, d/da = -4(1 - 2a)(p - t)^2 = -3.2 at a = 0.1
        let config = config().with_meta_batch_size(1).with_learnable_inner_lr(true);
        let mut maml = MetaLearner::new(Quadratic::new(0.0, &[1.0], false), config).unwrap();

        let batch = maml.accumulate_meta_batch().unwrap();
        assert_eq!(batch.gradients.len(), 2);
        assert_relative_eq!(scalar(&batch.gradients[0]), -1.28, epsilon = 1e-10);
        assert_relative_eq!(batch.gradients[1].double_value(&[]), -3.2, epsilon = 1e-10);

        maml.fit(&FitConfig::new(1)).unwrap();
        assert_relative_eq!(maml.inner_learning_rate().unwrap(), 3.3, epsilon = 1e-10);
    }

    #[test]
    fn test_train_on_current_task() {
        let mut maml = MetaLearner::new(Quadratic::new(0.0, &[1.0], false), config()).unwrap();
        maml.task_model_mut().select_task();

        let losses = maml.train_on_current_task(1, false).unwrap();

        // p = 0 - 0.1 * 2(0 - 1)
        assert_relative_eq!(maml.task_model().p(), 0.2, epsilon = 1e-10);
        assert_eq!(losses, vec![1.0]);
        assert_eq!(maml.task_optimizer().num_steps(), 1);
        assert_eq!(maml.outer_optimizer().num_steps(), 0);
    }

    #[test]
    fn test_train_on_current_task_requires_checkpoint_when_restoring() {
        let mut maml = MetaLearner::new(Quadratic::new(0.0, &[1.0], false), config()).unwrap();
        assert!(matches!(
            maml.train_on_current_task(1, true),
            Err(MAMLError::NoCheckpoint(_))
        ));
        assert_relative_eq!(maml.task_model().p(), 0.0);
    }

    #[test]
    fn test_predict_on_batch() {
        let maml = MetaLearner::new(Quadratic::new(0.5, &[1.0], false), config()).unwrap();

        let (loss, outputs) = maml.predict_on_batch(&[Tensor::from_slice(&[2.0])]).unwrap();

        assert_relative_eq!(loss, 2.25, epsilon = 1e-12);
        assert!(!outputs[0].requires_grad());
        assert_relative_eq!(maml.task_model().p(), 0.5);
    }

    #[test]
    fn test_restore_without_checkpoint_leaves_state() {
        let mut maml = MetaLearner::new(Quadratic::new(0.0, &[1.0, 2.0, 3.0], false), config()).unwrap();
        maml.fit(&FitConfig::new(1)).unwrap();
        for path in maml.get_checkpoints(None).unwrap() {
            fs::remove_file(path).unwrap();
        }

        assert!(matches!(maml.restore(), Err(MAMLError::NoCheckpoint(_))));
        assert_relative_eq!(maml.task_model().p(), 7.68, epsilon = 1e-10);
        assert_eq!(maml.global_step(), 1);
    }

    #[test]
    fn test_restore_rolls_back_training() {
        let mut maml = MetaLearner::new(Quadratic::new(0.0, &[1.0, 2.0, 3.0], false), config()).unwrap();
        maml.fit(&FitConfig::new(1)).unwrap();
        let saved = maml.task_model().p();
        maml.fit(&FitConfig::new(1)).unwrap();
        let latest = maml.task_model().p();
        assert_ne!(latest, saved);

        let files = maml.get_checkpoints(None).unwrap();
        assert_eq!(files.len(), 2);

        maml.restore_from(&files[1]).unwrap();
        assert_relative_eq!(maml.task_model().p(), saved, epsilon = 1e-12);
        assert_eq!(maml.global_step(), 1);

        maml.restore().unwrap();
        assert_relative_eq!(maml.task_model().p(), latest, epsilon = 1e-12);
        assert_eq!(maml.global_step(), 2);
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let model = Quadratic::new(0.0, &[1.0], false);
        assert!(MetaLearner::new(model, config().with_inner_steps(0)).is_err());

        let frozen = Quadratic {
            params: vec![Tensor::from_slice(&[0.0])],
            targets: vec![1.0],
            next_task: 0,
            target: 1.0,
        };
        assert!(matches!(
            MetaLearner::new(frozen, config()),
            Err(MAMLError::Model(_))
        ));
    }

    #[test]
    fn test_temporary_checkpoint_dir_is_removed_on_drop() {
        let maml = MetaLearner::new(Quadratic::new(0.0, &[1.0], false), config()).unwrap();
        let dir = maml.checkpoint_dir().to_path_buf();
        maml.save_checkpoint(2).unwrap();
        assert!(dir.exists());

        drop(maml);
        assert!(!dir.exists());

        // Already gone before drop
        let maml = MetaLearner::new(Quadratic::new(0.0, &[1.0], false), config()).unwrap();
        fs::remove_dir_all(maml.checkpoint_dir()).unwrap();
        drop(maml);
    }
}
