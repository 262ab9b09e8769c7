//! Few-shot sine-wave regression.
//!
//! Each task is a sine wave `y = A * sin(x + phase)` with its own amplitude and
//! phase. The model is a small MLP whose weights are evaluated against whatever
//! parameter values `MetaLearner` hands in, which is what makes the inner loop
//! differentiable.

use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tch::{Device, Kind, Tensor};

use super::task::{assign, LearnerState, TaskModel};
use crate::{MAMLError, Result};

const PARAMETER_NAMES: [&str; 6] = ["w1", "b1", "w2", "b2", "w3", "b3"];

/// Configuration of the sine task family and its model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SineConfig {
    /// Width of the two hidden layers
    pub hidden_size: i64,
    /// Points per batch
    pub batch_size: usize,
    /// Seed for weight initialization and task/batch sampling
    pub seed: u64,
    /// Amplitude range of sampled tasks
    pub amplitude_range: (f64, f64),
    /// Phase range of sampled tasks
    pub phase_range: (f64, f64),
    /// Range of input points
    pub input_range: (f64, f64),
}

impl Default for SineConfig {
    fn default() -> Self {
        Self {
            hidden_size: 40,
            batch_size: 10,
            seed: 42,
            amplitude_range: (0.1, 5.0),
            phase_range: (0.0, std::f64::consts::PI),
            input_range: (-5.0, 5.0),
        }
    }
}

impl SineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size <= 0 {
            return Err(MAMLError::InvalidParameter("hidden_size must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(MAMLError::InvalidParameter("batch_size must be > 0".into()));
        }
        for (name, (low, high)) in [
            ("amplitude_range", self.amplitude_range),
            ("phase_range", self.phase_range),
            ("input_range", self.input_range),
        ] {
            if !(low < high) {
                return Err(MAMLError::InvalidParameter(format!(
                    "{} must satisfy low < high, got ({}, {})",
                    name, low, high
                )));
            }
        }
        Ok(())
    }
}

/// Sine-wave regression learner: a `1 -> hidden -> hidden -> 1` ReLU network
#[derive(Debug)]
pub struct SineRegression {
    config: SineConfig,
    parameters: Vec<Tensor>,
    amplitude: f64,
    phase: f64,
    draws: u64,
    device: Device,
}

impl SineRegression {
    /// Create a learner with freshly initialized weights on the CPU
    pub fn new(config: SineConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let h = config.hidden_size;

        let parameters = vec![
            xavier(&mut rng, 1, h)?,
            Tensor::zeros([h], (Kind::Float, Device::Cpu)),
            xavier(&mut rng, h, h)?,
            Tensor::zeros([h], (Kind::Float, Device::Cpu)),
            xavier(&mut rng, h, 1)?,
            Tensor::zeros([1], (Kind::Float, Device::Cpu)),
        ]
        .into_iter()
        .map(|t| t.set_requires_grad(true))
        .collect();

        let amplitude = config.amplitude_range.0;
        let phase = config.phase_range.0;

        Ok(Self {
            config,
            parameters,
            amplitude,
            phase,
            draws: 0,
            device: Device::Cpu,
        })
    }

    /// Pin the current task
    pub fn set_task(&mut self, amplitude: f64, phase: f64) {
        self.amplitude = amplitude;
        self.phase = phase;
    }

    /// Current `(amplitude, phase)`
    pub fn task(&self) -> (f64, f64) {
        (self.amplitude, self.phase)
    }

    pub fn config(&self) -> &SineConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Total number of scalar weights
    pub fn num_parameters(&self) -> i64 {
        self.parameters.iter().map(|p| p.numel() as i64).sum()
    }

    /// Build `[x, y]` for the given input points under the current task
    pub fn make_batch(&self, xs: &[f32]) -> Vec<Tensor> {
        let ys: Vec<f32> = xs
            .iter()
            .map(|&x| (self.amplitude * (x as f64 + self.phase).sin()) as f32)
            .collect();
        let n = xs.len() as i64;
        vec![
            Tensor::from_slice(xs).reshape([n, 1]).to_device(self.device),
            Tensor::from_slice(&ys).reshape([n, 1]).to_device(self.device),
        ]
    }

    /// Every draw gets its own generator, so `(seed, draws)` fully determines the stream
    fn next_rng(&mut self) -> StdRng {
        let rng = StdRng::seed_from_u64(
            self.config
                .seed
                .wrapping_add(self.draws.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        );
        self.draws += 1;
        rng
    }
}

fn xavier(rng: &mut StdRng, fan_in: i64, fan_out: i64) -> Result<Tensor> {
    let std_dev = (2.0 / (fan_in + fan_out) as f64).sqrt();
    let normal =
        Normal::new(0.0, std_dev).map_err(|e| MAMLError::InvalidParameter(e.to_string()))?;
    let values: Vec<f32> = (0..fan_in * fan_out)
        .map(|_| normal.sample(rng) as f32)
        .collect();
    Ok(Tensor::from_slice(&values).reshape([fan_in, fan_out]))
}

impl TaskModel for SineRegression {
    fn evaluate(
        &self,
        inputs: &[Tensor],
        parameters: &[Tensor],
        _training: bool,
    ) -> Result<(Tensor, Vec<Tensor>)> {
        let [x, y] = inputs else {
            return Err(MAMLError::Model(format!(
                "expected inputs [x, y], got {} tensors",
                inputs.len()
            )));
        };
        let [w1, b1, w2, b2, w3, b3] = parameters else {
            return Err(MAMLError::Model(format!(
                "expected {} parameters, got {}",
                PARAMETER_NAMES.len(),
                parameters.len()
            )));
        };

        let hidden = (x.matmul(w1) + b1).relu();
        let hidden = (hidden.matmul(w2) + b2).relu();
        let output = hidden.matmul(w3) + b3;
        let loss = (&output - y).square().mean(Kind::Float);

        Ok((loss, vec![output]))
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.parameters.iter().map(|p| p.shallow_clone()).collect()
    }

    fn select_task(&mut self) {
        let mut rng = self.next_rng();
        let (a_lo, a_hi) = self.config.amplitude_range;
        let (p_lo, p_hi) = self.config.phase_range;
        self.amplitude = rng.gen_range(a_lo..a_hi);
        self.phase = rng.gen_range(p_lo..p_hi);
    }

    fn sample_batch(&mut self) -> Result<Vec<Tensor>> {
        let mut rng = self.next_rng();
        let (lo, hi) = self.config.input_range;
        let xs: Vec<f32> = (0..self.config.batch_size)
            .map(|_| rng.gen_range(lo..hi) as f32)
            .collect();
        Ok(self.make_batch(&xs))
    }

    fn to_device(&mut self, device: Device) {
        if device == self.device {
            return;
        }
        self.parameters = self
            .parameters
            .iter()
            .map(|p| p.detach().to_device(device).set_requires_grad(true))
            .collect();
        self.device = device;
    }

    fn state(&self) -> Result<LearnerState> {
        let mut state = LearnerState::new(json!({
            "seed": self.config.seed,
            "draws": self.draws,
            "amplitude": self.amplitude,
            "phase": self.phase,
            "batch_size": self.config.batch_size,
            "hidden_size": self.config.hidden_size,
        }));
        for (name, p) in PARAMETER_NAMES.iter().zip(&self.parameters) {
            state.push(*name, p);
        }
        Ok(state)
    }

    fn check_state(&self, state: &LearnerState) -> Result<()> {
        let hidden_size: i64 = state.field("hidden_size")?;
        if hidden_size != self.config.hidden_size {
            return Err(MAMLError::Checkpoint(format!(
                "checkpoint hidden_size {} does not match model hidden_size {}",
                hidden_size, self.config.hidden_size
            )));
        }
        for key in ["seed", "draws", "batch_size"] {
            state.field::<u64>(key)?;
        }
        for key in ["amplitude", "phase"] {
            state.field::<f64>(key)?;
        }
        for (name, p) in PARAMETER_NAMES.iter().zip(&self.parameters) {
            let stored = state.tensor(name)?;
            if stored.size() != p.size() {
                return Err(MAMLError::Checkpoint(format!(
                    "parameter '{}' has shape {:?}, expected {:?}",
                    name,
                    stored.size(),
                    p.size()
                )));
            }
        }
        Ok(())
    }

    fn load_state(&mut self, state: &LearnerState) -> Result<()> {
        // Validate everything before touching any field
        self.check_state(state)?;
        let seed: u64 = state.field("seed")?;
        let draws: u64 = state.field("draws")?;
        let amplitude: f64 = state.field("amplitude")?;
        let phase: f64 = state.field("phase")?;
        let batch_size: usize = state.field("batch_size")?;
        let tensors = PARAMETER_NAMES
            .iter()
            .map(|name| state.tensor(name))
            .collect::<Result<Vec<_>>>()?;

        for (p, t) in self.parameters.iter().zip(tensors) {
            assign(p, t)?;
        }
        self.config.seed = seed;
        self.config.batch_size = batch_size;
        self.draws = draws;
        self.amplitude = amplitude;
        self.phase = phase;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SineConfig {
        SineConfig {
            hidden_size: 8,
            batch_size: 5,
            ..SineConfig::default()
        }
    }

    #[test]
    fn test_parameter_shapes() {
        let model = SineRegression::new(small_config()).unwrap();
        let shapes: Vec<Vec<i64>> = model.parameters().iter().map(|p| p.size()).collect();

        assert_eq!(
            shapes,
            vec![vec![1, 8], vec![8], vec![8, 8], vec![8], vec![8, 1], vec![1]]
        );
        assert_eq!(model.num_parameters(), 8 + 8 + 64 + 8 + 8 + 1);
        assert!(model.parameters().iter().all(|p| p.requires_grad()));
    }

    #[test]
    fn test_batch_follows_task() {
        let mut model = SineRegression::new(small_config()).unwrap();
        model.set_task(2.0, 0.0);

        let batch = model.sample_batch().unwrap();
        assert_eq!(batch[0].size(), vec![5, 1]);

        let x = Vec::<f32>::try_from(&batch[0].flatten(0, -1)).unwrap();
        let y = Vec::<f32>::try_from(&batch[1].flatten(0, -1)).unwrap();
        for (x, y) in x.iter().zip(&y) {
            assert!((2.0 * x.sin() - y).abs() < 1e-5);
            assert!((-5.0..=5.0).contains(x));
        }
    }

    #[test]
    fn test_select_task_within_ranges() {
        let mut model = SineRegression::new(small_config()).unwrap();
        for _ in 0..20 {
            model.select_task();
            let (amplitude, phase) = model.task();
            assert!((0.1..5.0).contains(&amplitude));
            assert!((0.0..std::f64::consts::PI).contains(&phase));
        }
    }

    #[test]
    fn test_sampling_is_reproducible_from_state() {
        let mut model = SineRegression::new(small_config()).unwrap();
        model.select_task();
        let state = model.state().unwrap();
        let expected = model.sample_batch().unwrap();

        let mut other = SineRegression::new(SineConfig {
            seed: 999,
            ..small_config()
        })
        .unwrap();
        other.load_state(&state).unwrap();
        let actual = other.sample_batch().unwrap();

        assert_eq!(other.task(), model.task());
        assert!(expected[0].allclose(&actual[0], 0.0, 0.0, false));
        assert!(expected[1].allclose(&actual[1], 0.0, 0.0, false));
    }

    #[test]
    fn test_evaluate_uses_given_parameters() {
        let mut model = SineRegression::new(small_config()).unwrap();
        let batch = model.sample_batch().unwrap();
        let zeros: Vec<Tensor> = model.parameters().iter().map(|p| p.zeros_like()).collect();

        let (loss, outputs) = model.evaluate(&batch, &zeros, false).unwrap();
        let expected = batch[1].square().mean(Kind::Float);

        assert!((loss.double_value(&[]) - expected.double_value(&[])).abs() < 1e-6);
        assert_eq!(outputs[0].size(), vec![5, 1]);
    }

    #[test]
    fn test_evaluate_rejects_wrong_arity() {
        let mut model = SineRegression::new(small_config()).unwrap();
        let batch = model.sample_batch().unwrap();
        let params = model.parameters();

        assert!(model.evaluate(&batch[..1], &params, true).is_err());
        assert!(model.evaluate(&batch, &params[..5], true).is_err());
    }

    #[test]
    fn test_load_state_rejects_other_architecture() {
        let state = SineRegression::new(small_config()).unwrap().state().unwrap();
        let mut wide = SineRegression::new(SineConfig::default()).unwrap();
        assert!(wide.load_state(&state).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(SineConfig::default().validate().is_ok());
        let bad = SineConfig {
            amplitude_range: (5.0, 0.1),
            ..SineConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(SineRegression::new(bad).is_err());
    }
}
