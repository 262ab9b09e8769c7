//! Rotating checkpoint files.
//!
//! A checkpoint is a single libtorch multi-tensor archive holding the task
//! model state, both optimizer states, the inner learning rate and the global
//! step. Files form a ring of numbered slots, `checkpoint0001.ckpt` being the
//! most recent. Slot numbers are zero-padded so that lexicographic order and
//! recency agree.
//!
//! Rotation is not atomic as a whole: an interruption between the renames can
//! leave a missing or stale slot, which a later restore will observe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tch::{Device, Tensor};
use tracing::debug;

use super::config::validate_max_checkpoints;
use crate::model::task::LearnerState;
use crate::optim::OptimizerState;
use crate::{MAMLError, Result};

/// Upper bound on ring size imposed by the four-digit slot numbers
pub const MAX_CHECKPOINT_SLOTS: usize = 9999;

const CHECKPOINT_PREFIX: &str = "checkpoint";
const CHECKPOINT_EXTENSION: &str = ".ckpt";
const TEMP_CHECKPOINT: &str = "temp_checkpoint.ckpt";

const MODEL_PREFIX: &str = "model.";
const OUTER_PREFIX: &str = "outer.";
const TASK_PREFIX: &str = "task.";
const META_KEY: &str = "__meta__";
const STEP_KEY: &str = "__step__";
const RECORD_KEY: &str = "__record__";
const INNER_LR_KEY: &str = "inner_learning_rate";
const GLOBAL_STEP_KEY: &str = "global_step";

/// Everything needed to resume meta-training
#[derive(Debug)]
pub struct CheckpointRecord {
    pub model_state: LearnerState,
    pub outer_optimizer_state: OptimizerState,
    pub task_optimizer_state: OptimizerState,
    pub inner_learning_rate: f64,
    pub global_step: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordInfo {
    created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Flatten into named tensors
    fn encode(&self) -> Result<Vec<(String, Tensor)>> {
        let mut entries = Vec::new();

        for (name, tensor) in self.model_state.tensors() {
            entries.push((format!("{}{}", MODEL_PREFIX, name), tensor.shallow_clone()));
        }
        entries.push((
            format!("{}{}", MODEL_PREFIX, META_KEY),
            json_tensor(self.model_state.metadata())?,
        ));

        for (prefix, state) in [
            (OUTER_PREFIX, &self.outer_optimizer_state),
            (TASK_PREFIX, &self.task_optimizer_state),
        ] {
            for (name, tensor) in &state.tensors {
                entries.push((format!("{}{}", prefix, name), tensor.shallow_clone()));
            }
            entries.push((format!("{}{}", prefix, STEP_KEY), Tensor::from_slice(&[state.step])));
        }

        entries.push((INNER_LR_KEY.to_string(), Tensor::from_slice(&[self.inner_learning_rate])));
        entries.push((GLOBAL_STEP_KEY.to_string(), Tensor::from_slice(&[self.global_step])));
        entries.push((
            RECORD_KEY.to_string(),
            json_tensor(&serde_json::to_value(RecordInfo {
                created_at: self.created_at,
            })?)?,
        ));

        Ok(entries)
    }

    /// Rebuild from named tensors, field by field
    fn decode(entries: Vec<(String, Tensor)>) -> Result<Self> {
        let mut model = Vec::new();
        let mut outer = Vec::new();
        let mut task = Vec::new();
        let mut fields = HashMap::new();

        for (name, tensor) in entries {
            if let Some(rest) = name.strip_prefix(MODEL_PREFIX) {
                if rest != META_KEY {
                    model.push((rest.to_string(), tensor));
                    continue;
                }
            } else if let Some(rest) = name.strip_prefix(OUTER_PREFIX) {
                if rest != STEP_KEY {
                    outer.push((rest.to_string(), tensor));
                    continue;
                }
            } else if let Some(rest) = name.strip_prefix(TASK_PREFIX) {
                if rest != STEP_KEY {
                    task.push((rest.to_string(), tensor));
                    continue;
                }
            }
            fields.insert(name, tensor);
        }

        let take = |key: String| {
            fields
                .get(&key)
                .ok_or_else(|| MAMLError::Checkpoint(format!("missing entry '{}'", key)))
        };

        let metadata = tensor_json(take(format!("{}{}", MODEL_PREFIX, META_KEY))?)?;
        let outer_step = take(format!("{}{}", OUTER_PREFIX, STEP_KEY))?.f_int64_value(&[0])?;
        let task_step = take(format!("{}{}", TASK_PREFIX, STEP_KEY))?.f_int64_value(&[0])?;
        let inner_learning_rate = take(INNER_LR_KEY.to_string())?.f_double_value(&[0])?;
        let global_step = take(GLOBAL_STEP_KEY.to_string())?.f_int64_value(&[0])?;
        let info: RecordInfo = serde_json::from_value(tensor_json(take(RECORD_KEY.to_string())?)?)?;

        Ok(Self {
            model_state: LearnerState::from_parts(model, metadata),
            outer_optimizer_state: OptimizerState {
                step: outer_step,
                tensors: outer,
            },
            task_optimizer_state: OptimizerState {
                step: task_step,
                tensors: task,
            },
            inner_learning_rate,
            global_step,
            created_at: info.created_at,
        })
    }

    /// Write to a single file
    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = self.encode()?;
        Tensor::save_multi(&entries, path)?;
        Ok(())
    }

    /// Read a file written by [`CheckpointRecord::save`], placing tensors on `device`
    pub fn load(path: &Path, device: Device) -> Result<Self> {
        let entries = Tensor::load_multi_with_device(path, device)?;
        Self::decode(entries)
    }
}

fn json_tensor(value: &serde_json::Value) -> Result<Tensor> {
    let bytes = serde_json::to_vec(value)?;
    Ok(Tensor::from_slice(&bytes))
}

fn tensor_json(tensor: &Tensor) -> Result<serde_json::Value> {
    let bytes = Vec::<u8>::try_from(&tensor.to_device(Device::Cpu))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Path of ring slot `slot` (1 is the newest)
pub fn checkpoint_path(dir: &Path, slot: usize) -> PathBuf {
    dir.join(format!("{}{:04}{}", CHECKPOINT_PREFIX, slot, CHECKPOINT_EXTENSION))
}

/// Save `record` as the newest slot, shifting older slots and dropping the oldest
pub fn write_rotating(dir: &Path, max_checkpoints_to_keep: usize, record: &CheckpointRecord) -> Result<PathBuf> {
    validate_max_checkpoints(max_checkpoints_to_keep)?;
    fs::create_dir_all(dir)?;

    let temp = dir.join(TEMP_CHECKPOINT);
    record.save(&temp)?;

    let oldest = checkpoint_path(dir, max_checkpoints_to_keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for slot in (1..max_checkpoints_to_keep).rev() {
        let path = checkpoint_path(dir, slot);
        if path.exists() {
            fs::rename(&path, checkpoint_path(dir, slot + 1))?;
        }
    }

    let newest = checkpoint_path(dir, 1);
    fs::rename(&temp, &newest)?;
    debug!("Wrote checkpoint {}", newest.display());
    Ok(newest)
}

/// All checkpoint files in `dir`, sorted by name
pub fn get_checkpoints(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<(String, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            (name.starts_with(CHECKPOINT_PREFIX) && name.ends_with(CHECKPOINT_EXTENSION))
                .then(|| (name, e.path()))
        })
        .collect();

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// The first checkpoint in sorted order, i.e. the most recent one
pub fn latest_checkpoint(dir: &Path) -> Result<PathBuf> {
    let checkpoints = if dir.exists() {
        get_checkpoints(dir)?
    } else {
        Vec::new()
    };
    checkpoints
        .into_iter()
        .next()
        .ok_or_else(|| MAMLError::NoCheckpoint(dir.to_path_buf()))
}
