//! Compute device selection.
//!
//! Preference order for automatic selection is CUDA, then MPS, then CPU.
//! Availability checks go through [`DeviceProbe`] so every branch can be
//! exercised without the hardware.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tch::Device;
use tracing::warn;

use crate::MAMLError;

/// Requested compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceChoice {
    /// Best available device
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Mps,
}

impl FromStr for DeviceChoice {
    type Err = MAMLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            "mps" => Ok(Self::Mps),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| MAMLError::InvalidParameter(format!("unknown device '{}'", s))),
        }
    }
}

impl fmt::Display for DeviceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(index) => write!(f, "cuda:{}", index),
            Self::Mps => write!(f, "mps"),
        }
    }
}

/// Reports which accelerators are usable
pub trait DeviceProbe {
    fn cuda_device_count(&self) -> usize;
    fn mps_available(&self) -> bool;
}

/// Probe backed by libtorch
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl DeviceProbe for SystemProbe {
    fn cuda_device_count(&self) -> usize {
        if tch::Cuda::is_available() {
            tch::Cuda::device_count().max(0) as usize
        } else {
            0
        }
    }

    fn mps_available(&self) -> bool {
        tch::utils::has_mps()
    }
}

/// Resolve `choice` against the devices present on this machine
pub fn select_device(choice: DeviceChoice) -> Device {
    select_device_with(choice, &SystemProbe)
}

/// Resolve `choice` using `probe`; unavailable requests fall back to the CPU
pub fn select_device_with(choice: DeviceChoice, probe: &impl DeviceProbe) -> Device {
    match choice {
        DeviceChoice::Auto => {
            if probe.cuda_device_count() > 0 {
                Device::Cuda(0)
            } else if probe.mps_available() {
                Device::Mps
            } else {
                Device::Cpu
            }
        }
        DeviceChoice::Cpu => Device::Cpu,
        DeviceChoice::Cuda(index) => {
            if index < probe.cuda_device_count() {
                Device::Cuda(index)
            } else {
                warn!("CUDA device {} requested but not available, falling back to CPU", index);
                Device::Cpu
            }
        }
        DeviceChoice::Mps => {
            if probe.mps_available() {
                Device::Mps
            } else {
                warn!("MPS requested but not available, falling back to CPU");
                Device::Cpu
            }
        }
    }
}
