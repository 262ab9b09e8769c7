//! Utility modules

pub mod config;
pub mod device;
pub mod logging;

pub use config::Config;
pub use device::{select_device, select_device_with, DeviceChoice, DeviceProbe, SystemProbe};
pub use logging::setup_logging;
