//! Compute-device selection.
//!
//! The device is resolved once when a run starts and travels with the run
//! snapshot into the worker. Engines receive it as an explicit parameter;
//! nothing here mutates process-global capability detection.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// User-facing preference, persisted in the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use an accelerator when one is present.
    #[default]
    Auto,
    /// Never touch an accelerator.
    Cpu,
}

impl FromStr for DevicePreference {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            other => Err(PipelineError::Config(format!(
                "unknown device preference '{other}' (expected auto|cpu)"
            ))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

/// Concrete device a run executes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda(u32),
}

impl ComputeDevice {
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Cuda(_))
    }

    /// Value for `CUDA_VISIBLE_DEVICES` in a child process environment.
    pub fn visible_devices(&self) -> String {
        match self {
            Self::Cpu => "-1".to_string(),
            Self::Cuda(index) => index.to_string(),
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

/// What the host offers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub cuda_devices: u32,
}

impl DeviceCapabilities {
    pub fn cpu_only() -> Self {
        Self { cuda_devices: 0 }
    }

    /// Probe device nodes exposed by the NVIDIA driver.
    pub fn probe() -> Self {
        Self::probe_dir(Path::new("/dev"))
    }

    fn probe_dir(dev: &Path) -> Self {
        let Ok(entries) = std::fs::read_dir(dev) else {
            return Self::cpu_only();
        };
        let cuda_devices = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.strip_prefix("nvidia").is_some_and(|rest| {
                    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
                })
            })
            .count() as u32;
        Self { cuda_devices }
    }
}

/// Resolve a preference against the host's capabilities.
pub fn select_device(preference: DevicePreference, caps: &DeviceCapabilities) -> ComputeDevice {
    match preference {
        DevicePreference::Cpu => ComputeDevice::Cpu,
        DevicePreference::Auto if caps.cuda_devices > 0 => ComputeDevice::Cuda(0),
        DevicePreference::Auto => ComputeDevice::Cpu,
    }
}
