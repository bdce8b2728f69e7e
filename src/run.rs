//! Run snapshot and result types.
//!
//! `RunConfig` is captured once when a run starts and moved into whatever
//! executes it. `RunResult` is terminal and replaces any previous result.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::detect::{EngineKind, EngineParams};
use crate::device::{ComputeDevice, DevicePreference};
use crate::error::PipelineError;
use crate::metrics::{
    Metrics, MetricsConfig, DEFAULT_BODY_LENGTH_PX, DEFAULT_IMMOBILITY_FRACTION,
};
use crate::trajectory::Trajectory;
use crate::zone::{ZoneCategories, ZoneSet, DEFAULT_CLOSED_ARM_PATTERN, DEFAULT_OPEN_ARM_PATTERN};

/// Sampling and metric tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Record every `stride`-th decoded frame.
    pub stride: u32,
    pub body_length_px: f64,
    /// Body lengths per sample interval below which a step counts as immobile.
    pub immobility_fraction: f64,
    pub open_arm_pattern: String,
    pub closed_arm_pattern: String,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            stride: 1,
            body_length_px: DEFAULT_BODY_LENGTH_PX,
            immobility_fraction: DEFAULT_IMMOBILITY_FRACTION,
            open_arm_pattern: DEFAULT_OPEN_ARM_PATTERN.to_string(),
            closed_arm_pattern: DEFAULT_CLOSED_ARM_PATTERN.to_string(),
        }
    }
}

impl AnalysisParams {
    /// Effective sampling rate for a source running at `fps`.
    pub fn sampling_rate(&self, fps: f64) -> f64 {
        fps / f64::from(self.stride.max(1))
    }

    pub fn metrics_config(&self, sampling_rate_hz: f64) -> Result<MetricsConfig, PipelineError> {
        let mut config = MetricsConfig::new(sampling_rate_hz)?;
        config.body_length_px = self.body_length_px;
        config.immobility_fraction = self.immobility_fraction;
        config.categories = ZoneCategories::new(&self.open_arm_pattern, &self.closed_arm_pattern)?;
        Ok(config)
    }
}

/// Immutable description of one analysis run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub video_path: String,
    pub start_s: f64,
    pub end_s: f64,
    pub engine: EngineKind,
    pub engine_params: EngineParams,
    pub zone_set: ZoneSet,
    pub device: DevicePreference,
    pub analysis: AnalysisParams,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.video_path.trim().is_empty() {
            return Err(PipelineError::config("no video selected"));
        }
        if self.zone_set.is_empty() {
            return Err(PipelineError::config("no zones configured"));
        }
        if !self.start_s.is_finite() || self.start_s < 0.0 {
            return Err(PipelineError::Config(format!(
                "trim start must be a non-negative time, got {}",
                self.start_s
            )));
        }
        if !self.end_s.is_finite() || self.end_s <= self.start_s {
            return Err(PipelineError::Config(format!(
                "trim end ({}) must be after trim start ({})",
                self.end_s, self.start_s
            )));
        }
        if !(0.0..=1.0).contains(&self.engine_params.confidence) {
            return Err(PipelineError::Config(format!(
                "confidence must be in [0, 1], got {}",
                self.engine_params.confidence
            )));
        }
        if self.analysis.stride == 0 {
            return Err(PipelineError::config("stride must be at least 1"));
        }
        if !self.analysis.body_length_px.is_finite() || self.analysis.body_length_px <= 0.0 {
            return Err(PipelineError::config("body length must be positive"));
        }
        let fraction = self.analysis.immobility_fraction;
        if !fraction.is_finite() || fraction < 0.0 {
            return Err(PipelineError::config("immobility fraction must be >= 0"));
        }
        ZoneCategories::new(
            &self.analysis.open_arm_pattern,
            &self.analysis.closed_arm_pattern,
        )?;
        Ok(())
    }

    /// SHA-256 over the canonical JSON encoding, hex encoded.
    pub fn fingerprint(&self) -> Result<String, PipelineError> {
        let canonical = serde_json::to_vec(self).map_err(PipelineError::config)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

/// How a result was produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub engine: EngineKind,
    pub backend: String,
    /// Synthetic positions; never use for scoring.
    pub simulated: bool,
    pub device: ComputeDevice,
    pub config_fingerprint: String,
    pub sampling_rate_hz: f64,
    pub timestamp_regressions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmark: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub trajectory: Trajectory,
    pub metrics: Metrics,
    pub provenance: Provenance,
}
