use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::detect::result::DetectionResult;
use crate::error::PipelineError;
use crate::frame::Frame;

/// Which position-estimation backend a run uses. Resolved once per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Single-box detector with optional keypoints, run frame by frame.
    Realtime,
    /// Whole-video pose estimator, run out-of-band on a worker thread.
    Pose,
    /// Synthetic orbit for interface testing. Never for scientific use.
    Simulated,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Pose => "pose",
            Self::Simulated => "simulated",
        }
    }
}

impl FromStr for EngineKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" | "real-time" => Ok(Self::Realtime),
            "pose" | "batch" => Ok(Self::Pose),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(PipelineError::Config(format!(
                "unknown engine '{other}' (expected realtime|pose|simulated)"
            ))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_SECONDARY_KEYPOINT: usize = 16;
pub const DEFAULT_MODEL_INPUT: u32 = 640;

/// Backend parameters carried in the run configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Model weights for the real-time engine.
    pub model_path: Option<PathBuf>,
    /// Detections or landmarks below this score are treated as missing.
    pub confidence: f32,
    /// Keypoint reported as the secondary ("tail") landmark.
    pub secondary_keypoint: usize,
    pub input_width: u32,
    pub input_height: u32,
    /// Pose command line; `{video}` and `{output}` are substituted.
    pub pose_command: Vec<String>,
    /// Preferred landmark for the pose engine's position column.
    pub landmark: Option<String>,
    /// `ffmpeg` binary used for re-trimming.
    pub ffmpeg: PathBuf,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            model_path: None,
            confidence: DEFAULT_CONFIDENCE,
            secondary_keypoint: DEFAULT_SECONDARY_KEYPOINT,
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            pose_command: Vec::new(),
            landmark: None,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

/// Frame-by-frame engine.
///
/// Implementations may paint overlays on the frame. Overlays must not
/// influence the returned position.
pub trait FrameEngine: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// True for engines whose output is synthetic.
    fn is_simulated(&self) -> bool {
        false
    }

    /// Estimate the subject's position in native frame coordinates.
    fn infer(&mut self, frame: &mut Frame) -> Result<DetectionResult>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
