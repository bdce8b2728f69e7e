mod backend;
mod backends;
pub mod decode;
mod engine;
pub mod landmarks;
mod result;

pub use backend::{
    EngineKind, EngineParams, FrameEngine, DEFAULT_CONFIDENCE, DEFAULT_MODEL_INPUT,
    DEFAULT_SECONDARY_KEYPOINT,
};
pub use backends::{
    BatchPoseEngine, CommandPoseRunner, PoseRunner, PoseSeries, PreparedClip, SimulatedEngine,
};
#[cfg(feature = "backend-tract")]
pub use backends::TractPoseEngine;
pub use engine::{Engine, EngineFactory, StandardEngines};
pub use landmarks::LandmarkTable;
pub use result::{resolve_single_box, BoundingBox, DetectionResult, Keypoint};
