pub mod pose;
pub mod simulated;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use pose::{BatchPoseEngine, CommandPoseRunner, PoseRunner, PoseSeries, PreparedClip};
pub use simulated::SimulatedEngine;

#[cfg(feature = "backend-tract")]
pub use tract::TractPoseEngine;
