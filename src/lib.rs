//! EPM Analyzer
//!
//! Behavioral scoring for elevated-plus-maze recordings: a single animal is
//! located frame by frame, each position is classified into a maze zone, and
//! the resulting trajectory is reduced to dwell time, entries, distance and
//! immobility.
//!
//! # Pipeline
//!
//! Data flows strictly forward:
//!
//! 1. **Zones** (`zone`): immutable rectangles in native video resolution and
//!    the first-match classifier.
//! 2. **Detection** (`detect`): real-time single-box, batch pose-estimation
//!    and simulated engines behind one dispatch, resolved once per run.
//! 3. **Recording** (`trajectory`): time-ordered, classified samples.
//! 4. **Aggregation** (`metrics`): per-zone dwell, entries, distance, speed,
//!    immobility and the anxiety index.
//! 5. **Orchestration** (`orchestrator`): the run state machine, progress,
//!    cooperative cancellation and session persistence (`session`).
//!
//! # Module Structure
//!
//! - `config`: layered analyzer configuration (file, defaults, environment)
//! - `ingest`: local video sources and re-trimming
//! - `device`: compute-device preference and selection
//! - `run`: run snapshot, result and provenance types
//!
//! # Features
//!
//! - `ingest-ffmpeg`: decode local video files. Every run opens its source to
//!   read frame rate and duration, including pose runs, so a build without
//!   this feature only accepts synthetic `stub://` clips.
//! - `backend-tract`: ONNX inference for the real-time engine.

pub mod config;
pub mod detect;
pub mod device;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod run;
pub mod session;
pub mod trajectory;
pub mod zone;

pub use config::AnalyzerConfig;
pub use detect::{
    DetectionResult, Engine, EngineFactory, EngineKind, EngineParams, FrameEngine,
    StandardEngines,
};
pub use device::{select_device, ComputeDevice, DeviceCapabilities, DevicePreference};
pub use error::PipelineError;
pub use frame::Frame;
pub use ingest::{FileConfig, FileSource};
pub use metrics::{aggregate, Metrics, MetricsConfig};
pub use orchestrator::{Orchestrator, RunState};
pub use progress::{CancelFlag, ProgressTracker};
pub use run::{AnalysisParams, Provenance, RunConfig, RunResult};
pub use session::SessionState;
pub use trajectory::{FrameSample, Recorder, Trajectory};
pub use zone::{Point, Zone, ZoneCategories, ZoneSet, NOT_DETECTED, OUTSIDE};
