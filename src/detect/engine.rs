use crate::detect::backend::{EngineKind, EngineParams, FrameEngine};
use crate::detect::backends::{BatchPoseEngine, SimulatedEngine};
use crate::device::ComputeDevice;
use crate::error::PipelineError;

/// An initialised engine, dispatched once per run.
pub enum Engine {
    /// Runs frame by frame on the foreground thread.
    Frame(Box<dyn FrameEngine>),
    /// Runs over the whole clip on a background worker.
    Batch(BatchPoseEngine),
}

impl Engine {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Frame(engine) => engine.name(),
            Self::Batch(_) => "pose",
        }
    }

    pub fn is_simulated(&self) -> bool {
        match self {
            Self::Frame(engine) => engine.is_simulated(),
            Self::Batch(_) => false,
        }
    }
}

/// Builds engines for a run.
///
/// Initialisation failures are reported as `EngineInit` and never replaced by
/// the simulated engine.
pub trait EngineFactory: Send {
    fn initialize(
        &self,
        kind: EngineKind,
        params: &EngineParams,
        device: ComputeDevice,
    ) -> Result<Engine, PipelineError>;
}

/// Engines shipped with this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardEngines;

impl EngineFactory for StandardEngines {
    fn initialize(
        &self,
        kind: EngineKind,
        params: &EngineParams,
        device: ComputeDevice,
    ) -> Result<Engine, PipelineError> {
        log::info!("initializing {kind} engine on {device}");
        let mut engine = match kind {
            EngineKind::Simulated => Engine::Frame(Box::new(SimulatedEngine::new())),
            EngineKind::Pose => Engine::Batch(
                BatchPoseEngine::initialize(params, device).map_err(PipelineError::engine_init)?,
            ),
            EngineKind::Realtime => Engine::Frame(realtime_engine(params, device)?),
        };
        if let Engine::Frame(frame_engine) = &mut engine {
            frame_engine.warm_up().map_err(PipelineError::engine_init)?;
        }
        Ok(engine)
    }
}

#[cfg(feature = "backend-tract")]
fn realtime_engine(
    params: &EngineParams,
    device: ComputeDevice,
) -> Result<Box<dyn FrameEngine>, PipelineError> {
    let engine = crate::detect::backends::TractPoseEngine::initialize(params, device)
        .map_err(PipelineError::engine_init)?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "backend-tract"))]
fn realtime_engine(
    _params: &EngineParams,
    _device: ComputeDevice,
) -> Result<Box<dyn FrameEngine>, PipelineError> {
    Err(PipelineError::EngineInit(
        "realtime engine requires the backend-tract feature".to_string(),
    ))
}
