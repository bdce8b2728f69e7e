//! Job orchestration: the run state machine.
//!
//! `Idle -> Configuring -> Running -> {Completed, Failed, Cancelled}`.
//!
//! - Frame engines run on the caller's thread, a chunk of frames per `poll()`.
//! - The batch pose engine runs on one background worker; `poll()` checks its
//!   completion channel without blocking.
//! - A run works from a snapshot of its `RunConfig` and the device resolved
//!   at launch. Later configuration changes never reach it.
//! - Only the orchestrator writes the session. Workers report back over the
//!   channel.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::detect::{BatchPoseEngine, Engine, EngineFactory, EngineKind, FrameEngine};
use crate::device::{select_device, ComputeDevice, DeviceCapabilities};
use crate::error::PipelineError;
use crate::ingest::{FileConfig, FileSource, VideoInfo};
use crate::metrics::aggregate;
use crate::progress::{CancelFlag, ProgressTracker};
use crate::run::{Provenance, RunConfig, RunResult};
use crate::session::SessionState;
use crate::trajectory::{RecordStatus, Recorder, Trajectory};

/// Foreground polling cadence while a batch worker runs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_FRAMES_PER_POLL: usize = 32;
/// Share of the remaining progress granted per idle batch poll.
const BATCH_NUDGE: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Configuring,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Everything a run needs, frozen at launch.
#[derive(Clone, Debug)]
struct RunContext {
    config: RunConfig,
    device: ComputeDevice,
    fingerprint: String,
    info: VideoInfo,
    sampling_rate_hz: f64,
}

impl RunContext {
    fn provenance(
        &self,
        backend: &str,
        simulated: bool,
        regressions: u64,
        landmark: Option<String>,
    ) -> Provenance {
        Provenance {
            engine: self.config.engine,
            backend: backend.to_string(),
            simulated,
            device: self.device,
            config_fingerprint: self.fingerprint.clone(),
            sampling_rate_hz: self.sampling_rate_hz,
            timestamp_regressions: regressions,
            landmark,
        }
    }

    fn build_result(
        &self,
        trajectory: Trajectory,
        provenance: Provenance,
    ) -> Result<RunResult, PipelineError> {
        let metrics_config = self.config.analysis.metrics_config(self.sampling_rate_hz)?;
        let metrics = aggregate(&trajectory, &metrics_config);
        Ok(RunResult {
            trajectory,
            metrics,
            provenance,
        })
    }
}

enum WorkerOutcome {
    Finished(Box<RunResult>),
    Failed(PipelineError),
    Cancelled,
}

struct FrameRun {
    ctx: RunContext,
    engine: Box<dyn FrameEngine>,
    source: FileSource,
    recorder: Recorder,
    decoded: u64,
}

struct BatchRun {
    handle: JoinHandle<()>,
    outcome: Receiver<WorkerOutcome>,
}

enum ActiveRun {
    Frames(Box<FrameRun>),
    Batch(BatchRun),
}

enum Step {
    Continue,
    Done(WorkerOutcome),
}

pub struct Orchestrator {
    session: SessionState,
    capabilities: DeviceCapabilities,
    engines: Box<dyn EngineFactory>,
    state: RunState,
    config: Option<RunConfig>,
    active: Option<ActiveRun>,
    progress: ProgressTracker,
    cancel: CancelFlag,
    last_result: Option<RunResult>,
    last_error: Option<PipelineError>,
    poll_interval: Duration,
    frames_per_poll: usize,
}

impl Orchestrator {
    pub fn new(
        session: SessionState,
        capabilities: DeviceCapabilities,
        engines: Box<dyn EngineFactory>,
    ) -> Self {
        Self {
            session,
            capabilities,
            engines,
            state: RunState::Idle,
            config: None,
            active: None,
            progress: ProgressTracker::new(),
            cancel: CancelFlag::new(),
            last_result: None,
            last_error: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            frames_per_poll: DEFAULT_FRAMES_PER_POLL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    /// Handle for requesting cancellation from another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn config(&self) -> Option<&RunConfig> {
        self.config.as_ref()
    }

    pub fn last_result(&self) -> Option<&RunResult> {
        self.last_result.as_ref()
    }

    pub fn last_error(&self) -> Option<&PipelineError> {
        self.last_error.as_ref()
    }

    /// Accept a new configuration and persist its user-facing parts.
    pub fn configure(&mut self, config: RunConfig) -> Result<(), PipelineError> {
        if self.state == RunState::Running {
            return Err(PipelineError::RunInProgress);
        }
        config.validate()?;
        if let Err(err) = self.session.store_run_config(&config) {
            log::warn!("failed to persist run configuration: {err:#}");
        }
        self.config = Some(config);
        self.state = RunState::Configuring;
        Ok(())
    }

    /// Launch a run from a snapshot of the current configuration.
    ///
    /// Initialisation failures move the orchestrator to `Failed` and are also
    /// returned.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state == RunState::Running {
            return Err(PipelineError::RunInProgress);
        }
        let snapshot = self
            .config
            .clone()
            .ok_or_else(|| PipelineError::config("no run configured"))?;
        snapshot.validate()?;

        self.last_result = None;
        self.last_error = None;
        self.progress.reset();
        self.cancel.clear();
        if let Err(err) = self.session.clear_run_result() {
            log::warn!("failed to clear previous result: {err:#}");
        }

        match self.launch(snapshot) {
            Ok(active) => {
                self.active = Some(active);
                self.state = RunState::Running;
                Ok(())
            }
            Err(err) => {
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn launch(&mut self, config: RunConfig) -> Result<ActiveRun, PipelineError> {
        let device = select_device(config.device, &self.capabilities);
        let fingerprint = config.fingerprint()?;
        log::info!(
            "starting run: engine={} device={} window=[{:.2}s, {:.2}s] config={}",
            config.engine,
            device,
            config.start_s,
            config.end_s,
            fingerprint
        );

        let mut source = FileSource::open(FileConfig::new(config.video_path.clone()))
            .map_err(PipelineError::io)?;
        let info = source.info();
        if info.duration_s > 0.0 && config.start_s >= info.duration_s {
            return Err(PipelineError::Config(format!(
                "trim start {:.2}s is past the end of the video ({:.2}s)",
                config.start_s, info.duration_s
            )));
        }
        let sampling_rate_hz = config.analysis.sampling_rate(info.fps);
        let engine = self
            .engines
            .initialize(config.engine, &config.engine_params, device)?;

        let ctx = RunContext {
            config,
            device,
            fingerprint,
            info,
            sampling_rate_hz,
        };

        match engine {
            Engine::Frame(engine) => {
                source.seek(ctx.config.start_s).map_err(PipelineError::io)?;
                let recorder = Recorder::new(ctx.config.zone_set.clone(), ctx.config.end_s);
                Ok(ActiveRun::Frames(Box::new(FrameRun {
                    ctx,
                    engine,
                    source,
                    recorder,
                    decoded: 0,
                })))
            }
            Engine::Batch(engine) => {
                drop(source);
                let (tx, rx) = mpsc::channel();
                let cancel = self.cancel.clone();
                let progress = self.progress.clone();
                let handle = thread::Builder::new()
                    .name("epm-pose-worker".to_string())
                    .spawn(move || {
                        let outcome = run_batch(engine, &ctx, &cancel, &progress);
                        let _ = tx.send(outcome);
                    })
                    .map_err(|e| {
                        PipelineError::EngineInit(format!("failed to spawn worker: {e}"))
                    })?;
                Ok(ActiveRun::Batch(BatchRun {
                    handle,
                    outcome: rx,
                }))
            }
        }
    }

    /// Advance the active run without blocking on the batch worker.
    pub fn poll(&mut self) -> RunState {
        if self.state != RunState::Running {
            return self.state;
        }
        let step = match self.active.as_mut() {
            Some(ActiveRun::Frames(run)) => {
                step_frames(run, self.frames_per_poll, &self.cancel, &self.progress)
            }
            Some(ActiveRun::Batch(batch)) => match batch.outcome.try_recv() {
                Ok(outcome) => Step::Done(outcome),
                Err(TryRecvError::Empty) => {
                    self.progress.nudge(BATCH_NUDGE);
                    Step::Continue
                }
                Err(TryRecvError::Disconnected) => {
                    Step::Done(WorkerOutcome::Failed(PipelineError::EngineInference(
                        "pose worker exited without a result".to_string(),
                    )))
                }
            },
            None => Step::Done(WorkerOutcome::Failed(PipelineError::InvalidTransition(
                "running without an active run".to_string(),
            ))),
        };

        if let Step::Done(outcome) = step {
            if let Some(ActiveRun::Batch(batch)) = self.active.take() {
                if batch.handle.join().is_err() {
                    log::error!("pose worker panicked");
                }
            }
            self.active = None;
            match outcome {
                WorkerOutcome::Finished(result) => self.finish(*result),
                WorkerOutcome::Failed(err) => self.fail(err),
                WorkerOutcome::Cancelled => {
                    log::info!("run cancelled");
                    self.state = RunState::Cancelled;
                }
            }
        }
        self.state
    }

    /// Poll until the run reaches a terminal state.
    ///
    /// `observe` receives the progress fraction after every poll. Batch runs
    /// are polled at the configured interval.
    pub fn wait(&mut self, mut observe: impl FnMut(f64)) -> RunState {
        loop {
            let state = self.poll();
            observe(self.progress.fraction());
            if state != RunState::Running {
                return state;
            }
            if matches!(self.active, Some(ActiveRun::Batch(_))) {
                thread::sleep(self.poll_interval);
            }
        }
    }

    /// Configure, start and wait in one call.
    pub fn run(
        &mut self,
        config: RunConfig,
        observe: impl FnMut(f64),
    ) -> Result<&RunResult, PipelineError> {
        self.configure(config)?;
        self.start()?;
        match self.wait(observe) {
            RunState::Completed => self.last_result.as_ref().ok_or_else(|| {
                PipelineError::InvalidTransition("completed without a result".to_string())
            }),
            RunState::Cancelled => Err(PipelineError::Cancelled),
            _ => Err(self.last_error.clone().unwrap_or_else(|| {
                PipelineError::InvalidTransition("run did not complete".to_string())
            })),
        }
    }

    /// Return to `Idle`. A running job must reach a terminal state first.
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        if self.state == RunState::Running {
            return Err(PipelineError::InvalidTransition(
                "cannot reset while a run is in progress".to_string(),
            ));
        }
        self.state = RunState::Idle;
        self.config = None;
        self.progress.reset();
        self.cancel.clear();
        Ok(())
    }

    /// Clear the session (logout).
    pub fn logout(&mut self) -> Result<(), PipelineError> {
        self.reset()?;
        self.last_result = None;
        self.last_error = None;
        self.session.clear().map_err(PipelineError::io)
    }

    fn finish(&mut self, result: RunResult) {
        log::info!(
            "run completed: {} samples, {:.2}s, {} entries",
            result.trajectory.len(),
            result.metrics.total_time_s,
            result.metrics.entries_count
        );
        if result.provenance.simulated {
            log::warn!("result produced by the simulated engine; do not use for scoring");
        }
        if let Err(err) = self.session.store_run_result(&result) {
            log::warn!("failed to persist run result: {err:#}");
        }
        self.last_result = Some(result);
        self.progress.complete();
        self.state = RunState::Completed;
    }

    fn fail(&mut self, err: PipelineError) {
        log::error!("run failed: {err}");
        self.active = None;
        self.last_error = Some(err);
        self.state = RunState::Failed;
    }
}

fn step_frames(
    run: &mut FrameRun,
    budget: usize,
    cancel: &CancelFlag,
    progress: &ProgressTracker,
) -> Step {
    let stride = u64::from(run.ctx.config.analysis.stride.max(1));
    let start_s = run.ctx.config.start_s;
    let span = (run.ctx.config.end_s - start_s).max(0.1);

    for _ in 0..budget {
        if cancel.is_cancelled() {
            return Step::Done(WorkerOutcome::Cancelled);
        }
        let mut frame = match run.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Step::Done(finish_frames(run)),
            Err(err) => return Step::Done(WorkerOutcome::Failed(PipelineError::io(err))),
        };
        let sequence = run.decoded;
        run.decoded += 1;
        if sequence % stride != 0 {
            continue;
        }
        if run.recorder.is_past_end(frame.timestamp_s) {
            return Step::Done(finish_frames(run));
        }
        let detection = match run.engine.infer(&mut frame) {
            Ok(detection) => detection,
            Err(err) => return Step::Done(WorkerOutcome::Failed(PipelineError::inference(err))),
        };
        if run
            .recorder
            .record_with_tail(frame.timestamp_s, detection.position, detection.secondary)
            == RecordStatus::PastEnd
        {
            return Step::Done(finish_frames(run));
        }
        progress.advance((frame.timestamp_s - start_s) / span);
    }
    Step::Continue
}

fn finish_frames(run: &mut FrameRun) -> WorkerOutcome {
    let regressions = run.recorder.regressions();
    let recorder = std::mem::replace(
        &mut run.recorder,
        Recorder::new(run.ctx.config.zone_set.clone(), run.ctx.config.end_s),
    );
    log::debug!(
        "decoded {} frames from {}",
        run.source.stats().frames_decoded,
        run.source.stats().path
    );
    let provenance = run.ctx.provenance(
        run.engine.name(),
        run.engine.is_simulated(),
        regressions,
        None,
    );
    let trajectory = recorder.finish();
    if trajectory.is_empty() {
        return WorkerOutcome::Failed(PipelineError::Config(format!(
            "no frames decoded in window [{:.2}s, {:.2}s]",
            run.ctx.config.start_s, run.ctx.config.end_s
        )));
    }
    match run.ctx.build_result(trajectory, provenance) {
        Ok(result) => WorkerOutcome::Finished(Box::new(result)),
        Err(err) => WorkerOutcome::Failed(err),
    }
}

/// Body of the batch worker. Cancellation is observed between steps only.
fn run_batch(
    engine: BatchPoseEngine,
    ctx: &RunContext,
    cancel: &CancelFlag,
    progress: &ProgressTracker,
) -> WorkerOutcome {
    let config = &ctx.config;
    let video = std::path::Path::new(&config.video_path);
    let clip = match engine.prepare(video, config.start_s, config.end_s, ctx.info.duration_s) {
        Ok(clip) => clip,
        Err(err) => return WorkerOutcome::Failed(PipelineError::io(err)),
    };
    if cancel.is_cancelled() {
        return WorkerOutcome::Cancelled;
    }
    progress.advance(0.1);

    let series = match engine.estimate(&clip) {
        Ok(series) => series,
        Err(err) => return WorkerOutcome::Failed(PipelineError::inference(err)),
    };
    if cancel.is_cancelled() {
        return WorkerOutcome::Cancelled;
    }
    progress.advance(0.9);

    let fps = ctx.info.fps;
    let stride = config.analysis.stride.max(1) as usize;
    let mut recorder = Recorder::new(config.zone_set.clone(), config.end_s);
    for (row, position) in series.positions.iter().enumerate().step_by(stride) {
        let time_seconds = series.origin_s + row as f64 / fps;
        if time_seconds < config.start_s {
            continue;
        }
        if recorder.record(time_seconds, *position) == RecordStatus::PastEnd {
            break;
        }
    }

    let provenance = ctx.provenance(
        EngineKind::Pose.as_str(),
        false,
        recorder.regressions(),
        Some(series.landmark),
    );
    log::debug!("pose worker on {} finished", engine.device());
    let trajectory = recorder.finish();
    if trajectory.is_empty() {
        return WorkerOutcome::Failed(PipelineError::EngineInference(format!(
            "pose table has no rows in window [{:.2}s, {:.2}s]",
            config.start_s, config.end_s
        )));
    }
    match ctx.build_result(trajectory, provenance) {
        Ok(result) => WorkerOutcome::Finished(Box::new(result)),
        Err(err) => WorkerOutcome::Failed(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionResult, EngineParams};
    use crate::device::DevicePreference;
    use crate::frame::Frame;
    use crate::run::AnalysisParams;
    use crate::zone::{Point, Zone, ZoneSet};
    use std::sync::{Arc, Mutex};

    struct Stationary(Point);

    impl FrameEngine for Stationary {
        fn name(&self) -> &'static str {
            "stationary"
        }

        fn infer(&mut self, _frame: &mut Frame) -> anyhow::Result<DetectionResult> {
            Ok(DetectionResult::at(self.0, 0.9))
        }
    }

    struct FailsAt(u64);

    impl FrameEngine for FailsAt {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn infer(&mut self, frame: &mut Frame) -> anyhow::Result<DetectionResult> {
            if frame.index >= self.0 {
                anyhow::bail!("inference blew up at frame {}", frame.index);
            }
            Ok(DetectionResult::at(Point::new(10.0, 10.0), 0.9))
        }
    }

    /// Hands out prepared engines and records the device each run got.
    struct Scripted {
        make: Box<dyn Fn() -> Result<Engine, PipelineError> + Send>,
        devices: Arc<Mutex<Vec<ComputeDevice>>>,
    }

    impl EngineFactory for Scripted {
        fn initialize(
            &self,
            _kind: EngineKind,
            _params: &EngineParams,
            device: ComputeDevice,
        ) -> Result<Engine, PipelineError> {
            self.devices.lock().unwrap().push(device);
            (self.make)()
        }
    }

    fn orchestrator(
        dir: &tempfile::TempDir,
        make: impl Fn() -> Result<Engine, PipelineError> + Send + 'static,
    ) -> (Orchestrator, Arc<Mutex<Vec<ComputeDevice>>>) {
        let devices = Arc::new(Mutex::new(Vec::new()));
        let orch = Orchestrator::new(
            SessionState::new(dir.path().join("session.json")),
            DeviceCapabilities { cuda_devices: 1 },
            Box::new(Scripted {
                make: Box::new(make),
                devices: devices.clone(),
            }),
        )
        .with_poll_interval(Duration::from_millis(5));
        (orch, devices)
    }

    fn config() -> RunConfig {
        RunConfig {
            video_path: "stub://maze".to_string(),
            start_s: 0.0,
            end_s: 10.0,
            engine: EngineKind::Realtime,
            engine_params: EngineParams::default(),
            zone_set: ZoneSet::new(vec![
                Zone::new("Closed 1", 0.0, 0.0, 200.0, 200.0),
                Zone::new("Open 1", 200.0, 0.0, 200.0, 200.0),
            ])
            .unwrap(),
            device: DevicePreference::Auto,
            analysis: AnalysisParams::default(),
        }
    }

    #[test]
    fn stationary_animal_in_closed_arm() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(100.0, 100.0)))))
        });
        let mut seen = Vec::new();
        let result = orch.run(config(), |p| seen.push(p)).unwrap().clone();

        assert_eq!(orch.state(), RunState::Completed);
        assert_eq!(result.trajectory.len(), 100);
        assert!((result.metrics.per_zone_seconds["Closed 1"] - 10.0).abs() < 1e-9);
        assert_eq!(result.metrics.entries_count, 0);
        assert_eq!(result.metrics.total_distance, 0.0);
        assert_eq!(result.metrics.immobility_pct, 100.0);
        assert_eq!(result.metrics.anxiety_index, 0.0);
        assert!(!result.provenance.simulated);
        assert_eq!(result.provenance.sampling_rate_hz, 10.0);

        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen[..seen.len() - 1].iter().all(|p| *p < 1.0));
        assert_eq!(seen.last().copied(), Some(1.0));

        let persisted = orch.session().run_result().unwrap().unwrap();
        assert_eq!(persisted.trajectory.len(), 100);
        assert_eq!(persisted.provenance, result.provenance);
    }

    #[test]
    fn window_end_stops_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(100.0, 100.0)))))
        });
        let mut cfg = config();
        cfg.start_s = 2.0;
        cfg.end_s = 4.0;
        cfg.analysis.stride = 2;
        let result = orch.run(cfg, |_| {}).unwrap();
        let times: Vec<f64> = result
            .trajectory
            .samples()
            .iter()
            .map(|s| s.time_seconds)
            .collect();
        assert!((times[0] - 2.0).abs() < 1e-9);
        assert!(times.iter().all(|t| *t <= 4.0));
        assert_eq!(times.len(), 11);
        assert_eq!(result.provenance.sampling_rate_hz, 5.0);
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(1.0, 1.0)))))
        });
        orch.configure(config()).unwrap();
        orch.start().unwrap();
        assert_eq!(orch.state(), RunState::Running);
        assert_eq!(orch.start(), Err(PipelineError::RunInProgress));
        assert_eq!(orch.configure(config()), Err(PipelineError::RunInProgress));
        assert!(matches!(orch.reset(), Err(PipelineError::InvalidTransition(_))));
        assert_eq!(orch.wait(|_| {}), RunState::Completed);
        orch.reset().unwrap();
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[test]
    fn engine_init_failure_never_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Err(PipelineError::EngineInit("weights missing".to_string()))
        });
        orch.configure(config()).unwrap();
        assert!(matches!(orch.start(), Err(PipelineError::EngineInit(_))));
        assert_eq!(orch.state(), RunState::Failed);
        assert!(orch.last_result().is_none());
        assert!(orch.session().run_result().unwrap().is_none());
    }

    #[test]
    fn inference_failure_discards_partial_trajectory() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || Ok(Engine::Frame(Box::new(FailsAt(40)))));
        let err = orch.run(config(), |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::EngineInference(_)));
        assert_eq!(orch.state(), RunState::Failed);
        assert!(orch.last_result().is_none());
        assert!(orch.session().run_result().unwrap().is_none());
    }

    #[test]
    fn unreadable_video_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(1.0, 1.0)))))
        });
        let mut cfg = config();
        cfg.video_path = dir.path().join("missing.mp4").display().to_string();
        orch.configure(cfg).unwrap();
        assert!(matches!(orch.start(), Err(PipelineError::Io(_))));
    }

    #[test]
    fn start_without_configuration_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(1.0, 1.0)))))
        });
        assert!(matches!(orch.start(), Err(PipelineError::Config(_))));
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[test]
    fn window_past_video_end_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(1.0, 1.0)))))
        });
        let mut cfg = config();
        cfg.start_s = 20.0;
        cfg.end_s = 30.0;
        orch.configure(cfg).unwrap();
        assert!(matches!(orch.start(), Err(PipelineError::Config(_))));
        assert_eq!(orch.state(), RunState::Failed);
        assert!(orch.last_result().is_none());
        assert!(orch.session().run_result().unwrap().is_none());
    }

    #[test]
    fn window_without_frames_fails_instead_of_completing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(1.0, 1.0)))))
        });
        // Last synthetic frame sits at 9.9s.
        let mut cfg = config();
        cfg.start_s = 9.95;
        cfg.end_s = 12.0;
        let err = orch.run(cfg, |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert_eq!(orch.state(), RunState::Failed);
        assert!(orch.last_result().is_none());
        assert!(orch.session().run_result().unwrap().is_none());
    }

    #[test]
    fn cancellation_is_cooperative() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(1.0, 1.0)))))
        });
        orch.configure(config()).unwrap();
        orch.start().unwrap();
        orch.poll();
        orch.cancel_flag().cancel();
        assert_eq!(orch.wait(|_| {}), RunState::Cancelled);
        assert!(orch.last_result().is_none());
        assert!(orch.progress().fraction() < 1.0);
    }

    #[test]
    fn device_is_frozen_at_launch() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, devices) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(1.0, 1.0)))))
        });
        orch.configure(config()).unwrap();
        orch.start().unwrap();
        orch.session_mut()
            .set_device_preference(DevicePreference::Cpu)
            .unwrap();
        assert_eq!(orch.wait(|_| {}), RunState::Completed);
        assert_eq!(devices.lock().unwrap().as_slice(), &[ComputeDevice::Cuda(0)]);
        assert_eq!(orch.last_result().unwrap().provenance.device, ComputeDevice::Cuda(0));
    }

    #[test]
    fn new_run_replaces_previous_result() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, || {
            Ok(Engine::Frame(Box::new(Stationary(Point::new(100.0, 100.0)))))
        });
        orch.run(config(), |_| {}).unwrap();
        let mut cfg = config();
        cfg.end_s = 5.0;
        let second = orch.run(cfg, |_| {}).unwrap().clone();
        let persisted = orch.session().run_result().unwrap().unwrap();
        assert_eq!(persisted.trajectory.len(), 51);
        assert_eq!(
            persisted.provenance.config_fingerprint,
            second.provenance.config_fingerprint
        );
    }

    mod batch {
        use super::*;
        use crate::detect::PoseRunner;
        use crate::ingest::VideoTrimmer;
        use std::path::{Path, PathBuf};

        struct NoTrim;

        impl VideoTrimmer for NoTrim {
            fn trim(&self, source: &Path, _start_s: f64, _end_s: f64) -> anyhow::Result<PathBuf> {
                Ok(source.to_path_buf())
            }
        }

        struct CannedTable(PathBuf);

        impl PoseRunner for CannedTable {
            fn name(&self) -> &'static str {
                "canned"
            }

            fn run(&self, _video: &Path, _device: ComputeDevice) -> anyhow::Result<PathBuf> {
                Ok(self.0.clone())
            }
        }

        struct FailingTrim;

        impl VideoTrimmer for FailingTrim {
            fn trim(&self, source: &Path, _start_s: f64, _end_s: f64) -> anyhow::Result<PathBuf> {
                anyhow::bail!("ffmpeg could not read {}", source.display())
            }
        }

        struct CrashingRunner;

        impl PoseRunner for CrashingRunner {
            fn name(&self) -> &'static str {
                "crashing"
            }

            fn run(&self, _video: &Path, _device: ComputeDevice) -> anyhow::Result<PathBuf> {
                anyhow::bail!("pose model exited with status 1")
            }
        }

        /// Requests cancellation while the pose model is still running.
        struct CancelsMidRun {
            table: PathBuf,
            cancel: Arc<Mutex<Option<CancelFlag>>>,
        }

        impl PoseRunner for CancelsMidRun {
            fn name(&self) -> &'static str {
                "cancels"
            }

            fn run(&self, _video: &Path, _device: ComputeDevice) -> anyhow::Result<PathBuf> {
                if let Some(flag) = self.cancel.lock().unwrap().as_ref() {
                    flag.cancel();
                }
                Ok(self.table.clone())
            }
        }

        fn batch(runner: Box<dyn PoseRunner>, trimmer: Box<dyn VideoTrimmer>) -> Engine {
            Engine::Batch(BatchPoseEngine::with_parts(
                runner,
                trimmer,
                &EngineParams::default(),
                ComputeDevice::Cpu,
            ))
        }

        fn pose_config() -> RunConfig {
            let mut cfg = config();
            cfg.engine = EngineKind::Pose;
            cfg
        }

        fn write_table(dir: &Path, rows: usize) -> PathBuf {
            let mut raw = String::from(
                "scorer,s,s,s\nbodyparts,snout,snout,snout\ncoords,x,y,likelihood\n",
            );
            for i in 0..rows {
                if i < rows / 2 {
                    raw.push_str(&format!("{i},100,100,0.99\n"));
                } else {
                    raw.push_str(&format!("{i},300,100,0.99\n"));
                }
            }
            let path = dir.join("table.csv");
            std::fs::write(&path, raw).unwrap();
            path
        }

        #[test]
        fn batch_engine_runs_on_worker() {
            let dir = tempfile::tempdir().unwrap();
            let table = write_table(dir.path(), 100);
            let (mut orch, _) = orchestrator(&dir, move || {
                Ok(Engine::Batch(BatchPoseEngine::with_parts(
                    Box::new(CannedTable(table.clone())),
                    Box::new(NoTrim),
                    &EngineParams::default(),
                    ComputeDevice::Cpu,
                )))
            });
            let mut cfg = config();
            cfg.engine = EngineKind::Pose;
            let result = orch.run(cfg, |_| {}).unwrap();
            assert_eq!(result.trajectory.len(), 100);
            assert_eq!(result.metrics.entries_count, 1);
            assert!((result.metrics.per_zone_seconds["Closed 1"] - 5.0).abs() < 1e-9);
            assert!((result.metrics.per_zone_seconds["Open 1"] - 5.0).abs() < 1e-9);
            assert!((result.metrics.total_distance - 200.0).abs() < 1e-9);
            assert!((result.metrics.anxiety_index - 50.0).abs() < 1e-9);
            assert_eq!(result.provenance.landmark.as_deref(), Some("snout"));
        }

        #[test]
        fn trimmed_rows_are_offset_by_window_start() {
            let dir = tempfile::tempdir().unwrap();
            let table = write_table(dir.path(), 30);
            let (mut orch, _) = orchestrator(&dir, move || {
                Ok(Engine::Batch(BatchPoseEngine::with_parts(
                    Box::new(CannedTable(table.clone())),
                    Box::new(NoTrim),
                    &EngineParams::default(),
                    ComputeDevice::Cpu,
                )))
            });
            let mut cfg = config();
            cfg.engine = EngineKind::Pose;
            cfg.start_s = 5.0;
            cfg.end_s = 7.0;
            let result = orch.run(cfg, |_| {}).unwrap();
            let samples = result.trajectory.samples();
            assert!((samples[0].time_seconds - 5.0).abs() < 1e-9);
            assert_eq!(samples.len(), 21);
        }

        #[test]
        fn cancellation_after_estimate_discards_result() {
            let dir = tempfile::tempdir().unwrap();
            let table = write_table(dir.path(), 100);
            let slot: Arc<Mutex<Option<CancelFlag>>> = Arc::new(Mutex::new(None));
            let runner_slot = slot.clone();
            let (mut orch, _) = orchestrator(&dir, move || {
                let runner = CancelsMidRun {
                    table: table.clone(),
                    cancel: runner_slot.clone(),
                };
                Ok(batch(Box::new(runner), Box::new(NoTrim)))
            });
            *slot.lock().unwrap() = Some(orch.cancel_flag());

            let err = orch.run(pose_config(), |_| {}).unwrap_err();
            assert_eq!(err, PipelineError::Cancelled);
            assert_eq!(orch.state(), RunState::Cancelled);
            assert!(orch.last_result().is_none());
            assert!(orch.session().run_result().unwrap().is_none());
            assert!(orch.progress().fraction() < 1.0);
        }

        #[test]
        fn runner_failure_is_inference_error() {
            let dir = tempfile::tempdir().unwrap();
            let (mut orch, _) = orchestrator(&dir, || {
                Ok(batch(Box::new(CrashingRunner), Box::new(NoTrim)))
            });
            let err = orch.run(pose_config(), |_| {}).unwrap_err();
            assert!(matches!(err, PipelineError::EngineInference(_)));
            assert_eq!(orch.state(), RunState::Failed);
            assert!(orch.last_result().is_none());
            assert!(orch.session().run_result().unwrap().is_none());
        }

        #[test]
        fn trim_failure_is_io_error() {
            let dir = tempfile::tempdir().unwrap();
            let table = write_table(dir.path(), 30);
            let (mut orch, _) = orchestrator(&dir, move || {
                Ok(batch(
                    Box::new(CannedTable(table.clone())),
                    Box::new(FailingTrim),
                ))
            });
            let mut cfg = pose_config();
            cfg.start_s = 5.0;
            cfg.end_s = 7.0;
            let err = orch.run(cfg, |_| {}).unwrap_err();
            assert!(matches!(err, PipelineError::Io(_)));
            assert_eq!(orch.state(), RunState::Failed);
            assert!(orch.session().run_result().unwrap().is_none());
        }

        #[test]
        fn empty_table_fails_instead_of_completing() {
            let dir = tempfile::tempdir().unwrap();
            let table = write_table(dir.path(), 0);
            let (mut orch, _) = orchestrator(&dir, move || {
                Ok(batch(Box::new(CannedTable(table.clone())), Box::new(NoTrim)))
            });
            let err = orch.run(pose_config(), |_| {}).unwrap_err();
            assert!(matches!(err, PipelineError::EngineInference(_)));
            assert_eq!(orch.state(), RunState::Failed);
            assert!(orch.last_result().is_none());
            assert!(orch.session().run_result().unwrap().is_none());
        }
    }
}
