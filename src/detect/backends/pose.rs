//! Batch pose-estimation engine.
//!
//! Runs out-of-band over a whole clip rather than frame by frame:
//! 1. Re-trim the source to the analysis window when it differs materially
//!    from the full clip
//! 2. Hand the clip to a `PoseRunner`, which writes a landmark table
//! 3. Read the representative landmark's per-frame positions
//!
//! The runner call is atomic from the caller's point of view; cancellation is
//! only observed between these steps.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::EngineParams;
use crate::detect::landmarks::LandmarkTable;
use crate::device::ComputeDevice;
use crate::ingest::trim::{needs_trim, FfmpegCliTrimmer, VideoTrimmer};
use crate::zone::Point;

/// Produces a landmark table for a whole clip.
pub trait PoseRunner: Send {
    fn name(&self) -> &'static str;

    /// Analyse `video` and return the path of the landmark table written.
    fn run(&self, video: &Path, device: ComputeDevice) -> Result<PathBuf>;
}

/// Runs an external pose-estimation command.
///
/// `{video}` and `{output}` in the argument list are substituted. The device
/// is passed through the child's environment only.
#[derive(Clone, Debug)]
pub struct CommandPoseRunner {
    command: Vec<String>,
}

impl CommandPoseRunner {
    pub fn new(command: Vec<String>) -> Result<Self> {
        let program = command
            .first()
            .ok_or_else(|| anyhow!("pose engine needs a command line"))?;
        if find_program(program).is_none() {
            return Err(anyhow!("pose program '{program}' not found"));
        }
        Ok(Self { command })
    }

    fn output_path(video: &Path) -> PathBuf {
        video.with_extension("landmarks.csv")
    }
}

impl PoseRunner for CommandPoseRunner {
    fn name(&self) -> &'static str {
        "command"
    }

    fn run(&self, video: &Path, device: ComputeDevice) -> Result<PathBuf> {
        let output = Self::output_path(video);
        let video_arg = video.to_string_lossy();
        let output_arg = output.to_string_lossy();
        let args: Vec<String> = self.command[1..]
            .iter()
            .map(|arg| {
                arg.replace("{video}", &video_arg)
                    .replace("{output}", &output_arg)
            })
            .collect();
        log::info!("running pose estimation on {} ({device})", video.display());
        let status = Command::new(&self.command[0])
            .args(&args)
            .env("CUDA_VISIBLE_DEVICES", device.visible_devices())
            .status()
            .with_context(|| format!("failed to launch pose program '{}'", self.command[0]))?;
        if !status.success() {
            return Err(anyhow!("pose program exited with {status}"));
        }
        if !output.is_file() {
            return Err(anyhow!(
                "pose program did not write {}",
                output.display()
            ));
        }
        Ok(output)
    }
}

/// Positions for one landmark, one entry per analysed frame.
#[derive(Clone, Debug)]
pub struct PoseSeries {
    pub landmark: String,
    /// Source time of row 0.
    pub origin_s: f64,
    pub positions: Vec<Option<Point>>,
}

/// Clip handed to the runner.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedClip {
    pub path: PathBuf,
    pub origin_s: f64,
    pub trimmed: bool,
}

pub struct BatchPoseEngine {
    runner: Box<dyn PoseRunner>,
    trimmer: Box<dyn VideoTrimmer>,
    landmark: Option<String>,
    confidence: f32,
    device: ComputeDevice,
}

impl BatchPoseEngine {
    pub fn initialize(params: &EngineParams, device: ComputeDevice) -> Result<Self> {
        let runner = CommandPoseRunner::new(params.pose_command.clone())?;
        Ok(Self::with_parts(
            Box::new(runner),
            Box::new(FfmpegCliTrimmer::new(&params.ffmpeg)),
            params,
            device,
        ))
    }

    pub fn with_parts(
        runner: Box<dyn PoseRunner>,
        trimmer: Box<dyn VideoTrimmer>,
        params: &EngineParams,
        device: ComputeDevice,
    ) -> Self {
        Self {
            runner,
            trimmer,
            landmark: params.landmark.clone(),
            confidence: params.confidence,
            device,
        }
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    /// Trim only when the window differs materially from the full clip.
    pub fn prepare(
        &self,
        video: &Path,
        start_s: f64,
        end_s: f64,
        duration_s: f64,
    ) -> Result<PreparedClip> {
        if needs_trim(start_s, end_s, duration_s) {
            let path = self.trimmer.trim(video, start_s, end_s)?;
            Ok(PreparedClip {
                path,
                origin_s: start_s,
                trimmed: true,
            })
        } else {
            log::info!(
                "window [{start_s:.2}s, {end_s:.2}s] covers the clip ({duration_s:.2}s); \
                 skipping re-trim"
            );
            Ok(PreparedClip {
                path: video.to_path_buf(),
                origin_s: 0.0,
                trimmed: false,
            })
        }
    }

    pub fn estimate(&self, clip: &PreparedClip) -> Result<PoseSeries> {
        let table_path = self.runner.run(&clip.path, self.device)?;
        let table = LandmarkTable::read(&table_path)?;
        let landmark = table.representative(self.landmark.as_deref())?.to_string();
        let positions = table.positions(&landmark, self.confidence)?;
        log::info!(
            "pose runner '{}' produced {} rows for landmark '{}'",
            self.runner.name(),
            positions.len(),
            landmark
        );
        Ok(PoseSeries {
            landmark,
            origin_s: clip.origin_s,
            positions,
        })
    }
}

fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingTrimmer {
        calls: Arc<Mutex<Vec<(f64, f64)>>>,
    }

    impl VideoTrimmer for RecordingTrimmer {
        fn trim(&self, source: &Path, start_s: f64, end_s: f64) -> Result<PathBuf> {
            self.calls.lock().unwrap().push((start_s, end_s));
            Ok(source.with_file_name("trimmed.mp4"))
        }
    }

    struct TableRunner {
        table: PathBuf,
    }

    impl PoseRunner for TableRunner {
        fn name(&self) -> &'static str {
            "table"
        }

        fn run(&self, _video: &Path, _device: ComputeDevice) -> Result<PathBuf> {
            Ok(self.table.clone())
        }
    }

    fn engine(table: PathBuf, calls: Arc<Mutex<Vec<(f64, f64)>>>) -> BatchPoseEngine {
        BatchPoseEngine::with_parts(
            Box::new(TableRunner { table }),
            Box::new(RecordingTrimmer { calls }),
            &EngineParams::default(),
            ComputeDevice::Cpu,
        )
    }

    #[test]
    fn full_window_is_not_retrimmed() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(PathBuf::from("unused.csv"), calls.clone());
        let clip = engine.prepare(Path::new("/v/a.mp4"), 0.4, 59.5, 60.0).unwrap();
        assert!(!clip.trimmed);
        assert_eq!(clip.origin_s, 0.0);
        assert!(calls.lock().unwrap().is_empty());

        let clip = engine.prepare(Path::new("/v/a.mp4"), 5.0, 30.0, 60.0).unwrap();
        assert!(clip.trimmed);
        assert_eq!(clip.origin_s, 5.0);
        assert_eq!(clip.path, Path::new("/v/trimmed.mp4"));
        assert_eq!(calls.lock().unwrap().as_slice(), &[(5.0, 30.0)]);
    }

    #[test]
    fn estimate_reads_snout_positions() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("out.csv");
        std::fs::write(
            &table,
            "scorer,s,s,s,s,s,s\nbodyparts,tail,tail,tail,snout,snout,snout\n\
             coords,x,y,likelihood,x,y,likelihood\n0,1,1,0.9,5,6,0.9\n1,1,1,0.9,7,8,0.2\n",
        )
        .unwrap();
        let engine = engine(table, Arc::new(Mutex::new(Vec::new())));
        let clip = PreparedClip {
            path: PathBuf::from("/v/a.mp4"),
            origin_s: 2.0,
            trimmed: true,
        };
        let series = engine.estimate(&clip).unwrap();
        assert_eq!(series.landmark, "snout");
        assert_eq!(series.origin_s, 2.0);
        assert_eq!(series.positions, vec![Some(Point::new(5.0, 6.0)), None]);
    }

    #[test]
    fn command_runner_requires_existing_program() {
        assert!(CommandPoseRunner::new(Vec::new()).is_err());
        assert!(CommandPoseRunner::new(vec!["/nonexistent/pose-tool".to_string()]).is_err());
    }

    #[test]
    fn output_path_sits_next_to_video() {
        assert_eq!(
            CommandPoseRunner::output_path(Path::new("/v/rat.mp4")),
            Path::new("/v/rat.landmarks.csv")
        );
    }
}
