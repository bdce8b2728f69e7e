use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{EngineKind, EngineParams};
use crate::device::DevicePreference;
use crate::error::PipelineError;
use crate::ingest::{FileConfig, FileSource};
use crate::run::{AnalysisParams, RunConfig};
use crate::session::{SessionState, DEFAULT_SESSION_PATH};
use crate::zone::{Zone, ZoneSet};

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnalyzerConfigFile {
    video: Option<VideoConfigFile>,
    engine: Option<EngineConfigFile>,
    zones: Option<ZonesConfigFile>,
    metrics: Option<MetricsConfigFile>,
    session: Option<SessionConfigFile>,
    device: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    path: Option<String>,
    start_s: Option<f64>,
    end_s: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    kind: Option<String>,
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    secondary_keypoint: Option<usize>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    pose_command: Option<Vec<String>>,
    landmark: Option<String>,
    ffmpeg: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ZonesConfigFile {
    /// JSON written by the zone drawing tool.
    path: Option<PathBuf>,
    rects: Option<Vec<Zone>>,
}

#[derive(Debug, Deserialize, Default)]
struct MetricsConfigFile {
    stride: Option<u32>,
    body_length_px: Option<f64>,
    immobility_fraction: Option<f64>,
    open_arm_pattern: Option<String>,
    closed_arm_pattern: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    path: Option<PathBuf>,
}

/// Analyzer configuration: file, then defaults, then environment.
///
/// Video, trim window, zones and device stay unset when neither the file nor
/// the environment names them so the saved session can fill them in.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub video_path: Option<String>,
    pub start_s: Option<f64>,
    pub end_s: Option<f64>,
    pub engine: Option<EngineKind>,
    pub engine_params: EngineParams,
    pub zones: Option<ZoneSet>,
    pub analysis: AnalysisParams,
    pub session_path: PathBuf,
    pub device: Option<DevicePreference>,
}

impl AnalyzerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EPM_CONFIG").ok().filter(|p| !p.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AnalyzerConfigFile::default(),
        };
        let base_dir = path.and_then(Path::parent).unwrap_or(Path::new("."));
        let mut cfg = Self::from_file(file_cfg, base_dir)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnalyzerConfigFile, base_dir: &Path) -> Result<Self> {
        let video = file.video.unwrap_or_default();
        let engine_file = file.engine.unwrap_or_default();
        let metrics = file.metrics.unwrap_or_default();

        let engine: Option<EngineKind> = engine_file.kind.as_deref().map(str::parse).transpose()?;
        let defaults = EngineParams::default();
        let engine_params = EngineParams {
            model_path: engine_file.model_path.map(|p| resolve(base_dir, p)),
            confidence: engine_file.confidence.unwrap_or(defaults.confidence),
            secondary_keypoint: engine_file
                .secondary_keypoint
                .unwrap_or(defaults.secondary_keypoint),
            input_width: engine_file.input_width.unwrap_or(defaults.input_width),
            input_height: engine_file.input_height.unwrap_or(defaults.input_height),
            pose_command: engine_file.pose_command.unwrap_or_default(),
            landmark: engine_file.landmark,
            ffmpeg: engine_file.ffmpeg.unwrap_or(defaults.ffmpeg),
        };

        let zones = match file.zones {
            Some(ZonesConfigFile {
                path: Some(_),
                rects: Some(_),
            }) => return Err(anyhow!("zones: set either 'path' or 'rects', not both")),
            Some(ZonesConfigFile {
                path: Some(path),
                ..
            }) => Some(read_zones_file(&resolve(base_dir, path))?),
            Some(ZonesConfigFile {
                rects: Some(rects),
                ..
            }) => Some(ZoneSet::new(rects)?),
            _ => None,
        };

        let analysis_defaults = AnalysisParams::default();
        let analysis = AnalysisParams {
            stride: metrics.stride.unwrap_or(analysis_defaults.stride),
            body_length_px: metrics
                .body_length_px
                .unwrap_or(analysis_defaults.body_length_px),
            immobility_fraction: metrics
                .immobility_fraction
                .unwrap_or(analysis_defaults.immobility_fraction),
            open_arm_pattern: metrics
                .open_arm_pattern
                .unwrap_or(analysis_defaults.open_arm_pattern),
            closed_arm_pattern: metrics
                .closed_arm_pattern
                .unwrap_or(analysis_defaults.closed_arm_pattern),
        };

        let session_path = file
            .session
            .and_then(|session| session.path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_PATH));
        let device: Option<DevicePreference> = file.device.as_deref().map(str::parse).transpose()?;

        Ok(Self {
            video_path: video.path,
            start_s: video.start_s,
            end_s: video.end_s,
            engine,
            engine_params,
            zones,
            analysis,
            session_path,
            device,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("EPM_VIDEO_PATH") {
            if !path.trim().is_empty() {
                self.video_path = Some(path);
            }
        }
        if let Ok(kind) = std::env::var("EPM_ENGINE") {
            if !kind.trim().is_empty() {
                self.engine = Some(kind.parse()?);
            }
        }
        if let Ok(device) = std::env::var("EPM_DEVICE") {
            if !device.trim().is_empty() {
                self.device = Some(device.parse()?);
            }
        }
        if let Ok(confidence) = std::env::var("EPM_CONFIDENCE") {
            self.engine_params.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("EPM_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(path) = std::env::var("EPM_SESSION_PATH") {
            if !path.trim().is_empty() {
                self.session_path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.engine_params.confidence) {
            return Err(anyhow!(
                "confidence must be between 0 and 1, got {}",
                self.engine_params.confidence
            ));
        }
        if self.analysis.stride == 0 {
            return Err(anyhow!("metrics.stride must be at least 1"));
        }
        if let Some(start) = self.start_s {
            if !start.is_finite() || start < 0.0 {
                return Err(anyhow!("video.start_s must be a non-negative time"));
            }
        }
        if let (Some(start), Some(end)) = (self.start_s, self.end_s) {
            if end <= start {
                return Err(anyhow!("video.end_s must be after video.start_s"));
            }
        }
        if self.engine == Some(EngineKind::Pose) && self.engine_params.pose_command.is_empty() {
            return Err(anyhow!("engine.pose_command is required for the pose engine"));
        }
        Ok(())
    }

    /// Fill unset video, trim window, zones and device from a saved session.
    pub fn fill_from_session(&mut self, session: &SessionState) -> Result<()> {
        if self.video_path.is_none() {
            self.video_path = session.video_path()?;
        }
        if self.start_s.is_none() && self.end_s.is_none() {
            if let Some((start, end)) = session.saved_trim()? {
                self.start_s = Some(start);
                self.end_s = Some(end);
            }
        }
        if self.zones.is_none() {
            self.zones = session.saved_zone_set()?;
        }
        if self.device.is_none() {
            self.device = session.device_preference()?;
        }
        Ok(())
    }

    /// Engine used when none is named: real-time with a model, pose with a
    /// command, otherwise the simulated engine.
    pub fn engine_kind(&self) -> EngineKind {
        match self.engine {
            Some(kind) => kind,
            None if self.engine_params.model_path.is_some() => EngineKind::Realtime,
            None if !self.engine_params.pose_command.is_empty() => EngineKind::Pose,
            None => EngineKind::Simulated,
        }
    }

    /// Freeze the configuration into a run snapshot.
    ///
    /// An unset trim end defaults to the video's duration.
    pub fn run_config(&self) -> Result<RunConfig, PipelineError> {
        let video_path = self
            .video_path
            .clone()
            .ok_or_else(|| PipelineError::config("no video selected"))?;
        let zone_set = self
            .zones
            .clone()
            .ok_or_else(|| PipelineError::config("no zones configured"))?;
        let start_s = self.start_s.unwrap_or(0.0);
        let end_s = match self.end_s {
            Some(end) => end,
            None => {
                let source = FileSource::open(FileConfig::new(video_path.clone()))
                    .map_err(PipelineError::io)?;
                source.info().duration_s
            }
        };
        let engine = self.engine_kind();
        if engine == EngineKind::Simulated {
            log::warn!("no detection model configured; using the simulated engine");
        }
        let config = RunConfig {
            video_path,
            start_s,
            end_s,
            engine,
            engine_params: self.engine_params.clone(),
            zone_set,
            device: self.device.unwrap_or_default(),
            analysis: self.analysis.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn read_config_file(path: &Path) -> Result<AnalyzerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Read the drawing tool's zone list.
pub fn read_zones_file(path: &Path) -> Result<ZoneSet> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read zones file {}", path.display()))?;
    let zones = ZoneSet::from_json(&raw)
        .with_context(|| format!("invalid zones file {}", path.display()))?;
    Ok(zones)
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
