//! Local file frame source.
//!
//! `FileSource` reads frames from a local video file. It is responsible for:
//! - Reporting native geometry, frame rate and duration
//! - Seeking to the start of the analysis window
//! - Stamping each frame with its container timestamp
//!
//! `stub://` paths produce a synthetic clip and need no decoder.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::Frame;

/// Frame rate assumed when a container reports none.
pub const FALLBACK_FPS: f64 = 30.0;

/// Geometry of the synthetic `stub://` clip.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_s: f64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 10.0,
            duration_s: 10.0,
        }
    }
}

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path, or `stub://<name>` for a synthetic clip.
    pub path: String,
    pub synthetic: SyntheticSpec,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            synthetic: SyntheticSpec::default(),
        }
    }
}

/// Stream properties as reported by the container.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_s: f64,
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): '{}'",
                config.path
            ));
        }
        if config.path.starts_with("stub://") {
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)?),
            })
        } else {
            if !std::path::Path::new(&config.path).is_file() {
                return Err(anyhow!("video file '{}' does not exist", config.path));
            }
            #[cfg(feature = "ingest-ffmpeg")]
            {
                Ok(Self {
                    backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
                })
            }
            #[cfg(not(feature = "ingest-ffmpeg"))]
            {
                Err(anyhow!(
                    "reading '{}' requires the ingest-ffmpeg feature; \
                     only stub:// clips are available in this build",
                    config.path
                ))
            }
        }
    }

    pub fn info(&self) -> VideoInfo {
        match &self.backend {
            FileBackend::Synthetic(source) => source.info(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.info(),
        }
    }

    /// Position the source so the next frame is the first at or after `start_s`.
    pub fn seek(&mut self, start_s: f64) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.seek(start_s),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.seek(start_s),
        }
    }

    /// Next decoded frame, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub path: String,
}

pub(crate) fn effective_fps(reported: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        FALLBACK_FPS
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    fps: f64,
    next_index: u64,
    frames_decoded: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Result<Self> {
        let spec = &config.synthetic;
        if spec.width == 0 || spec.height == 0 {
            return Err(anyhow!("synthetic source needs non-zero dimensions"));
        }
        if !spec.duration_s.is_finite() || spec.duration_s < 0.0 {
            return Err(anyhow!("synthetic source duration must be >= 0"));
        }
        log::info!("FileSource: opened {} (synthetic)", config.path);
        Ok(Self {
            fps: effective_fps(spec.fps),
            config,
            next_index: 0,
            frames_decoded: 0,
        })
    }

    fn info(&self) -> VideoInfo {
        VideoInfo {
            width: self.config.synthetic.width,
            height: self.config.synthetic.height,
            fps: self.fps,
            duration_s: self.config.synthetic.duration_s,
        }
    }

    fn total_frames(&self) -> u64 {
        (self.config.synthetic.duration_s * self.fps).round() as u64
    }

    fn seek(&mut self, start_s: f64) -> Result<()> {
        if !start_s.is_finite() || start_s < 0.0 {
            return Err(anyhow!("seek target must be a non-negative time"));
        }
        self.next_index = (start_s * self.fps - 1e-9).ceil().max(0.0) as u64;
        Ok(())
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.next_index >= self.total_frames() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.frames_decoded += 1;

        let width = self.config.synthetic.width;
        let height = self.config.synthetic.height;
        let mut pixels = vec![0u8; (width as usize) * (height as usize) * 3];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + index) % 256) as u8;
        }
        Some(Frame::new(
            pixels,
            width,
            height,
            index as f64 / self.fps,
            self.frames_decoded - 1,
        ))
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_decoded: self.frames_decoded,
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_and_empty_paths() {
        assert!(FileSource::open(FileConfig::new("rtsp://camera/1")).is_err());
        assert!(FileSource::open(FileConfig::new("  ")).is_err());
        assert!(FileSource::open(FileConfig::new("/no/such/video.mp4")).is_err());
    }

    #[cfg(not(feature = "ingest-ffmpeg"))]
    #[test]
    fn real_file_names_the_missing_feature() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("maze.mp4");
        std::fs::write(&video, b"not decoded").unwrap();
        let err = FileSource::open(FileConfig::new(video.display().to_string()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("ingest-ffmpeg"));
        assert!(err.to_string().contains("maze.mp4"));
    }

    #[test]
    fn synthetic_source_stamps_frames_at_fps() {
        let mut source = FileSource::open(FileConfig::new("stub://epm")).unwrap();
        let info = source.info();
        assert_eq!((info.width, info.height), (640, 480));
        assert_eq!(info.fps, 10.0);

        let mut count = 0;
        let mut last = -1.0;
        while let Some(frame) = source.next_frame().unwrap() {
            assert!(frame.timestamp_s > last);
            last = frame.timestamp_s;
            count += 1;
        }
        assert_eq!(count, 100);
        assert!((last - 9.9).abs() < 1e-9);
        assert_eq!(source.stats().frames_decoded, 100);
    }

    #[test]
    fn synthetic_seek_starts_at_window() {
        let mut config = FileConfig::new("stub://epm");
        config.synthetic.fps = 0.0;
        config.synthetic.duration_s = 2.0;
        let mut source = FileSource::open(config).unwrap();
        assert_eq!(source.info().fps, FALLBACK_FPS);

        source.seek(1.0).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        assert!((first.timestamp_s - 1.0).abs() < 1e-9);
        assert_eq!(first.index, 0);
        assert!(source.seek(-1.0).is_err());
    }
}
