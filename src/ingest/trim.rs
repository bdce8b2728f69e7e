//! Physical re-trim of a source video to the analysis window.
//!
//! Only the batch pose engine trims, and only when the window differs from
//! the full clip by more than [`TRIM_TOLERANCE_S`].

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};

/// Windows within this many seconds of the full clip are analysed untrimmed.
pub const TRIM_TOLERANCE_S: f64 = 1.0;

/// True when `[start_s, end_s]` differs materially from `[0, duration_s]`.
pub fn needs_trim(start_s: f64, end_s: f64, duration_s: f64) -> bool {
    start_s > TRIM_TOLERANCE_S || (duration_s - end_s).abs() > TRIM_TOLERANCE_S
}

pub trait VideoTrimmer: Send {
    /// Write `[start_s, end_s]` of `source` to a new file and return its path.
    fn trim(&self, source: &Path, start_s: f64, end_s: f64) -> Result<PathBuf>;
}

/// Re-encodes with the `ffmpeg` command-line tool.
#[derive(Clone, Debug)]
pub struct FfmpegCliTrimmer {
    program: PathBuf,
}

impl FfmpegCliTrimmer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn output_path(source: &Path, start_s: f64, end_s: f64) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let name = format!("{stem}_trim_{:.0}ms_{:.0}ms.mp4", start_s * 1000.0, end_s * 1000.0);
        source.with_file_name(name)
    }
}

impl Default for FfmpegCliTrimmer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl VideoTrimmer for FfmpegCliTrimmer {
    fn trim(&self, source: &Path, start_s: f64, end_s: f64) -> Result<PathBuf> {
        if end_s <= start_s {
            return Err(anyhow!("trim window [{start_s}, {end_s}] is empty"));
        }
        let output = Self::output_path(source, start_s, end_s);
        log::info!(
            "trimming {} to [{:.2}s, {:.2}s] -> {}",
            source.display(),
            start_s,
            end_s,
            output.display()
        );
        let status = Command::new(&self.program)
            .arg("-y")
            .args(["-loglevel", "error"])
            .args(["-ss", &format!("{start_s:.3}")])
            .args(["-to", &format!("{end_s:.3}")])
            .arg("-i")
            .arg(source)
            .args(["-c:v", "libx264", "-an"])
            .arg(&output)
            .status()
            .with_context(|| format!("failed to launch {}", self.program.display()))?;
        if !status.success() {
            return Err(anyhow!("ffmpeg trim exited with {status}"));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_length_window_is_not_trimmed() {
        assert!(!needs_trim(0.0, 120.0, 120.0));
        assert!(!needs_trim(0.9, 119.2, 120.0));
    }

    #[test]
    fn material_difference_triggers_trim() {
        assert!(needs_trim(1.5, 120.0, 120.0));
        assert!(needs_trim(0.0, 60.0, 120.0));
    }

    #[test]
    fn output_lands_next_to_source() {
        let out = FfmpegCliTrimmer::output_path(Path::new("/data/rat7.avi"), 2.0, 32.5);
        assert_eq!(out, Path::new("/data/rat7_trim_2000ms_32500ms.mp4"));
    }

    #[test]
    fn missing_program_is_an_error() {
        let trimmer = FfmpegCliTrimmer::new("/nonexistent/ffmpeg-binary");
        let err = trimmer.trim(Path::new("/tmp/in.mp4"), 0.0, 5.0).unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
        assert!(trimmer.trim(Path::new("/tmp/in.mp4"), 5.0, 5.0).is_err());
    }
}
